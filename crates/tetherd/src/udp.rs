//! UDP datagram transport.
//!
//! Each datagram carries exactly one serialized frame. The socket is bound
//! once and talks to a single fixed peer; datagrams from anyone else are
//! ignored. Delivery is best effort, which the confirmation protocol
//! already tolerates.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether_services::{ChannelError, ChannelEvent, DataChannel, RawPayload};

/// Largest payload a single UDP datagram can carry.
const MAX_DATAGRAM: usize = 65_507;

type Listeners = Arc<Mutex<Vec<mpsc::UnboundedSender<ChannelEvent>>>>;

pub struct UdpChannel {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    listeners: Listeners,
    open: AtomicBool,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpChannel {
    /// Bind `bind_addr` and treat `peer_addr` as the far end. The channel
    /// is open as soon as the socket is bound.
    pub async fn bind(bind_addr: &str, peer_addr: &str) -> Result<Arc<Self>> {
        let peer: SocketAddr = peer_addr
            .parse()
            .with_context(|| format!("invalid peer address {peer_addr}"))?;
        let socket = Arc::new(
            UdpSocket::bind(bind_addr)
                .await
                .with_context(|| format!("failed to bind UDP socket at {bind_addr}"))?,
        );
        let local = socket.local_addr()?;

        let listeners: Listeners = Arc::new(Mutex::new(Vec::new()));
        let recv_task = tokio::spawn(recv_loop(socket.clone(), peer, listeners.clone()));
        tracing::info!(local = %local, peer = %peer, "udp channel bound");

        Ok(Arc::new(Self {
            socket,
            peer,
            listeners,
            open: AtomicBool::new(true),
            recv_task: Mutex::new(Some(recv_task)),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl DataChannel for UdpChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, text: &str) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }
        if text.len() > MAX_DATAGRAM {
            return Err(ChannelError::Transport(format!(
                "frame of {} bytes exceeds datagram limit",
                text.len()
            )));
        }
        self.socket
            .try_send_to(text.as_bytes(), self.peer)
            .map(|_| ())
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.listeners).push(tx);
        rx
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = lock(&self.recv_task).take() {
            task.abort();
        }
        emit(&self.listeners, ChannelEvent::Closing);
        emit(&self.listeners, ChannelEvent::Close);
        tracing::debug!(peer = %self.peer, "udp channel closed");
    }
}

impl Drop for UdpChannel {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.recv_task).take() {
            task.abort();
        }
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, peer: SocketAddr, listeners: Listeners) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                // ICMP port unreachable from a peer that is not up yet
                // surfaces here on some platforms.
                tracing::debug!(error = %e, "recv_from failed");
                continue;
            }
        };
        if from != peer {
            tracing::trace!(from = %from, "ignoring datagram from unknown sender");
            continue;
        }
        tracing::trace!(len, "datagram received");
        emit(
            &listeners,
            ChannelEvent::Message(RawPayload::Binary(Bytes::copy_from_slice(&buf[..len]))),
        );
    }
}

fn emit(listeners: &Listeners, event: ChannelEvent) {
    lock(listeners).retain(|l| l.send(event.clone()).is_ok());
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
