//! In-process data channel pair.
//!
//! Two linked [`MemoryChannel`]s behave like the two ends of a peer data
//! channel: text sent on one arrives as a `Message` event on the other, in
//! order. Fault hooks let callers drop or rewrite outbound payloads, fail
//! sends outright, or hold a close request open, which is how the
//! protocol's failure paths are exercised without a network.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::channel::{ChannelError, ChannelEvent, DataChannel, RawPayload};

/// Rewrites or drops (`None`) each outbound payload.
pub type Interceptor = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

const LINK_CONNECTING: u8 = 0;
const LINK_OPEN: u8 = 1;
const LINK_CLOSED: u8 = 2;

struct Link {
    state: AtomicU8,
}

#[derive(Default)]
struct Endpoint {
    listeners: Mutex<Vec<mpsc::UnboundedSender<ChannelEvent>>>,
    interceptor: Mutex<Option<Interceptor>>,
    fail_sends: AtomicBool,
    hold_close: AtomicBool,
    sent: AtomicUsize,
}

impl Endpoint {
    fn emit(&self, event: ChannelEvent) {
        let mut listeners = lock(&self.listeners);
        listeners.retain(|l| l.send(event.clone()).is_ok());
    }
}

/// One end of an in-process channel pair.
pub struct MemoryChannel {
    this: Arc<Endpoint>,
    peer: Arc<Endpoint>,
    link: Arc<Link>,
}

impl MemoryChannel {
    /// Two connected ends, both still `connecting`.
    pub fn pair() -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
        let a = Arc::new(Endpoint::default());
        let b = Arc::new(Endpoint::default());
        let link = Arc::new(Link {
            state: AtomicU8::new(LINK_CONNECTING),
        });
        (
            Arc::new(MemoryChannel {
                this: a.clone(),
                peer: b.clone(),
                link: link.clone(),
            }),
            Arc::new(MemoryChannel {
                this: b,
                peer: a,
                link,
            }),
        )
    }

    /// Open the link. Both ends observe `Open`.
    pub fn open(&self) {
        if self
            .link
            .state
            .compare_exchange(LINK_CONNECTING, LINK_OPEN, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.this.emit(ChannelEvent::Open);
            self.peer.emit(ChannelEvent::Open);
        }
    }

    /// Deliver an event to this end's listeners only.
    pub fn emit_local(&self, event: ChannelEvent) {
        self.this.emit(event);
    }

    /// Route every outbound payload from this end through `f`.
    pub fn set_interceptor<F>(&self, f: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        *lock(&self.this.interceptor) = Some(Arc::new(f));
    }

    pub fn clear_interceptor(&self) {
        *lock(&self.this.interceptor) = None;
    }

    /// Make every `send` from this end fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.this.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// While held, `close` from this end is ignored.
    pub fn hold_close(&self, hold: bool) {
        self.this.hold_close.store(hold, Ordering::SeqCst);
    }

    /// Payloads accepted by `send` on this end, including intercepted ones.
    pub fn sent_count(&self) -> usize {
        self.this.sent.load(Ordering::SeqCst)
    }

    /// Listeners still registered on this end.
    pub fn listener_count(&self) -> usize {
        let mut listeners = lock(&self.this.listeners);
        listeners.retain(|l| !l.is_closed());
        listeners.len()
    }
}

impl DataChannel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.link.state.load(Ordering::SeqCst) == LINK_OPEN
    }

    fn send(&self, text: &str) -> Result<(), ChannelError> {
        if self.this.fail_sends.load(Ordering::SeqCst) {
            return Err(ChannelError::Transport("send failure injected".into()));
        }
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }
        self.this.sent.fetch_add(1, Ordering::SeqCst);

        let interceptor = lock(&self.this.interceptor).clone();
        let payload = match interceptor {
            Some(f) => f(text),
            None => Some(text.to_owned()),
        };
        if let Some(payload) = payload {
            self.peer.emit(ChannelEvent::Message(RawPayload::Text(payload)));
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.this.listeners).push(tx);
        rx
    }

    fn close(&self) {
        if self.this.hold_close.load(Ordering::SeqCst) {
            return;
        }
        if self.link.state.swap(LINK_CLOSED, Ordering::SeqCst) == LINK_CLOSED {
            return;
        }
        for endpoint in [&self.this, &self.peer] {
            endpoint.emit(ChannelEvent::Closing);
            endpoint.emit(ChannelEvent::Close);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
