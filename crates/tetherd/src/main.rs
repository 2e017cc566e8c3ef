//! tetherd: Tether peer daemon.
//!
//! Sends every stdin line to the configured peer as one message and logs
//! every message received from it.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use tether_core::config::TetherConfig;
use tether_services::Connector;

mod udp;

use udp::UdpChannel;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    let config = match std::env::args().nth(1) {
        Some(path) => TetherConfig::load_from(Path::new(&path))
            .with_context(|| format!("failed to load config from {path}"))?,
        None => {
            if let Err(e) = TetherConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            TetherConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                TetherConfig::default()
            })
        }
    };
    tracing::info!(
        bind = %config.network.bind_addr,
        peer = %config.network.peer_addr,
        max_chunk_size = config.transport.max_chunk_size,
        "tetherd starting"
    );

    let channel = UdpChannel::bind(&config.network.bind_addr, &config.network.peer_addr).await?;
    tracing::info!(local = %channel.local_addr()?, "transport ready");

    let (connector, mut incoming) = Connector::new(channel, config.transport.clone()).await;
    let connector = Arc::new(connector);

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let printer = tokio::spawn(async move {
        while let Some(received) = incoming.recv().await {
            tracing::info!(
                message_id = %received.message_id,
                message = %received.message,
                "message from peer"
            );
        }
    });

    let sent_logger = {
        let mut events = connector.sent_events();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                tracing::debug!(?event, "send progress");
            }
        })
    };

    // ── Stdin loop ───────────────────────────────────────────────────────────

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    tracing::info!("stdin closed");
                    break;
                };
                let Some(message) = parse_line(&line) else {
                    continue;
                };
                let connector = connector.clone();
                tokio::spawn(async move {
                    match connector.send(&message).await {
                        Ok(message_id) => {
                            tracing::info!(message_id = %message_id, "message confirmed by peer");
                        }
                        Err(e) => {
                            tracing::warn!(
                                message_id = e.message_id.as_deref().unwrap_or("-"),
                                reason = %e.reason,
                                "message not delivered"
                            );
                        }
                    }
                });
            }
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    connector.destroy().await;
    printer.abort();
    sent_logger.abort();
    tracing::info!("tetherd stopped");
    Ok(())
}

/// A JSON line is sent as-is; anything else is sent as `{"text": line}`.
/// Blank lines send nothing.
fn parse_line(line: &str) -> Option<Value> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str(trimmed)
            .unwrap_or_else(|_| serde_json::json!({ "text": line })),
    )
}
