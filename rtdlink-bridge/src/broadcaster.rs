//! Live line stream to TCP subscribers.
//!
//! Delivery is best-effort: no acknowledgment, retry or backpressure. A
//! subscriber that closes, errors or stalls past the write timeout is evicted
//! and every other subscriber keeps receiving.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::error::{BridgeError, Result, SubscriberError};

/// A connected downstream consumer.
#[derive(Debug)]
struct Subscriber {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Subscriber {
    /// Non-blocking check for a peer that has already closed its side.
    ///
    /// Subscribers never send anything meaningful, so inbound bytes are
    /// discarded. A half-closed peer (write side shut down) reads as EOF and
    /// counts as closed.
    fn is_closed(&self) -> bool {
        let mut scratch = [0u8; 256];
        loop {
            match self.stream.try_read(&mut scratch) {
                Ok(0) => return true,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return false,
                Err(_) => return true,
            }
        }
    }

    async fn send(
        &mut self,
        payload: &[u8],
        write_timeout: Duration,
    ) -> std::result::Result<(), SubscriberError> {
        if self.is_closed() {
            return Err(SubscriberError::Closed { peer: self.peer });
        }

        match tokio::time::timeout(write_timeout, self.stream.write_all(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(SubscriberError::Write {
                peer: self.peer,
                source,
            }),
            Err(_) => Err(SubscriberError::WriteTimeout {
                peer: self.peer,
                timeout: write_timeout,
            }),
        }
    }
}

/// Fans published lines out to every connected subscriber.
///
/// Owns the listener task and the subscriber registry; all registry access
/// goes through one async mutex.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<Mutex<Vec<Subscriber>>>,
    local_addr: SocketAddr,
    write_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Broadcaster {
    /// Bind the listener and start accepting subscribers.
    pub async fn start(bind: &str, write_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|source| BridgeError::Bind {
                addr: bind.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(listener, registry.clone(), shutdown_rx));

        info!(addr = %local_addr, "Stream listener started");

        Ok(Self {
            registry,
            local_addr,
            write_timeout,
            shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub async fn from_config(config: &StreamConfig) -> Result<Self> {
        Self::start(&config.bind, config.write_timeout()).await
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn subscriber_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Send `line` plus a newline to every subscriber, evicting the ones that fail.
    ///
    /// Writes run concurrently, so a publish takes at most one write timeout
    /// however many subscribers are stalled.
    pub async fn publish(&self, line: &str) -> PublishStats {
        let mut payload = String::with_capacity(line.len() + 1);
        payload.push_str(line);
        payload.push('\n');

        let mut stats = PublishStats::default();
        let mut registry = self.registry.lock().await;

        let results = join_all(
            registry
                .iter_mut()
                .map(|subscriber| subscriber.send(payload.as_bytes(), self.write_timeout)),
        )
        .await;

        let mut kept = Vec::with_capacity(registry.len());
        for (subscriber, result) in registry.drain(..).zip(results) {
            match result {
                Ok(()) => {
                    stats.success += 1;
                    kept.push(subscriber);
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(
                        peer = %subscriber.peer,
                        category = %e.category(),
                        error = %e,
                        "Subscriber disconnected"
                    );
                }
            }
        }
        *registry = kept;

        stats
    }

    /// Stop accepting and close every subscriber. Safe to call more than once.
    pub async fn shutdown(&self) {
        let first = !self.shutdown_tx.send_replace(true);

        if let Some(task) = self.accept_task.lock().await.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Stream accept task failed");
            }
        }

        let mut registry = self.registry.lock().await;
        for mut subscriber in registry.drain(..) {
            if let Err(e) = subscriber.stream.shutdown().await {
                debug!(peer = %subscriber.peer, error = %e, "Error closing subscriber");
            }
            info!(peer = %subscriber.peer, "Closed subscriber connection");
        }

        if first {
            info!(addr = %self.local_addr, "Stream listener stopped");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Mutex<Vec<Subscriber>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    registry.lock().await.push(Subscriber { stream, peer });
                    info!(%peer, "Subscriber connected");
                }
                Err(e) => {
                    error!(error = %e, "Stream accept error");
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Outcome of a single publish.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Subscribers that received the line.
    pub success: usize,
    /// Subscribers evicted during this publish.
    pub failed: usize,
}
