//! Bridge runner for lifecycle management.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use rtdlink_common::{LoggingConfig, Session, WorkerGuard, init_tracing};
use tokio::sync::watch;
use tracing::{error, info};

use crate::BridgeArgs;
use crate::broadcaster::Broadcaster;
use crate::client::{DeviceClient, RegisterReader};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::poller::{Poller, PollerReport};
use crate::store::{self, Store, StoreTarget};

/// Owns the components of one bridge run.
///
/// Handles:
/// - Stream listener startup
/// - Device client and store selection
/// - Poller spawning
/// - Graceful shutdown on Ctrl+C or SIGTERM
///
/// # Example
///
/// ```ignore
/// use rtdlink_bridge::{BridgeConfig, BridgeRunner};
/// use rtdlink_common::Session;
///
/// let config = BridgeConfig::load("rtdlink.json5")?;
/// let runner = BridgeRunner::new(config, Session::start()).await?;
/// let report = runner.run().await?;
/// ```
pub struct BridgeRunner {
    config: BridgeConfig,
    session: Session,
    broadcaster: Arc<Broadcaster>,
    reader: Arc<dyn RegisterReader>,
    store: Arc<dyn Store>,
    target: StoreTarget,
}

impl BridgeRunner {
    /// Bind the stream listener and build the device client and store.
    pub async fn new(config: BridgeConfig, session: Session) -> Result<Self> {
        let broadcaster = Arc::new(Broadcaster::from_config(&config.stream).await?);
        let reader: Arc<dyn RegisterReader> = Arc::new(DeviceClient::from_config(&config.device));
        let (store, target) = store::from_config(&config.store, &session);

        Ok(Self {
            config,
            session,
            broadcaster,
            reader,
            store,
            target,
        })
    }

    /// Replace the device client.
    pub fn with_reader(mut self, reader: Arc<dyn RegisterReader>) -> Self {
        self.reader = reader;
        self
    }

    /// Replace the store.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Address subscribers connect to.
    pub fn stream_addr(&self) -> SocketAddr {
        self.broadcaster.local_addr()
    }

    /// Run until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<PollerReport> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes, then drain the poller.
    pub async fn run_until<F>(self, signal: F) -> Result<PollerReport>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = Poller::new(
            self.reader,
            self.broadcaster.clone(),
            self.store,
            self.target,
        )
        .configure(&self.config.device, &self.config.sampling);

        let poller_task = tokio::spawn(poller.run(shutdown_rx));

        info!(
            session = %self.session.id(),
            device = %self.config.device.address(),
            stream = %self.broadcaster.local_addr(),
            store = self.config.store.enabled,
            "Bridge running. Press Ctrl+C to stop."
        );

        signal.await;
        info!("Shutting down");

        // The poller only exits through this channel.
        shutdown_tx.send_replace(true);
        let report = poller_task.await?;

        info!(
            ticks = report.ticks,
            failed_reads = report.failed_reads,
            samples = report.samples,
            flushes = report.flushes,
            "Bridge stopped"
        );

        Ok(report)
    }
}

/// Completes on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate() => info!("Received SIGTERM"),
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Initialize tracing for this session, mapping failures to [`BridgeError::Logging`].
pub fn init_logging(config: &LoggingConfig, session: &Session) -> Result<Option<WorkerGuard>> {
    init_tracing(config, session).map_err(|e| BridgeError::Logging(e.to_string()))
}

/// Load configuration, initialize logging and run the bridge to completion.
pub async fn run_bridge(args: BridgeArgs) -> anyhow::Result<()> {
    use anyhow::Context;

    let mut config = BridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    args.apply(&mut config);

    let session = Session::start();
    let _log_guard = init_logging(&config.logging, &session)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        session = %session.id(),
        config = ?args.config,
        "Starting rtdlink-bridge"
    );

    let runner = BridgeRunner::new(config, session).await?;
    runner.run().await?;

    info!("Goodbye!");
    Ok(())
}
