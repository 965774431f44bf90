//! Device polling, live streaming and batch hand-off.

use std::sync::Arc;
use std::time::Duration;

use rtdlink_common::{Batch, Reading, Sample};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::broadcaster::Broadcaster;
use crate::client::RegisterReader;
use crate::config::{DeviceConfig, SamplingConfig};
use crate::store::{Store, StoreTarget};

/// Lifecycle of a [`Poller`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    #[default]
    Running,
    Draining,
    Stopped,
}

/// Counters returned when a poller stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollerReport {
    /// Device reads attempted.
    pub ticks: u64,
    /// Device reads that failed.
    pub failed_reads: u64,
    /// Samples appended to a batch.
    pub samples: u64,
    /// Batches handed to the store.
    pub flushes: u64,
    pub state: PollerState,
}

/// Reads the device on a fixed cadence, streams every sample and hands
/// completed batches to the store.
///
/// The active [`Batch`] is owned here alone; a flush moves it into the flush
/// task and starts a fresh one. Every flush task is tracked until it
/// finishes, and all of them are joined before the poller reports
/// [`PollerState::Stopped`].
pub struct Poller {
    reader: Arc<dyn RegisterReader>,
    broadcaster: Arc<Broadcaster>,
    store: Arc<dyn Store>,
    target: StoreTarget,
    start_address: u16,
    register_count: u16,
    interval: Duration,
    threshold: usize,
    flush_on_shutdown: bool,
    batch: Batch,
    flushes: JoinSet<()>,
    report: PollerReport,
}

impl Poller {
    /// Create a poller reading eight registers from address 0 every five
    /// seconds, flushing every 60 samples.
    pub fn new(
        reader: Arc<dyn RegisterReader>,
        broadcaster: Arc<Broadcaster>,
        store: Arc<dyn Store>,
        target: StoreTarget,
    ) -> Self {
        let sampling = SamplingConfig::default();
        Self {
            reader,
            broadcaster,
            store,
            target,
            start_address: 0,
            register_count: 8,
            interval: sampling.sample_interval(),
            threshold: sampling.batch_threshold(),
            flush_on_shutdown: sampling.flush_on_shutdown,
            batch: Batch::new(),
            flushes: JoinSet::new(),
            report: PollerReport::default(),
        }
    }

    /// Apply the register window and sampling cadence from configuration.
    pub fn configure(self, device: &DeviceConfig, sampling: &SamplingConfig) -> Self {
        self.with_registers(device.start_address, device.register_count)
            .with_interval(sampling.sample_interval())
            .with_threshold(sampling.batch_threshold())
            .with_flush_on_shutdown(sampling.flush_on_shutdown)
    }

    pub fn with_registers(mut self, start_address: u16, register_count: u16) -> Self {
        self.start_address = start_address;
        self.register_count = register_count;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Samples per batch. Clamped to at least one.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    pub fn with_flush_on_shutdown(mut self, enabled: bool) -> Self {
        self.flush_on_shutdown = enabled;
        self
    }

    pub fn state(&self) -> PollerState {
        self.report.state
    }

    pub fn report(&self) -> PollerReport {
        self.report
    }

    /// Samples accumulated since the last flush.
    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    /// Perform one device read. Returns `true` if a sample was recorded.
    ///
    /// Read failures are logged and counted; they never stop the poller.
    pub async fn tick(&mut self) -> bool {
        self.report.ticks += 1;

        let values = match self
            .reader
            .read_registers(self.start_address, self.register_count)
            .await
        {
            Ok(values) => values,
            Err(e) => {
                self.report.failed_reads += 1;
                warn!(
                    category = %e.category(),
                    error = %e,
                    tick = self.report.ticks,
                    "Device read failed"
                );
                return false;
            }
        };

        let sample = Sample::now(values.into_iter().map(Reading::new).collect());
        let line = sample.to_line();
        self.batch.push(sample);
        self.report.samples += 1;

        let stats = self.broadcaster.publish(&line).await;
        trace!(
            line = %line,
            delivered = stats.success,
            evicted = stats.failed,
            batch = self.batch.len(),
            "Published sample"
        );

        true
    }

    /// Hand the batch to the store once it holds `threshold` samples.
    pub fn maybe_flush(&mut self) -> bool {
        if self.batch.len() < self.threshold {
            return false;
        }
        self.dispatch_flush();
        true
    }

    fn dispatch_flush(&mut self) {
        let batch = self.batch.take();
        let records = batch.len();
        let store = self.store.clone();
        let target = self.target.clone();

        self.report.flushes += 1;
        info!(records, target = %target, "Dispatching batch to store");

        self.reap_flushes();
        self.flushes.spawn(async move {
            match store.store(batch, &target).await {
                Ok(receipt) => {
                    info!(
                        records = receipt.records,
                        location = %receipt.location,
                        "Batch stored"
                    );
                }
                Err(e) => {
                    error!(
                        category = %e.category(),
                        error = %e,
                        target = %target,
                        records,
                        "Failed to store batch"
                    );
                }
            }
        });

        if self.flushes.len() > 1 {
            debug!(in_flight = self.flushes.len(), "Flushes overlapping");
        }
    }

    fn reap_flushes(&mut self) {
        while let Some(result) = self.flushes.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "Flush task failed");
            }
        }
    }

    /// Poll until `shutdown` turns `true` (or its sender is dropped), then drain.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PollerReport {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            threshold = self.threshold,
            registers = self.register_count,
            target = %self.target,
            "Poller started"
        );

        while !*shutdown.borrow() {
            self.tick().await;

            let cancelled = tokio::select! {
                _ = tokio::time::sleep(self.interval) => false,
                changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
            };

            self.maybe_flush();

            if cancelled {
                break;
            }
        }

        self.shutdown().await
    }

    /// Stop streaming, settle outstanding batches and report.
    pub async fn shutdown(mut self) -> PollerReport {
        self.report.state = PollerState::Draining;
        info!(pending = self.batch.len(), "Poller draining");

        self.broadcaster.shutdown().await;

        self.join_flushes().await;

        if !self.batch.is_empty() {
            if self.flush_on_shutdown {
                self.dispatch_flush();
                self.join_flushes().await;
            } else {
                warn!(records = self.batch.len(), "Discarding partial batch");
            }
        }

        self.report.state = PollerState::Stopped;
        info!(
            ticks = self.report.ticks,
            failed_reads = self.report.failed_reads,
            samples = self.report.samples,
            flushes = self.report.flushes,
            "Poller stopped"
        );

        self.report
    }

    async fn join_flushes(&mut self) {
        while let Some(result) = self.flushes.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Flush task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeviceError, FrameError, StoreError};
    use crate::store::StoreReceipt;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpStream;

    /// Returns `[call, 0.0]` for each call, failing on the listed call numbers.
    #[derive(Default)]
    struct ScriptedReader {
        calls: AtomicU64,
        failing: Vec<u64>,
    }

    #[async_trait]
    impl RegisterReader for ScriptedReader {
        async fn read_registers(&self, _start: u16, _count: u16) -> Result<Vec<f64>, DeviceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing.contains(&call) {
                return Err(FrameError::ShortFrame { len: 0 }.into());
            }
            Ok(vec![call as f64, 0.0])
        }
    }

    /// Keeps every stored batch. Call `n` sleeps for `delays[n]`, or for the
    /// last listed delay once the list runs out.
    #[derive(Default)]
    struct RecordingStore {
        delays: Vec<Duration>,
        started: AtomicUsize,
        batches: Mutex<Vec<Batch>>,
    }

    impl RecordingStore {
        fn with_delays(delays: &[u64]) -> Self {
            Self {
                delays: delays.iter().copied().map(Duration::from_millis).collect(),
                ..Default::default()
            }
        }

        fn stored(&self) -> usize {
            self.batches.lock().unwrap().len()
        }

        fn first_values(&self) -> Vec<Vec<f64>> {
            let mut batches: Vec<Vec<f64>> = self
                .batches
                .lock()
                .unwrap()
                .iter()
                .map(|b| b.iter().map(|s| s.readings()[0].value()).collect())
                .collect();
            batches.sort_by(|a, b| a[0].total_cmp(&b[0]));
            batches
        }
    }

    #[async_trait]
    impl Store for RecordingStore {
        async fn store(
            &self,
            batch: Batch,
            _target: &StoreTarget,
        ) -> Result<StoreReceipt, StoreError> {
            let call = self.started.fetch_add(1, Ordering::SeqCst);
            let delay = self
                .delays
                .get(call)
                .or(self.delays.last())
                .copied()
                .unwrap_or_default();
            tokio::time::sleep(delay).await;
            let records = batch.len();
            self.batches.lock().unwrap().push(batch);
            Ok(StoreReceipt {
                records,
                location: "memory".to_string(),
            })
        }
    }

    async fn broadcaster() -> Arc<Broadcaster> {
        Arc::new(
            Broadcaster::start("127.0.0.1:0", Duration::from_millis(100))
                .await
                .unwrap(),
        )
    }

    async fn poller(reader: ScriptedReader, store: Arc<RecordingStore>) -> Poller {
        Poller::new(
            Arc::new(reader),
            broadcaster().await,
            store,
            StoreTarget::new("rtd", "readings"),
        )
        .with_registers(0, 2)
        .with_interval(Duration::from_millis(10))
    }

    async fn wait_for_batches(store: &RecordingStore, expected: usize) {
        for _ in 0..100 {
            if store.batches.lock().unwrap().len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_flushes_at_exact_threshold() {
        let store = Arc::new(RecordingStore::default());
        let mut poller = poller(ScriptedReader::default(), store.clone())
            .await
            .with_threshold(3)
            .with_flush_on_shutdown(false);

        let mut flushed_at = Vec::new();
        for tick in 1..=7 {
            assert!(poller.tick().await);
            if poller.maybe_flush() {
                flushed_at.push(tick);
            }
        }

        assert_eq!(flushed_at, vec![3, 6]);
        assert_eq!(poller.batch_len(), 1);

        let report = poller.shutdown().await;
        wait_for_batches(&store, 2).await;

        assert_eq!(report.flushes, 2);
        assert_eq!(report.samples, 7);
        assert_eq!(
            store.first_values(),
            vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]
        );
    }

    #[tokio::test]
    async fn test_read_failures_are_not_fatal() {
        let store = Arc::new(RecordingStore::default());
        let reader = ScriptedReader {
            failing: vec![2],
            ..Default::default()
        };
        let mut poller = poller(reader, store.clone()).await.with_threshold(10);

        let recorded: Vec<bool> = {
            let mut out = Vec::new();
            for _ in 0..4 {
                out.push(poller.tick().await);
            }
            out
        };
        assert_eq!(recorded, vec![true, false, true, true]);

        let report = poller.shutdown().await;
        assert_eq!(report.ticks, 4);
        assert_eq!(report.failed_reads, 1);
        assert_eq!(report.samples, 3);
        assert_eq!(store.first_values(), vec![vec![1.0, 3.0, 4.0]]);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_slow_flush() {
        let store = Arc::new(RecordingStore::with_delays(&[300]));
        let poller = poller(ScriptedReader::default(), store.clone())
            .await
            .with_threshold(2)
            .with_flush_on_shutdown(false);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(shutdown_rx));

        for _ in 0..100 {
            if store.started.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(store.started.load(Ordering::SeqCst) >= 1);
        assert_eq!(store.stored(), 0);
        shutdown_tx.send(true).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.state, PollerState::Stopped);
        assert_eq!(store.stored(), store.started.load(Ordering::SeqCst));
        assert_eq!(store.stored() as u64, report.flushes);
    }

    #[tokio::test]
    async fn test_shutdown_joins_every_overlapping_flush() {
        let store = Arc::new(RecordingStore::with_delays(&[500, 10]));
        let mut poller = poller(ScriptedReader::default(), store.clone())
            .await
            .with_threshold(1)
            .with_flush_on_shutdown(false);

        assert!(poller.tick().await);
        assert!(poller.maybe_flush());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(poller.tick().await);
        assert!(poller.maybe_flush());

        let report = poller.shutdown().await;

        assert_eq!(report.flushes, 2);
        assert_eq!(store.stored(), 2);
        assert_eq!(store.first_values(), vec![vec![1.0], vec![2.0]]);
    }

    #[tokio::test]
    async fn test_run_until_cancelled_flushes_partial_batch() {
        let store = Arc::new(RecordingStore::default());
        let broadcaster = broadcaster().await;
        let poller = Poller::new(
            Arc::new(ScriptedReader::default()),
            broadcaster.clone(),
            store.clone(),
            StoreTarget::new("rtd", "readings"),
        )
        .with_interval(Duration::from_millis(10))
        .with_threshold(1000);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.state, PollerState::Stopped);
        assert!(report.samples >= 1);
        assert_eq!(report.flushes, 1);
        assert!(broadcaster.is_shut_down());

        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len() as u64, report.samples);
    }

    #[tokio::test]
    async fn test_tick_streams_sample_line() {
        let store = Arc::new(RecordingStore::default());
        let broadcaster = broadcaster().await;
        let mut poller = Poller::new(
            Arc::new(ScriptedReader::default()),
            broadcaster.clone(),
            store,
            StoreTarget::new("rtd", "readings"),
        )
        .with_registers(0, 2);

        let client = TcpStream::connect(broadcaster.local_addr()).await.unwrap();
        for _ in 0..100 {
            if broadcaster.subscriber_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(poller.tick().await);

        let mut reader = BufReader::new(client);
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(1), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();

        let fields: Vec<&str> = line.trim_end().split(',').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(&fields[1..], &["1.0", "0.0"]);

        poller.shutdown().await;
    }
}
