//! RTD telemetry bridge.
//!
//! Polls an RTD sensor array behind a serial-over-TCP tunnel using the
//! Modbus RTU "read input registers" function, streams every sample as a
//! CSV line to TCP subscribers and hands fixed-size batches to a store.
//!
//! - [`frame`] - RTU request/response framing and CRC16
//! - [`client`] - One-connection-per-read device client
//! - [`broadcaster`] - Line fan-out to stream subscribers
//! - [`poller`] - Sampling loop, batching and shutdown drain
//! - [`store`] - Batch persistence
//! - [`runner`] - Process lifecycle
//!
//! # Stream format
//!
//! ```text
//! 2024-01-15 10:00:05,21.5,22.0,19.9,0.0
//! ```
//!
//! One line per sample, `timestamp` first, then one column per channel. No
//! header is sent.

pub mod args;
pub mod broadcaster;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod poller;
pub mod runner;
pub mod store;

pub use args::BridgeArgs;
pub use broadcaster::{Broadcaster, PublishStats};
pub use client::{DeviceClient, RegisterReader};
pub use config::BridgeConfig;
pub use error::{BridgeError, DeviceError, ErrorCategory, FrameError, Result};
pub use poller::{Poller, PollerReport, PollerState};
pub use runner::{BridgeRunner, run_bridge};
pub use store::{DiscardStore, FileStore, Store, StoreReceipt, StoreTarget};
