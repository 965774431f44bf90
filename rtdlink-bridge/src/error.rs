//! Error types for the bridge.
//!
//! Every error that is reported rather than propagated carries an
//! [`ErrorCategory`] so logs can be filtered by failure class.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure classes used in structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport connect/timeout/I/O toward the device or the store.
    Connectivity,
    /// Short frame or checksum mismatch.
    FrameIntegrity,
    /// Unexpected unit id, function code or byte count.
    ProtocolMismatch,
    /// Write failure toward a stream subscriber.
    SubscriberIo,
    /// Batch could not be persisted.
    Store,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Connectivity => "connectivity",
            ErrorCategory::FrameIntegrity => "frame_integrity",
            ErrorCategory::ProtocolMismatch => "protocol_mismatch",
            ErrorCategory::SubscriberIo => "subscriber_io",
            ErrorCategory::Store => "store",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response frame validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Response too short: {len} bytes")]
    ShortFrame { len: usize },

    #[error("CRC mismatch: expected {expected:#06x}, received {received:#06x}")]
    ChecksumMismatch { expected: u16, received: u16 },

    #[error(
        "Unexpected unit or function code: expected {expected_unit}/{expected_function}, received {unit}/{function}"
    )]
    UnitOrFunctionMismatch {
        expected_unit: u8,
        expected_function: u8,
        unit: u8,
        function: u8,
    },

    #[error("Unexpected byte count {received} (expected {expected})")]
    ByteCountMismatch { expected: usize, received: usize },
}

impl FrameError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FrameError::ShortFrame { .. } | FrameError::ChecksumMismatch { .. } => {
                ErrorCategory::FrameIntegrity
            }
            FrameError::UnitOrFunctionMismatch { .. } | FrameError::ByteCountMismatch { .. } => {
                ErrorCategory::ProtocolMismatch
            }
        }
    }
}

/// Errors from a single device read.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl DeviceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DeviceError::ConnectTimeout { .. }
            | DeviceError::Connect { .. }
            | DeviceError::Io { .. } => ErrorCategory::Connectivity,
            DeviceError::Frame(e) => e.category(),
        }
    }

    /// The frame validation failure, if this was one.
    pub fn frame_error(&self) -> Option<&FrameError> {
        match self {
            DeviceError::Frame(e) => Some(e),
            _ => None,
        }
    }
}

/// Delivery failure toward one stream subscriber.
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("Subscriber {peer} closed the connection")]
    Closed { peer: SocketAddr },

    #[error("Write to subscriber {peer} failed: {source}")]
    Write {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Write to subscriber {peer} timed out after {timeout:?}")]
    WriteTimeout { peer: SocketAddr, timeout: Duration },
}

impl SubscriberError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::SubscriberIo
    }
}

/// Failures while persisting a batch.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to encode batch: {0}")]
    Encode(#[from] rtdlink_common::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StoreError::Encode(_) => ErrorCategory::Store,
            StoreError::Io { .. } => ErrorCategory::Connectivity,
        }
    }
}

/// Errors that stop the bridge from starting.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Stream listener could not be bound.
    #[error("Failed to bind stream listener to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Logging could not be initialized.
    #[error("Logging error: {0}")]
    Logging(String),

    /// A background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<rtdlink_common::Error> for BridgeError {
    fn from(err: rtdlink_common::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}
