//! Device client: one TCP connection per register read.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, trace};

use crate::config::DeviceConfig;
use crate::error::DeviceError;
use crate::frame::{self, READ_INPUT_REGISTERS, RequestFrame};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default overall read timeout for a response.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

const CHUNK_SIZE: usize = 1024;

/// Source of register values for the poller.
#[async_trait]
pub trait RegisterReader: Send + Sync {
    /// Read `count` input registers starting at `start_address`, scaled to engineering units.
    async fn read_registers(&self, start_address: u16, count: u16)
    -> Result<Vec<f64>, DeviceError>;
}

/// Client for a device behind a serial-over-TCP bridge.
///
/// Each call opens its own connection, so a failed read never affects the
/// next one.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    addr: String,
    unit_id: u8,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl DeviceClient {
    /// Create a client with the default timeouts.
    pub fn new(addr: impl Into<String>, unit_id: u8) -> Self {
        Self {
            addr: addr.into(),
            unit_id,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.address(), config.unit_id).with_timeouts(
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.read_timeout_ms),
        )
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, read_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Read input registers: connect, send, collect, validate, decode.
    pub async fn read_registers(
        &self,
        start_address: u16,
        count: u16,
    ) -> Result<Vec<f64>, DeviceError> {
        let request = RequestFrame::read_input_registers(self.unit_id, start_address, count);

        let mut stream = self.connect().await?;
        stream
            .write_all(&request.encode())
            .await
            .map_err(|source| DeviceError::Io {
                addr: self.addr.clone(),
                source,
            })?;

        let response = self.receive(&mut stream).await?;
        drop(stream);

        trace!(addr = %self.addr, bytes = response.len(), "Received response");

        let frame = frame::validate_response(&response, self.unit_id, READ_INPUT_REGISTERS, count)?;
        Ok(frame.registers(usize::from(count)))
    }

    async fn connect(&self) -> Result<TcpStream, DeviceError> {
        match timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(DeviceError::Connect {
                addr: self.addr.clone(),
                source,
            }),
            Err(_) => Err(DeviceError::ConnectTimeout {
                addr: self.addr.clone(),
                timeout: self.connect_timeout,
            }),
        }
    }

    /// Collect response bytes until the announced frame is complete, the peer
    /// closes, or the read deadline passes. Partial data is returned as-is.
    async fn receive(&self, stream: &mut TcpStream) -> Result<Vec<u8>, DeviceError> {
        let deadline = Instant::now() + self.read_timeout;
        let mut buffer = Vec::with_capacity(64);
        let mut chunk = [0u8; CHUNK_SIZE];

        loop {
            match timeout_at(deadline, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if frame::is_complete(&buffer) {
                        break;
                    }
                }
                Ok(Err(source)) => {
                    return Err(DeviceError::Io {
                        addr: self.addr.clone(),
                        source,
                    });
                }
                Err(_) => {
                    debug!(
                        addr = %self.addr,
                        received = buffer.len(),
                        "Read timeout, validating partial response"
                    );
                    break;
                }
            }
        }

        Ok(buffer)
    }
}

#[async_trait]
impl RegisterReader for DeviceClient {
    async fn read_registers(
        &self,
        start_address: u16,
        count: u16,
    ) -> Result<Vec<f64>, DeviceError> {
        DeviceClient::read_registers(self, start_address, count).await
    }
}
