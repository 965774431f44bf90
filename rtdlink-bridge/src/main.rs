//! RTD telemetry bridge.
//!
//! Reads the sensor array on a fixed cadence, streams readings to TCP
//! subscribers and stores history batches.

use anyhow::Result;
use clap::Parser;
use rtdlink_bridge::{BridgeArgs, run_bridge};

#[tokio::main]
async fn main() -> Result<()> {
    run_bridge(BridgeArgs::parse()).await
}
