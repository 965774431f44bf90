//! Prints the live reading stream of a running bridge.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Subscribe to an rtdlink stream and print each line.
#[derive(Parser, Debug)]
#[command(name = "rtdlink-tail")]
#[command(version)]
struct Args {
    /// Stream address of the bridge.
    #[arg(short, long, default_value = "127.0.0.1:5050")]
    addr: String,

    /// Connect timeout in seconds.
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let stream = tokio::time::timeout(
        Duration::from_secs(args.timeout),
        TcpStream::connect(&args.addr),
    )
    .await
    .with_context(|| format!("Timed out connecting to {}", args.addr))?
    .with_context(|| format!("Failed to connect to {}", args.addr))?;

    info!(addr = %args.addr, "Connected");

    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => println!("{}", line),
                Ok(None) => {
                    info!("Stream closed by bridge");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Stream read failed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}
