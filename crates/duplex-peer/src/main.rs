//! Duplex Peer - demo JSON-RPC peer process.
//!
//! Serves a small method table over stdio (default), a TCP connection, or the
//! stdio of a spawned child process. Logs always go to stderr so stdout stays
//! free for the stdio transport.

mod handlers;

use anyhow::{anyhow, Result};
use clap::Parser;
use duplex_rpc::{
    Communicator, CommunicatorConfig, Connection, FrameCodec, LinkConfig, ProcessConnector,
    StaticConnector, StreamConnection, TcpConnector,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "duplex-peer")]
#[command(about = "Demo peer for the duplex JSON-RPC runtime")]
struct Args {
    /// Connect to a TCP address (host:port) instead of using stdio
    #[arg(long, conflicts_with = "spawn")]
    connect: Option<String>,

    /// Spawn a program and talk over its stdin/stdout
    #[arg(long, num_args = 1.., value_name = "PROGRAM [ARGS]...", allow_hyphen_values = true)]
    spawn: Vec<String>,

    /// Milliseconds between the starts of two reconnect attempts
    #[arg(long, default_value_t = LinkConfig::DEFAULT_RETRY_TIMEOUT.as_millis() as u64)]
    retry_timeout_ms: u64,

    /// Reconnect attempts before the connection is judged unrecoverable
    #[arg(long, default_value_t = LinkConfig::DEFAULT_RECONNECT_ATTEMPTS)]
    reconnect_attempts: u32,

    /// Call this method on the other side once listening
    #[arg(long)]
    call: Option<String>,

    /// JSON params for --call
    #[arg(long, default_value = "{}", requires = "call")]
    params: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn open_connection(args: &Args) -> Arc<dyn Connection> {
    if let Some(addr) = &args.connect {
        info!("Using TCP transport to {}", addr);
        return Arc::new(StreamConnection::new(TcpConnector::new(addr.clone())));
    }
    if let Some((program, rest)) = args.spawn.split_first() {
        info!("Using child process transport: {}", program);
        return Arc::new(StreamConnection::new(ProcessConnector::new(
            program.clone(),
            rest.to_vec(),
        )));
    }
    info!("Using stdio transport");
    Arc::new(StreamConnection::new(StaticConnector::stdio()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting duplex peer");

    let config = CommunicatorConfig::new()
        .with_retry_timeout(Duration::from_millis(args.retry_timeout_ms))
        .with_reconnect_attempts(args.reconnect_attempts);

    let (lost_tx, mut lost_rx) = tokio::sync::mpsc::unbounded_channel();
    let communicator = Communicator::builder(FrameCodec::new(open_connection(&args)))
        .with_config(config)
        .on_unrecoverable(move |err| {
            let _ = lost_tx.send(err.to_string());
        })
        .build()?;

    handlers::register(&communicator)?;
    communicator.listen().await?;
    info!("Peer listening");

    if let Some(method) = &args.call {
        let params: serde_json::Value = serde_json::from_str(&args.params)?;
        let caller = communicator.clone();
        let method = method.clone();
        tokio::spawn(async move {
            match caller.request(&method, params).await {
                Ok(result) => info!("{} -> {}", method, result),
                Err(e) => error!("{} failed: {}", method, e),
            }
        });
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, exiting");
            communicator.shutdown().await;
            Ok(())
        }
        reason = lost_rx.recv() => {
            communicator.shutdown().await;
            let reason = reason.unwrap_or_else(|| "callback dropped".to_string());
            error!("Connection lost: {}", reason);
            Err(anyhow!("connection lost: {}", reason))
        }
    }
}
