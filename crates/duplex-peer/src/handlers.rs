//! Demo method table served by the peer.

use anyhow::anyhow;
use duplex_rpc::Communicator;
use std::convert::Infallible;
use tracing::info;

/// Register every demo method on `communicator`.
pub fn register(communicator: &Communicator) -> duplex_rpc::Result<()> {
    communicator.register_method("duplicateString", &["str"], duplicate_string)?;
    communicator.register_method("add", &["a", "b"], add)?;
    communicator.register_method("ping", &[], ping)?;
    communicator.register_method("log", &["message"], log)?;
    communicator.register_method("fail", &["message"], fail)?;
    Ok(())
}

async fn duplicate_string(s: String) -> Result<String, Infallible> {
    Ok(format!("{}{}", s, s))
}

async fn add(a: f64, b: f64) -> Result<f64, Infallible> {
    Ok(a + b)
}

async fn ping() -> Result<&'static str, Infallible> {
    Ok("pong")
}

/// Notification-style: callers are not expected to wait.
async fn log(message: String) -> Result<(), Infallible> {
    info!("peer says: {}", message);
    Ok(())
}

async fn fail(message: String) -> Result<(), anyhow::Error> {
    Err(anyhow!(message))
}
