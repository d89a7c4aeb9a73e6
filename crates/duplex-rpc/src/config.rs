//! Centralized configuration for the RPC runtime.
//!
//! Framing limits and reconnection defaults live here as constants; the
//! per-instance knobs a [`Communicator`](crate::Communicator) consumes are
//! collected in [`CommunicatorConfig`].

use crate::error::{Result, RpcError};
use std::time::Duration;

/// Message framing limits and defaults.
pub struct FramingConfig;

impl FramingConfig {
    pub const DEFAULT_CONTENT_TYPE: &'static str = "application/json";
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const MAX_HEADER_SIZE: usize = 8 * 1024;
    pub const READ_CHUNK_SIZE: usize = 8192;
}

/// Reconnection defaults.
pub struct LinkConfig;

impl LinkConfig {
    pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(1);
    pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
}

/// Recovery settings for a single communicator.
#[derive(Debug, Clone)]
pub struct CommunicatorConfig {
    /// Time between the starts of two consecutive reconnect attempts.
    pub retry_timeout: Duration,
    /// Number of `connect` attempts before the link is judged unrecoverable.
    pub reconnect_attempts: u32,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            retry_timeout: LinkConfig::DEFAULT_RETRY_TIMEOUT,
            reconnect_attempts: LinkConfig::DEFAULT_RECONNECT_ATTEMPTS,
        }
    }
}

impl CommunicatorConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay between reconnect attempts.
    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    /// Set the number of reconnect attempts.
    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    /// Reject settings the recovery loop cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_attempts == 0 {
            return Err(RpcError::config(
                "reconnect_attempts must be a positive integer",
            ));
        }
        Ok(())
    }
}
