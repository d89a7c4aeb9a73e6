//! Shared helpers for the communicator and proxy integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use duplex_rpc::{
    BoxedReader, BoxedWriter, Communicator, CommunicatorConfig, Connection, Connector,
    FrameCodec, RpcError, StaticConnector, StreamConnection,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::DuplexStream;

pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Unconnected connection over one end of a duplex pipe.
pub fn pipe_connection(stream: DuplexStream) -> Arc<dyn Connection> {
    let (reader, writer) = tokio::io::split(stream);
    Arc::new(StreamConnection::new(StaticConnector::new(reader, writer)))
}

/// Recovery settings that keep tests fast.
pub fn fast_config(attempts: u32) -> CommunicatorConfig {
    CommunicatorConfig::new()
        .with_retry_timeout(Duration::from_millis(10))
        .with_reconnect_attempts(attempts)
}

/// Two communicators wired to each other. Neither is listening yet.
pub fn communicator_pair() -> (Communicator, Communicator) {
    let (left, right) = tokio::io::duplex(PIPE_CAPACITY);
    (
        Communicator::new(pipe_connection(left)),
        Communicator::new(pipe_connection(right)),
    )
}

/// The far end of a communicator's pipe, driven frame by frame.
pub struct RawPeer {
    codec: FrameCodec,
}

impl RawPeer {
    pub async fn connect(stream: DuplexStream) -> Self {
        let connection = pipe_connection(stream);
        connection.connect().await.expect("raw peer connect");
        Self {
            codec: FrameCodec::new(connection),
        }
    }

    pub async fn read_json(&self) -> Value {
        let body = self.codec.read_message().await.expect("raw peer read");
        serde_json::from_slice(&body).expect("raw peer frame is JSON")
    }

    pub async fn write_json(&self, value: &Value) {
        let body = serde_json::to_vec(value).expect("serialize frame");
        self.codec.write_message(&body).await.expect("raw peer write");
    }

    pub async fn write_raw(&self, body: &[u8]) {
        self.codec.write_message(body).await.expect("raw peer write");
    }
}

/// A communicator (not yet listening) and a raw peer on the other end.
pub async fn communicator_with_raw_peer() -> (Communicator, RawPeer) {
    let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
    let communicator = Communicator::new(pipe_connection(local));
    (communicator, RawPeer::connect(remote).await)
}

/// One scripted `connect` outcome.
pub enum Step {
    Connect(DuplexStream),
    /// Fails with a recoverable error.
    Fail,
    /// Fails with an error marked non-recoverable.
    Fatal,
}

impl From<Option<DuplexStream>> for Step {
    fn from(step: Option<DuplexStream>) -> Self {
        match step {
            Some(stream) => Step::Connect(stream),
            None => Step::Fail,
        }
    }
}

/// Connector that replays a script: `Some(stream)` connects, `None` fails
/// with a recoverable error. An exhausted script keeps failing.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new<S: Into<Step>>(script: impl IntoIterator<Item = S>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Into::into).collect()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, step: impl Into<Step>) {
        self.script.lock().unwrap().push_back(step.into());
    }

    /// Number of `connect` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> duplex_rpc::Result<(BoxedReader, BoxedWriter)> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Fail);
        match step {
            Step::Connect(stream) => {
                let (reader, writer) = tokio::io::split(stream);
                Ok((Box::new(reader), Box::new(writer)))
            }
            Step::Fail => Err(RpcError::Connect {
                message: format!("scripted failure on attempt {}", attempt),
                recoverable: true,
            }),
            Step::Fatal => Err(RpcError::Connect {
                message: format!("scripted fatal failure on attempt {}", attempt),
                recoverable: false,
            }),
        }
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
