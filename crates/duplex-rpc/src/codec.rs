//! Header-framed message codec.
//!
//! Every message on the wire is a header block terminated by a blank line,
//! followed by exactly `Content-Length` bytes of body:
//!
//! ```text
//! Content-Length: <N>\r\n
//! Content-Type: <media-type>\r\n
//! \r\n
//! <N bytes of body>
//! ```
//!
//! The codec treats the body as opaque bytes. On read it checks the declared
//! content type (or the configured default when the header is absent) against
//! the set of accepted media types; a rejected frame's body is drained so the
//! stream stays aligned, but it is never delivered.

use crate::config::FramingConfig;
use crate::connection::Connection;
use crate::error::{Result, RpcError};
use bytes::{Buf, BytesMut};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;
use tracing::debug;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Default)]
struct ReadState {
    buf: BytesMut,
    /// Body bytes of a rejected frame still to be discarded.
    skip: usize,
    /// Bumped by `reset`; bytes read under an older generation are dropped.
    generation: u64,
}

#[derive(Debug)]
struct FrameHeader {
    content_length: usize,
    content_type: Option<String>,
}

/// Reads and writes whole messages on a [`Connection`].
pub struct FrameCodec {
    connection: Arc<dyn Connection>,
    content_type: String,
    default_content_type: String,
    accepted_types: Vec<String>,
    max_message_size: usize,
    read_state: StdMutex<ReadState>,
    write_lock: Mutex<()>,
}

impl FrameCodec {
    /// Create a codec that declares and accepts `application/json`.
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            content_type: FramingConfig::DEFAULT_CONTENT_TYPE.to_string(),
            default_content_type: FramingConfig::DEFAULT_CONTENT_TYPE.to_string(),
            accepted_types: vec![FramingConfig::DEFAULT_CONTENT_TYPE.to_string()],
            max_message_size: FramingConfig::MAX_MESSAGE_SIZE,
            read_state: StdMutex::new(ReadState::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Set the media type declared on written frames.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Set the media types accepted on read.
    pub fn with_accepted_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the media type assumed when a frame has no `Content-Type` header.
    pub fn with_default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.default_content_type = content_type.into();
        self
    }

    /// Set the largest body accepted on read.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// The connection this codec frames.
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Write one message. Concurrent writers never interleave.
    pub async fn write_message(&self, body: &[u8]) -> Result<()> {
        let header = format!(
            "Content-Length: {}\r\nContent-Type: {}\r\n\r\n",
            body.len(),
            self.content_type
        );
        let mut frame = Vec::with_capacity(header.len() + body.len());
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(body);

        let _guard = self.write_lock.lock().await;
        self.connection.write(&frame).await?;
        Ok(())
    }

    /// Read the next message body.
    ///
    /// Protocol errors (bad header, rejected content type, oversized frame)
    /// leave the stream positioned at the next frame, so the caller may keep
    /// reading.
    pub async fn read_message(&self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; FramingConfig::READ_CHUNK_SIZE];
        loop {
            let generation = {
                let mut state = self.lock_read_state();
                if let Some(outcome) = self.take_frame(&mut state) {
                    return outcome;
                }
                state.generation
            };

            let n = self.connection.read(&mut chunk).await?;
            if n == 0 {
                return Err(RpcError::ConnectionClosed);
            }

            let mut state = self.lock_read_state();
            if state.generation == generation {
                state.buf.extend_from_slice(&chunk[..n]);
            } else {
                debug!("Discarding {} bytes read before codec reset", n);
            }
        }
    }

    /// Discard any buffered partial frame.
    pub fn reset(&self) {
        let mut state = self.lock_read_state();
        state.buf.clear();
        state.skip = 0;
        state.generation = state.generation.wrapping_add(1);
    }

    fn lock_read_state(&self) -> std::sync::MutexGuard<'_, ReadState> {
        self.read_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Try to cut one frame from the buffer. `None` means more bytes are needed.
    fn take_frame(&self, state: &mut ReadState) -> Option<Result<Vec<u8>>> {
        if state.skip > 0 {
            let n = state.skip.min(state.buf.len());
            state.buf.advance(n);
            state.skip -= n;
            if state.skip > 0 {
                return None;
            }
        }

        let Some(header_end) = find_header_end(&state.buf) else {
            if state.buf.len() > FramingConfig::MAX_HEADER_SIZE {
                state.buf.clear();
                return Some(Err(RpcError::protocol(format!(
                    "header block exceeds {} bytes",
                    FramingConfig::MAX_HEADER_SIZE
                ))));
            }
            return None;
        };

        let header = match parse_header(&state.buf[..header_end]) {
            Ok(header) => header,
            Err(e) => {
                state.buf.advance(header_end);
                return Some(Err(e));
            }
        };
        let length = header.content_length;

        if length > self.max_message_size {
            state.buf.advance(header_end);
            state.skip = length;
            return Some(Err(RpcError::FrameTooLarge {
                size: length,
                max: self.max_message_size,
            }));
        }

        let content_type = header
            .content_type
            .unwrap_or_else(|| self.default_content_type.clone());
        if !self.accepts(&content_type) {
            state.buf.advance(header_end);
            state.skip = length;
            return Some(Err(RpcError::UnacceptableContentType { content_type }));
        }

        if state.buf.len() < header_end + length {
            return None;
        }

        state.buf.advance(header_end);
        Some(Ok(state.buf.split_to(length).to_vec()))
    }

    fn accepts(&self, content_type: &str) -> bool {
        let media = media_type(content_type);
        self.accepted_types
            .iter()
            .any(|accepted| media_type(accepted).eq_ignore_ascii_case(media))
    }
}

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

/// Offset just past the blank line ending the header block.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

fn parse_header(block: &[u8]) -> Result<FrameHeader> {
    let text = std::str::from_utf8(block)
        .map_err(|_| RpcError::protocol("header block is not valid UTF-8"))?;

    let mut content_length = None;
    let mut content_type = None;

    for line in text.split("\r\n").filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RpcError::protocol(format!("malformed header line: {:?}", line)))?;
        let value = value.trim();

        if name.trim().eq_ignore_ascii_case("content-length") {
            let length = value.parse::<usize>().map_err(|_| {
                RpcError::protocol(format!("invalid Content-Length: {:?}", value))
            })?;
            content_length = Some(length);
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        }
    }

    let content_length =
        content_length.ok_or_else(|| RpcError::protocol("missing Content-Length header"))?;

    Ok(FrameHeader {
        content_length,
        content_type,
    })
}
