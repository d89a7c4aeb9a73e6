//! Duplex RPC - bidirectional JSON-RPC 2.0 over any duplex byte stream.
//!
//! Two processes each run a [`Communicator`] over one stream (stdio pipes, a
//! TCP socket, a child process). Either side registers methods for the other
//! to call and issues requests and notifications of its own. Messages are
//! framed with `Content-Length`/`Content-Type` headers, responses are matched
//! to callers by id in any order, and a broken transport is reconnected
//! transparently before callers see a failure.
//!
//! # Example
//!
//! ```rust,ignore
//! use duplex_rpc::{Communicator, StreamConnection, TcpConnector};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> duplex_rpc::Result<()> {
//!     let connection = Arc::new(StreamConnection::new(TcpConnector::new("127.0.0.1:9000")));
//!     let communicator = Communicator::new(connection);
//!
//!     communicator.register_method("ping", &[], || async {
//!         Ok::<_, std::convert::Infallible>("pong")
//!     })?;
//!     communicator.listen().await?;
//!
//!     let doubled = communicator
//!         .request("duplicateString", serde_json::json!({"str": "ab"}))
//!         .await?;
//!     println!("{}", doubled);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod coerce;
pub mod communicator;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod proxy;
pub mod queue;
pub mod registry;
pub mod revision;

// Re-export commonly used types
pub use codec::FrameCodec;
pub use coerce::TypeTag;
pub use communicator::{Communicator, CommunicatorBuilder, CommunicatorState, FailureCallback};
pub use config::{CommunicatorConfig, FramingConfig, LinkConfig};
pub use connection::{
    BoxedReader, BoxedWriter, Connection, Connector, ProcessConnector, StaticConnector,
    StreamConnection, TcpConnector,
};
pub use error::{Result, RpcError};
pub use message::{Message, Notification, Request, Response, ResponseError};
pub use proxy::{Caller, Facade, InterfaceDescription, MethodSignature, Notifier, Stub};
pub use queue::{PendingResponse, ResponseQueue};
pub use registry::{Handler, MethodRegistry};
pub use revision::Revision;
