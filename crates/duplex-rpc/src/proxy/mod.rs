//! Client-side stubs generated from declarative method signatures.
//!
//! Binding an [`InterfaceDescription`] to a [`Communicator`](crate::Communicator)
//! produces a [`Facade`] holding one [`Stub`] per method. A stub with no
//! declared return values sends a notification; a stub whose last return is
//! `error` sends a request and waits for the reply. Typed wrappers
//! ([`Notifier`], [`Caller`]) sit on top of the dynamic stubs.

mod facade;
mod signature;
mod typed;

pub use facade::{Facade, Stub};
pub use signature::{CallKind, InterfaceDescription, MethodSignature, Parameter};
pub use typed::{Arguments, Caller, Notifier};
