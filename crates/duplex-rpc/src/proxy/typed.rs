//! Statically typed stubs.
//!
//! A [`Notifier<A>`] or [`Caller<A, R>`] wraps a [`Stub`] whose declared
//! arity and call kind were checked against `A` when it was created. `A` is a
//! tuple of serializable arguments, `R` the deserializable result.
//!
//! ```rust,ignore
//! let duplicate: Caller<(String,), String> = facade.caller("duplicateString")?;
//! assert_eq!(duplicate.call(("ab".into(),)).await?, "abab");
//! ```

use super::facade::Stub;
use super::signature::CallKind;
use crate::coerce::decode;
use crate::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

/// A tuple of call arguments.
pub trait Arguments: Send {
    const ARITY: usize;

    fn into_values(self) -> Result<Vec<Value>>;
}

macro_rules! impl_arguments {
    ($arity:literal; $($arg:ident),*) => {
        impl<$($arg: Serialize + Send,)*> Arguments for ($($arg,)*) {
            const ARITY: usize = $arity;

            #[allow(non_snake_case)]
            fn into_values(self) -> Result<Vec<Value>> {
                let ($($arg,)*) = self;
                Ok(vec![$(serde_json::to_value($arg)?),*])
            }
        }
    };
}

impl_arguments!(0;);
impl_arguments!(1; A1);
impl_arguments!(2; A1, A2);
impl_arguments!(3; A1, A2, A3);
impl_arguments!(4; A1, A2, A3, A4);
impl_arguments!(5; A1, A2, A3, A4, A5);
impl_arguments!(6; A1, A2, A3, A4, A5, A6);

fn check_arity<A: Arguments>(stub: &Stub) -> Result<()> {
    if A::ARITY != stub.arity() {
        return Err(RpcError::config(format!(
            "method {} declares {} parameters but the typed stub takes {}",
            stub.name(),
            stub.arity(),
            A::ARITY
        )));
    }
    Ok(())
}

/// Typed handle for a method declared without return values.
#[derive(Debug, Clone)]
pub struct Notifier<A> {
    stub: Stub,
    _args: PhantomData<fn(A)>,
}

impl<A: Arguments> Notifier<A> {
    pub fn new(stub: Stub) -> Result<Self> {
        check_arity::<A>(&stub)?;
        if *stub.kind() != CallKind::Notify {
            return Err(RpcError::config(format!(
                "method {} returns values; use a caller",
                stub.name()
            )));
        }
        Ok(Self {
            stub,
            _args: PhantomData,
        })
    }

    /// Send the notification. Returns once the frame is written.
    pub async fn notify(&self, args: A) -> Result<()> {
        self.stub.call(args.into_values()?).await?;
        Ok(())
    }
}

/// Typed handle for a method declared with a trailing error return.
#[derive(Debug, Clone)]
pub struct Caller<A, R> {
    stub: Stub,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A: Arguments, R: DeserializeOwned> Caller<A, R> {
    pub fn new(stub: Stub) -> Result<Self> {
        check_arity::<A>(&stub)?;
        if *stub.kind() == CallKind::Notify {
            return Err(RpcError::config(format!(
                "method {} has no error return; use a notifier",
                stub.name()
            )));
        }
        Ok(Self {
            stub,
            _marker: PhantomData,
        })
    }

    /// Call the method and decode its result into `R`.
    pub async fn call(&self, args: A) -> Result<R> {
        let value = self.stub.call(args.into_values()?).await?;
        decode(value)
    }
}
