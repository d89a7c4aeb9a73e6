//! Holding area for responses awaiting pickup by correlation id.
//!
//! A caller registers its id with [`ResponseQueue::expect`] before sending the
//! request. The listen loop appends every inbound [`Response`]; responses for
//! ids nobody expects are dropped. Callers blocked in
//! [`ResponseQueue::pick_response_with_id`] rescan after each append. A wake
//! does not mean the caller's id arrived, so picking always rechecks.

use crate::error::{Result, RpcError};
use crate::message::Response;
use crate::revision::Revision;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct QueueState {
    responses: Vec<Response>,
    /// Ids of requests still waiting for a response.
    expected: Vec<Value>,
    closed: bool,
    /// Outdated whenever the contents change or the queue closes.
    revision: Arc<Revision>,
}

/// Thread-safe, closeable set of unclaimed responses.
#[derive(Debug, Default)]
pub struct ResponseQueue {
    state: Mutex<QueueState>,
}

impl ResponseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in the response with `id`.
    ///
    /// The interest lasts until the response is picked or the returned
    /// handle is dropped, whichever comes first.
    pub fn expect(&self, id: Value) -> PendingResponse<'_> {
        self.lock().expected.push(id.clone());
        PendingResponse { queue: self, id }
    }

    /// Store a response and wake every waiting picker.
    ///
    /// Returns `Ok(false)` and drops the response if no caller expects its
    /// id. Fails with [`RpcError::QueueClosed`] if the queue is closed; the
    /// response is dropped.
    pub fn append(&self, response: Response) -> Result<bool> {
        let outdated = {
            let mut state = self.lock();
            if state.closed {
                return Err(RpcError::QueueClosed);
            }
            if !state.expected.contains(&response.id) {
                return Ok(false);
            }
            state.responses.push(response);
            std::mem::take(&mut state.revision)
        };
        outdated.set_outdated();
        Ok(true)
    }

    /// Wait for the response with `id` and claim it.
    pub async fn pick_response_with_id(&self, id: &Value) -> Result<Response> {
        loop {
            let revision = {
                let mut state = self.lock();
                if state.closed {
                    return Err(RpcError::QueueClosed);
                }
                if let Some(pos) = state.responses.iter().position(|r| &r.id == id) {
                    state.expected.retain(|expected| expected != id);
                    return Ok(state.responses.swap_remove(pos));
                }
                state.revision.clone()
            };
            revision.wait_until_outdated().await;
        }
    }

    /// Drop interest in `id` along with any unclaimed response for it.
    fn forget(&self, id: &Value) {
        let mut state = self.lock();
        state.expected.retain(|expected| expected != id);
        state.responses.retain(|response| &response.id != id);
    }

    /// Close the queue, discard pending responses and fail every picker.
    pub fn close(&self) {
        let outdated = {
            let mut state = self.lock();
            state.closed = true;
            state.responses.clear();
            std::mem::take(&mut state.revision)
        };
        outdated.set_outdated();
    }

    /// Accept responses again. Nothing discarded by `close` comes back.
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of unclaimed responses.
    pub fn len(&self) -> usize {
        self.lock().responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ids still waiting for a response.
    pub fn expected_len(&self) -> usize {
        self.lock().expected.len()
    }
}

/// Interest in one response id, released on drop.
#[derive(Debug)]
pub struct PendingResponse<'a> {
    queue: &'a ResponseQueue,
    id: Value,
}

impl PendingResponse<'_> {
    pub fn id(&self) -> &Value {
        &self.id
    }

    /// Wait for the expected response and claim it.
    pub async fn wait(&self) -> Result<Response> {
        self.queue.pick_response_with_id(&self.id).await
    }
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        self.queue.forget(&self.id);
    }
}
