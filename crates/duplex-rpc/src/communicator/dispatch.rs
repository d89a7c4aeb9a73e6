//! Listen loop and inbound dispatch.

use super::Inner;
use crate::error::RpcError;
use crate::message::{Message, Notification, Request, Response, ResponseError};
use serde_json::Value;
use std::sync::{Arc, PoisonError};
use tracing::{debug, info, warn};

impl Inner {
    /// Read frames until the connection becomes unrecoverable.
    pub(super) async fn listen_loop(self: Arc<Self>) {
        info!("Listen loop started");
        loop {
            let generation = self.generation();
            match self.codec.read_message().await {
                Ok(body) => self.dispatch(&body),
                Err(e) if e.is_transport() => {
                    debug!("Read failed: {}", e);
                    if let Err(e) = self.recover_from(generation).await {
                        warn!("Listen loop stopping: {}", e);
                        break;
                    }
                }
                Err(e) => warn!("Dropping inbound frame: {}", e),
            }
        }
        info!("Listen loop stopped");
    }

    fn dispatch(self: &Arc<Self>, body: &[u8]) {
        match Message::unmarshal(body) {
            Ok(Message::Response(response)) => {
                let id = response.id.clone();
                debug!("Response {}", id);
                match self.queue.append(response) {
                    Ok(true) => {}
                    Ok(false) => warn!("Dropping response {}: no caller is waiting for it", id),
                    Err(e) => debug!("Dropping response {}: {}", id, e),
                }
            }
            Ok(Message::Request(request)) => {
                let inner = self.clone();
                tokio::spawn(async move { inner.answer(request).await });
            }
            Ok(Message::Notification(notification)) => {
                let inner = self.clone();
                tokio::spawn(async move { inner.consume(notification).await });
            }
            Err(RpcError::InvalidMessage {
                message,
                id: Some(id),
            }) => {
                warn!("Rejecting invalid message {}: {}", id, message);
                let error = ResponseError::new(ResponseError::INVALID_REQUEST, message);
                let inner = self.clone();
                tokio::spawn(async move { inner.reply(Response::failure(id, error)).await });
            }
            Err(e) => warn!("Dropping malformed message: {}", e),
        }
    }

    fn start_invocation(&self, method: &str, params: Value) -> crate::registry::InvokeFuture {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .invoke(method, params)
    }

    async fn answer(self: Arc<Self>, request: Request) {
        debug!("Serving request {} -> {}", request.id, request.method);
        let pending = self.start_invocation(&request.method, request.params);
        let response = match pending.await {
            Ok(result) => Response::success(request.id, result),
            Err(error) => {
                debug!("Request {} failed: {}", request.method, error.message);
                Response::failure(request.id, error)
            }
        };
        self.reply(response).await;
    }

    async fn consume(self: Arc<Self>, notification: Notification) {
        debug!("Serving notification {}", notification.method);
        let pending = self.start_invocation(&notification.method, notification.params);
        if let Err(error) = pending.await {
            warn!(
                "Notification {} failed: {} (code {})",
                notification.method, error.message, error.code
            );
        }
    }

    async fn reply(self: Arc<Self>, response: Response) {
        let body = match serde_json::to_vec(&response) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to serialize response {}: {}", response.id, e);
                return;
            }
        };
        if let Err(e) = self.send(&body).await {
            warn!("Failed to deliver response {}: {}", response.id, e);
        }
    }
}
