//! Reconnect state machine.
//!
//! A failed read or write reports the recovery generation it observed before
//! failing. If another task already replaced that connection the caller simply
//! retries; if a reconnect is running it waits on the shared revision;
//! otherwise it leads the reconnect itself.
//!
//! Leadership is released however the leading future ends. A shutdown
//! abandons the running reconnect, and its waiters fail with
//! [`RpcError::NotListening`].

use super::{Communicator, CommunicatorState, Inner};
use crate::error::{Result, RpcError};
use crate::revision::Revision;
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub(super) struct RecoveryState {
    /// Bumped after every successful reconnect.
    generation: u64,
    /// The reconnect sequence currently running, if any.
    in_progress: Option<Arc<Lease>>,
    unrecoverable: bool,
}

/// Claim on the running reconnect sequence.
#[derive(Debug, Default)]
pub(super) struct Lease {
    /// Outdated when the sequence finishes, fails or is abandoned.
    done: Revision,
    /// Outdated to stop the sequence early.
    cancel: Revision,
}

enum Role {
    Lead(Arc<Lease>),
    Wait(Arc<Lease>),
}

/// Releases the lease however the leading future ends, including when it is
/// dropped mid-reconnect.
struct Leadership<'a> {
    inner: &'a Inner,
    lease: Arc<Lease>,
}

impl Leadership<'_> {
    fn holds(&self, state: &RecoveryState) -> bool {
        state
            .in_progress
            .as_ref()
            .is_some_and(|lease| Arc::ptr_eq(lease, &self.lease))
    }

    /// Record the outcome unless the lease was taken away meanwhile.
    fn commit(&self, apply: impl FnOnce(&mut RecoveryState)) -> bool {
        let mut state = self.inner.lock_recovery();
        if !self.holds(&state) {
            return false;
        }
        state.in_progress = None;
        apply(&mut state);
        true
    }
}

impl Drop for Leadership<'_> {
    fn drop(&mut self) {
        let abandoned = {
            let mut state = self.inner.lock_recovery();
            let held = self.holds(&state);
            if held {
                state.in_progress = None;
            }
            held
        };
        if abandoned {
            warn!("Recovery abandoned before it finished");
        }
        self.lease.done.set_outdated();
    }
}

impl Inner {
    fn lock_recovery(&self) -> MutexGuard<'_, RecoveryState> {
        self.recovery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn generation(&self) -> u64 {
        self.lock_recovery().generation
    }

    pub(super) fn is_unrecoverable(&self) -> bool {
        self.lock_recovery().unrecoverable
    }

    /// `Recovering` or `Unrecoverable` when either applies.
    pub(super) fn recovery_state(&self) -> Option<CommunicatorState> {
        let state = self.lock_recovery();
        if state.unrecoverable {
            Some(CommunicatorState::Unrecoverable)
        } else if state.in_progress.is_some() {
            Some(CommunicatorState::Recovering)
        } else {
            None
        }
    }

    /// Stop the running reconnect sequence and release everyone waiting on it.
    pub(super) fn abandon_recovery(&self) {
        let lease = self.lock_recovery().in_progress.take();
        if let Some(lease) = lease {
            debug!("Abandoning in-flight recovery");
            lease.cancel.set_outdated();
            lease.done.set_outdated();
        }
    }

    /// Recover from a failure seen while `observed` was the current generation.
    ///
    /// Returns `Ok` once a usable connection is in place,
    /// [`RpcError::Unrecoverable`] if the reconnect sequence gave up, or
    /// [`RpcError::NotListening`] if it was abandoned by a shutdown.
    pub(super) async fn recover_from(&self, observed: u64) -> Result<()> {
        let role = {
            let mut state = self.lock_recovery();
            if state.unrecoverable {
                return Err(RpcError::Unrecoverable);
            }
            if state.generation != observed {
                return Ok(());
            }
            match &state.in_progress {
                Some(lease) => Role::Wait(lease.clone()),
                None => {
                    let lease = Arc::new(Lease::default());
                    state.in_progress = Some(lease.clone());
                    Role::Lead(lease)
                }
            }
        };

        match role {
            Role::Wait(lease) => {
                debug!("Waiting for in-flight recovery");
                lease.done.wait_until_outdated().await;
                let state = self.lock_recovery();
                if state.unrecoverable {
                    Err(RpcError::Unrecoverable)
                } else if state.generation != observed {
                    Ok(())
                } else {
                    Err(RpcError::NotListening)
                }
            }
            Role::Lead(lease) => self.lead_recovery(lease).await,
        }
    }

    async fn lead_recovery(&self, lease: Arc<Lease>) -> Result<()> {
        let leadership = Leadership {
            inner: self,
            lease: lease.clone(),
        };

        info!("Connection lost, starting recovery");
        let outcome = if self.connection.is_recoverable() {
            if let Err(e) = self.connection.close().await {
                debug!("Error closing broken connection: {}", e);
            }
            tokio::select! {
                biased;
                _ = lease.cancel.wait_until_outdated() => {
                    info!("Recovery cancelled");
                    return Err(RpcError::NotListening);
                }
                outcome = self.reconnect() => outcome,
            }
        } else {
            Err(RpcError::Connect {
                message: "transport does not support reconnecting".to_string(),
                recoverable: false,
            })
        };

        let committed = leadership.commit(|state| match &outcome {
            Ok(()) => state.generation = state.generation.wrapping_add(1),
            Err(_) => state.unrecoverable = true,
        });
        if !committed {
            info!("Recovery cancelled");
            if outcome.is_ok() {
                if let Err(e) = self.connection.close().await {
                    debug!("Error closing connection after cancelled recovery: {}", e);
                }
            }
            return Err(RpcError::NotListening);
        }

        // Waiters are released when `leadership` drops, after the outcome
        // is in place.
        match outcome {
            Ok(()) => {
                self.queue.reopen();
                info!("Connection recovered");
                Ok(())
            }
            Err(e) => {
                error!("Connection unrecoverable: {}", e);
                self.queue.close();
                if let Err(e) = self.connection.close().await {
                    debug!("Error closing unrecoverable connection: {}", e);
                }
                if let Some(callback) = &self.on_unrecoverable {
                    callback(&e);
                }
                Err(RpcError::Unrecoverable)
            }
        }
    }

    /// Open the connection for the first time, with the same retry policy as
    /// recovery.
    pub(super) async fn establish(&self) -> Result<()> {
        self.reconnect().await?;
        self.queue.reopen();
        Ok(())
    }

    /// Up to `reconnect_attempts` connects, started `retry_timeout` apart.
    async fn reconnect(&self) -> Result<()> {
        let attempts = self.config.reconnect_attempts;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let started = Instant::now();
            // Drop anything buffered from the previous stream before new bytes
            // can arrive.
            self.codec.reset();

            match self.connection.connect().await {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Connected on attempt {}/{}", attempt, attempts);
                    }
                    return Ok(());
                }
                Err(e) if !e.is_recoverable() => {
                    warn!("Connect attempt {}/{} failed permanently: {}", attempt, attempts, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Connect attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                tokio::time::sleep_until(started + self.config.retry_timeout).await;
            }
        }

        Err(last_error.unwrap_or(RpcError::Unrecoverable))
    }
}

impl Communicator {
    /// Leave the unrecoverable state and resume service.
    ///
    /// Reconnects if the connection is down, reopens the response queue and
    /// restarts the listen loop if it stopped. Fails if the reconnect fails;
    /// the communicator is then unrecoverable again.
    pub async fn recover(&self) -> Result<()> {
        info!("Explicit recovery requested");
        if self.inner.is_unrecoverable() {
            // The old loop exits on its own while the flag is still set.
            if let Some(handle) = self.inner.take_listener() {
                let _ = handle.await;
            }
            self.inner.lock_recovery().unrecoverable = false;
        }

        if !self.inner.connection.is_connected() {
            let generation = self.inner.generation();
            self.inner.recover_from(generation).await?;
        }
        self.inner.spawn_listener();
        Ok(())
    }
}
