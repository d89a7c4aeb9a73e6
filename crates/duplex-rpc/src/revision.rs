//! One-shot broadcast used to wake blocked tasks exactly once.
//!
//! A [`Revision`] starts current. Any number of tasks may wait for it to
//! become outdated; [`Revision::set_outdated`] releases every task waiting at
//! that moment and flips the instance permanently. A fresh generation needs a
//! fresh `Revision`.

use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct RevisionState {
    outdated: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

/// One-shot, multi-waiter broadcast primitive.
#[derive(Debug, Default)]
pub struct Revision {
    state: Mutex<RevisionState>,
}

impl Revision {
    /// Create a revision that is not yet outdated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until [`set_outdated`](Self::set_outdated) has been called.
    ///
    /// Returns immediately if the revision is already outdated.
    pub async fn wait_until_outdated(&self) {
        let rx = {
            // Checking the flag and registering must happen under one lock.
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.outdated {
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            rx
        };
        // A dropped sender also means the revision is gone; treat it as outdated.
        let _ = rx.await;
    }

    /// Mark the revision outdated and release every registered waiter.
    ///
    /// Returns the number of waiters released. Calling it again is a no-op
    /// that releases nobody.
    pub fn set_outdated(&self) -> usize {
        let waiters = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.outdated {
                return 0;
            }
            state.outdated = true;
            std::mem::take(&mut state.waiters)
        };

        let released = waiters.len();
        for waiter in waiters {
            // The receiving task may have been cancelled.
            let _ = waiter.send(());
        }
        released
    }

    /// Check whether the revision has been outdated.
    pub fn is_outdated(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outdated
    }

    /// Number of tasks currently blocked on this revision.
    pub fn waiter_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waiters
            .len()
    }
}
