//! Deadline and cancellation governor.
//!
//! Cancellation is cooperative: nothing preempts a running handler. A
//! [`CallToken`] travels with each call; long-running work polls
//! [`CallToken::check`] at loop boundaries (or awaits
//! [`CallToken::cancelled`] at suspension points) and stops when the token
//! has fired.
//!
//! The token records *why* it fired exactly once: an external cancel yields
//! `Cancelled`, a deadline expiry yields `DeadlineExceeded`. The two are
//! distinct terminal outcomes, and the first cause wins any race.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::status::{Status, StatusCode};

const REASON_NONE: u8 = 0;
const REASON_CANCELLED: u8 = 1;
const REASON_DEADLINE: u8 = 2;

/// Cooperative cancellation token for one call.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct CallToken {
    token: CancellationToken,
    reason: Arc<AtomicU8>,
    /// Reason slot of the token this one was derived from, if any. A derived
    /// token records its own cause; when that is unset at read time the
    /// parent's cause applies.
    parent_reason: Option<Arc<AtomicU8>>,
}

impl CallToken {
    /// Create a fresh, unfired token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(AtomicU8::new(REASON_NONE)),
            parent_reason: None,
        }
    }

    /// Derive a token that fires on its own once `duration` elapses,
    /// independent of any explicit cancellation.
    ///
    /// The derived token also fires when `self` does (child semantics). Its
    /// expiry never marks `self`: the parent keeps its own cause.
    pub fn with_deadline(&self, duration: Duration) -> CallToken {
        let derived = CallToken {
            token: self.token.child_token(),
            reason: Arc::new(AtomicU8::new(REASON_NONE)),
            parent_reason: Some(self.reason.clone()),
        };

        let watcher = derived.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watcher.token.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    watcher.expire();
                }
            }
        });

        derived
    }

    /// Fire the token on behalf of an external caller.
    pub fn cancel(&self) {
        self.fire(REASON_CANCELLED);
    }

    /// Fire the token because a deadline elapsed.
    pub fn expire(&self) {
        self.fire(REASON_DEADLINE);
    }

    /// Fire the token with a reason taken off the wire.
    pub(crate) fn fire_with_code(&self, code: StatusCode) {
        match code {
            StatusCode::DeadlineExceeded => self.expire(),
            _ => self.cancel(),
        }
    }

    fn fire(&self, reason: u8) {
        // Set-once: the first cause wins, later causes are ignored.
        let _ = self
            .reason
            .compare_exchange(REASON_NONE, reason, Ordering::AcqRel, Ordering::Acquire);
        self.token.cancel();
    }

    /// Whether the token has fired.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Poll-style check for loop boundaries.
    ///
    /// Returns the terminal status to report if the token has fired.
    pub fn check(&self) -> Result<(), Status> {
        match self.cancel_status() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    /// The terminal status this token imposes, if it has fired.
    pub fn cancel_status(&self) -> Option<Status> {
        if !self.token.is_cancelled() {
            return None;
        }
        let mut reason = self.reason.load(Ordering::Acquire);
        if reason == REASON_NONE {
            if let Some(parent) = &self.parent_reason {
                reason = parent.load(Ordering::Acquire);
            }
        }
        match reason {
            REASON_DEADLINE => Some(Status::deadline_exceeded("deadline exceeded")),
            _ => Some(Status::cancelled("call cancelled")),
        }
    }

    /// Suspend until the token fires.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

impl Default for CallToken {
    fn default() -> Self {
        Self::new()
    }
}
