//! Discovery progress tracking
//!
//! Discovery fans out into one asynchronous request per service,
//! characteristic, descriptor and initial read. Every request issued while a
//! round is running is paired with exactly one completion, success or failure.
//! The round finishes when the outstanding count drops back to zero, at which
//! point the completion callback fires once.

use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgressError {
    #[error("Discovery already in progress ({pending} requests outstanding)")]
    AlreadyInProgress { pending: usize },
}

/// Callback fired when a discovery round completes
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

enum State {
    Idle,
    InProgress {
        pending: usize,
        callback: Option<CompletionCallback>,
    },
}

pub struct DiscoveryProgress {
    state: State,
}

impl Default for DiscoveryProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DiscoveryProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryProgress")
            .field("in_progress", &self.is_in_progress())
            .field("pending", &self.pending())
            .finish()
    }
}

impl DiscoveryProgress {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    /// Start a round with one outstanding request (the top-level discovery)
    ///
    /// Fails without touching the running round if one is already active.
    pub fn begin(&mut self, callback: Option<CompletionCallback>) -> Result<(), ProgressError> {
        if let State::InProgress { pending, .. } = self.state {
            return Err(ProgressError::AlreadyInProgress { pending });
        }
        debug!("Discovery round started");
        self.state = State::InProgress {
            pending: 1,
            callback,
        };
        Ok(())
    }

    /// Record an issued request. No-op while idle.
    pub fn add_progress(&mut self) {
        if let State::InProgress { pending, .. } = &mut self.state {
            *pending += 1;
            trace!(pending = *pending, "Discovery request issued");
        }
    }

    /// Record a completed request. Returns true when this completion finished the round.
    ///
    /// No-op while idle, so late completions after a finished or cancelled round
    /// are ignored.
    pub fn dec_progress(&mut self) -> bool {
        let State::InProgress { pending, .. } = &mut self.state else {
            return false;
        };
        *pending = pending.saturating_sub(1);
        trace!(pending = *pending, "Discovery request completed");
        if *pending > 0 {
            return false;
        }

        let callback = match std::mem::replace(&mut self.state, State::Idle) {
            State::InProgress { callback, .. } => callback,
            State::Idle => None,
        };
        debug!("Discovery round complete");
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    /// Abandon the running round without firing its callback
    pub fn cancel(&mut self) -> bool {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::InProgress { pending, .. } => {
                debug!(pending, "Discovery round cancelled");
                true
            }
            State::Idle => false,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.state, State::InProgress { .. })
    }

    /// Outstanding requests, zero while idle
    pub fn pending(&self) -> usize {
        match self.state {
            State::InProgress { pending, .. } => pending,
            State::Idle => 0,
        }
    }
}
