//! The future returned by `post_*`: a one-shot slot resolved by the
//! delivery thread.

use arca_types::error::NodeError;
use arca_types::{TransactionReference, TransactionResponse};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

type Outcome = Result<(TransactionReference, TransactionResponse), NodeError>;

pub(crate) struct FutureSlot {
    result: Mutex<Option<Outcome>>,
    cond: Condvar,
}

impl FutureSlot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn resolve(&self, outcome: Outcome) {
        if let Ok(mut slot) = self.result.lock() {
            *slot = Some(outcome);
            self.cond.notify_all();
        }
    }
}

/// A handle on a posted transaction. Dropping it abandons the outcome;
/// the transaction itself still runs.
pub struct TransactionFuture {
    pub(crate) slot: Arc<FutureSlot>,
}

impl TransactionFuture {
    /// Blocks until the transaction is delivered, returning its
    /// reference and committed response. Rejections surface as
    /// [`NodeError::TransactionRejected`].
    pub fn get(self) -> Result<(TransactionReference, TransactionResponse), NodeError> {
        let mut guard = self
            .slot
            .result
            .lock()
            .map_err(|_| NodeError::Unavailable("future lock poisoned".into()))?;
        loop {
            if let Some(outcome) = guard.take() {
                return outcome;
            }
            guard = self
                .slot
                .cond
                .wait(guard)
                .map_err(|_| NodeError::Unavailable("future lock poisoned".into()))?;
        }
    }

    /// As [`TransactionFuture::get`], bounded by a timeout.
    pub fn get_timeout(
        self,
        timeout: Duration,
    ) -> Result<(TransactionReference, TransactionResponse), NodeError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self
            .slot
            .result
            .lock()
            .map_err(|_| NodeError::Unavailable("future lock poisoned".into()))?;
        loop {
            if let Some(outcome) = guard.take() {
                return outcome;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(NodeError::PollTimeout("posted transaction".into()));
            }
            let (g, _) = self
                .slot
                .cond
                .wait_timeout(guard, deadline - now)
                .map_err(|_| NodeError::Unavailable("future lock poisoned".into()))?;
            guard = g;
        }
    }
}
