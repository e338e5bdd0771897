//! Cooperative cancellation for call-scoped parallel work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared flag that lets one thread abort batch work started by another.
///
/// Clones share the same flag. Workers check the token before starting each
/// unit of work (a sample or an output row) and bail out with
/// [`Error::Cancelled`](crate::error::Error::Cancelled); work already
/// finished is not undone. Cancellation is advisory, so the flag needs no
/// ordering guarantees beyond the store/load itself.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Flips the token; every clone observes the change.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
