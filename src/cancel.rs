//! Ambient cancellation signal threaded explicitly through every
//! async-capable operation, in place of the thread-local-style signal a
//! request originator attaches to a call.
//!
//! Mirrors the teacher's session-cancellation flag
//! (`SessionCancelMap = Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>`): a
//! plain atomic flag checked at loop/iteration boundaries, not a
//! mid-request preemption mechanism.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// A token that is never cancelled; used by callers that don't wire up
    /// the surrounding cancellation machinery.
    pub fn never() -> Self {
        Self::new()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
