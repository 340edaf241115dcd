use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A first-class cancellation signal plumbed through every long-running
/// task (generator sampling loops, hypervisor samplers, the receiver stop
/// path), so `SIGINT` has one thing to flip rather than each task racing
/// its own OS-level `timeout` wrapper.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
