//! Cooperative cancellation for worker loops
//!
//! Workers are never torn down from the outside. They poll a [`CancelFlag`]
//! at iteration boundaries and wind down on their own, so every lock they
//! hold is released through the normal guard drop path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop request checked by worker loops
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create a flag in the running state
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this flag to stop at its next checkpoint
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether a stop was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());

        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_worker_stops_at_checkpoint() {
        let flag = CancelFlag::new();
        let worker_flag = flag.clone();

        let handle = thread::spawn(move || {
            let mut steps = 0u64;
            while !worker_flag.is_cancelled() {
                steps += 1;
                thread::sleep(Duration::from_millis(1));
            }
            steps
        });

        thread::sleep(Duration::from_millis(20));
        flag.cancel();
        let steps = handle.join().unwrap();
        assert!(steps > 0);
    }
}
