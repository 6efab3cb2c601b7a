// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

/// A failure recorded from any thread, drained by the block that owns it.
#[derive(Debug, Default)]
pub(crate) struct FailureFlag {
    failed: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl FailureFlag {
    /// Records a failure. Only the first reason is kept.
    pub(crate) fn record(&self, reason: String) {
        {
            let mut guard = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.is_none() {
                *guard = Some(reason);
            }
        }
        self.failed.store(true, Ordering::Release);
    }

    /// Returns the recorded reason, if any, and resets the flag.
    pub(crate) fn take(&self) -> Option<String> {
        if !self.failed.swap(false, Ordering::AcqRel) {
            return None;
        }
        let reason = self
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Some(reason.unwrap_or_default())
    }
}

/// Records failures for a block from threads other than the one running it.
///
/// Obtained from [`Harness::failure_handle`](crate::Harness::failure_handle). Recording a failure
/// never stops the process or the block: the failure is picked up when the owning block finishes.
#[derive(Clone, Debug)]
pub struct FailureHandle {
    flag: Arc<FailureFlag>,
}

impl FailureHandle {
    pub(crate) fn new(flag: Arc<FailureFlag>) -> Self {
        Self { flag }
    }

    /// Marks the owning block as failed.
    pub fn fail(&self, reason: impl Into<String>) {
        self.flag.record(reason.into());
    }

    /// Marks the owning block as failed unless `condition` holds. Returns `condition`.
    pub fn check(&self, condition: bool, reason: impl Into<String>) -> bool {
        if !condition {
            self.fail(reason);
        }
        condition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn failures_from_threads_are_drained_once() {
        let flag = Arc::new(FailureFlag::default());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let handle = FailureHandle::new(flag.clone());
                thread::spawn(move || {
                    if i % 2 == 1 {
                        handle.fail(format!("thread {i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread did not panic");
        }

        let reason = flag.take().expect("a failure was recorded");
        assert!(reason.starts_with("thread "), "reason: {reason}");
        assert_eq!(flag.take(), None);
    }

    #[test]
    fn check_passes_through() {
        let flag = Arc::new(FailureFlag::default());
        let handle = FailureHandle::new(flag.clone());
        assert!(handle.check(true, "unused"));
        assert_eq!(flag.take(), None);
        assert!(!handle.check(false, "bad value"));
        assert_eq!(flag.take().as_deref(), Some("bad value"));
    }
}
