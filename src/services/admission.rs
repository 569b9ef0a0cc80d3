//! Per-process cap on concurrently running DRS lookups.
//!
//! The cap is `configured_max / active_pod_count`, recomputed on every request
//! so it follows the fleet as it scales. Saturated requests are rejected, never
//! queued.

use crate::errors::{DrsError, DrsResult};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tracing::{debug, warn};

/// Number of service replicas currently sharing the global lookup budget.
pub trait PodCounter: Send + Sync {
    fn active_pod_count(&self) -> usize;
}

/// Pod count taken from configuration.
pub struct FixedPodCount(pub usize);

impl PodCounter for FixedPodCount {
    fn active_pod_count(&self) -> usize {
        self.0
    }
}

pub struct AdmissionController {
    configured_max: usize,
    pods: Arc<dyn PodCounter>,
    in_flight: AtomicUsize,
}

impl AdmissionController {
    pub fn new(configured_max: usize, pods: Arc<dyn PodCounter>) -> Self {
        Self {
            configured_max,
            pods,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.configured_max / self.pods.active_pod_count().max(1)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Take a slot or fail with [`DrsError::TooManyRequests`].
    ///
    /// The check and the increment are separate steps, so a burst may briefly
    /// overshoot the cap by the number of racing callers.
    pub fn try_acquire(self: &Arc<Self>) -> DrsResult<AdmissionPermit> {
        let max = self.max_in_flight();
        let current = self.in_flight.load(Ordering::SeqCst);
        debug!("DRS lookups in flight: {} (max {})", current, max);
        if current >= max {
            warn!("rejecting DRS lookup: {} in flight, max {}", current, max);
            return Err(DrsError::TooManyRequests);
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(AdmissionPermit {
            controller: Arc::clone(self),
        })
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Releases its slot when dropped, including during unwinding.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max: usize, pods: usize) -> Arc<AdmissionController> {
        Arc::new(AdmissionController::new(max, Arc::new(FixedPodCount(pods))))
    }

    #[test]
    fn third_acquire_rejected_until_release() {
        let admission = controller(2, 1);
        let first = admission.try_acquire().unwrap();
        let _second = admission.try_acquire().unwrap();
        assert!(matches!(admission.try_acquire(), Err(DrsError::TooManyRequests)));

        drop(first);
        let _third = admission.try_acquire().unwrap();
        assert_eq!(admission.in_flight(), 2);
    }

    #[test]
    fn cap_is_divided_across_pods() {
        let admission = controller(10, 4);
        assert_eq!(admission.max_in_flight(), 2);
        let _a = admission.try_acquire().unwrap();
        let _b = admission.try_acquire().unwrap();
        assert!(admission.try_acquire().is_err());

        // fewer lookups than pods leaves nothing for this pod
        assert!(controller(1, 2).try_acquire().is_err());
        // a pod count of zero is treated as one
        assert_eq!(controller(3, 0).max_in_flight(), 3);
    }

    #[test]
    fn permit_released_on_panic() {
        let admission = controller(1, 1);
        let cloned = Arc::clone(&admission);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _permit = cloned.try_acquire().unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(admission.in_flight(), 0);
        assert!(admission.try_acquire().is_ok());
    }
}
