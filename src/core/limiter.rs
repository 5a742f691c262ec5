//! Admission control for task starts.
//!
//! The limiter counts tasks in flight. A start reserves one slot through a
//! compare-and-swap loop; the slot is given back when the returned
//! [`TaskSlot`] is dropped. Internal tasks are counted but never rejected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::TooManyTasks;

/// Shared in-flight counter with a soft limit.
///
/// One limiter is normally shared by every task of a hub instance; tests create
/// their own to run with isolated limits.
#[derive(Debug)]
pub struct TaskLimiter {
    limit: AtomicU64,
    in_flight: AtomicU64,
    principal_limit: Option<u64>,
    principals: Mutex<HashMap<String, u64>>,
}

impl Default for TaskLimiter {
    fn default() -> Self {
        Self::new(Self::default_limit())
    }
}

impl TaskLimiter {
    /// Create a limiter with the given instance-wide limit.
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit: AtomicU64::new(limit),
            in_flight: AtomicU64::new(0),
            principal_limit: None,
            principals: Mutex::new(HashMap::new()),
        }
    }

    /// Additionally cap the tasks in flight per principal.
    #[must_use]
    pub fn with_principal_limit(mut self, limit: u64) -> Self {
        self.principal_limit = Some(limit);
        self
    }

    /// `max(1000, 50 * cpus)`.
    #[must_use]
    pub fn default_limit() -> u64 {
        let cpus = u64::try_from(num_cpus::get()).unwrap_or(1);
        cpus.saturating_mul(50).max(1000)
    }

    /// Current instance-wide limit.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Acquire)
    }

    /// Change the instance-wide limit. Tasks already running are not affected.
    pub fn set_limit(&self, limit: u64) {
        self.limit.store(limit, Ordering::Release);
    }

    /// Per-principal limit, if configured.
    #[must_use]
    pub const fn principal_limit(&self) -> Option<u64> {
        self.principal_limit
    }

    /// Number of tasks currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Number of slots held on behalf of `principal`.
    #[must_use]
    pub fn in_flight_for(&self, principal: &str) -> u64 {
        self.principals.lock().get(principal).copied().unwrap_or(0)
    }

    /// Reserve a slot.
    ///
    /// The principal's count is read under the principal lock before the
    /// instance counter is touched, so a rejected start never holds an
    /// instance slot, not even transiently. When both limits are reached the
    /// instance limit is reported.
    ///
    /// # Errors
    ///
    /// Returns [`TooManyTasks`] if the task is not internal and either the
    /// instance limit or the principal's limit is already reached. No slot is
    /// consumed in that case.
    pub fn try_acquire(
        self: &Arc<Self>,
        internal: bool,
        principal: Option<&str>,
    ) -> Result<TaskSlot, TooManyTasks> {
        let mut principals = match (principal, self.principal_limit) {
            (Some(principal), Some(principal_limit)) => {
                let guard = self.principals.lock();
                let count = guard.get(principal).copied().unwrap_or(0);
                let over = !internal && count >= principal_limit;
                Some((principal, principal_limit, over, guard))
            }
            _ => None,
        };

        let limit = self.limit();
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if !internal && current >= limit {
                return Err(TooManyTasks::instance(limit));
            }
            if let Some((principal, principal_limit, true, _)) = &principals {
                return Err(TooManyTasks::principal(*principal_limit, *principal));
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                // Conflict, another task started concurrently.
                Err(actual) => current = actual,
            }
        }

        let principal = principals.as_mut().map(|(principal, _, _, guard)| {
            *guard.entry((*principal).to_owned()).or_insert(0) += 1;
            (*principal).to_owned()
        });
        drop(principals);

        Ok(TaskSlot {
            limiter: Arc::clone(self),
            principal,
        })
    }

    fn release(&self, principal: Option<&str>) {
        if let Some(principal) = principal {
            let mut principals = self.principals.lock();
            if let Some(count) = principals.get_mut(principal) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    principals.remove(principal);
                }
            }
        }
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "released more slots than acquired");
    }
}

/// One reserved in-flight slot, released on drop.
#[derive(Debug)]
pub struct TaskSlot {
    limiter: Arc<TaskLimiter>,
    principal: Option<String>,
}

impl TaskSlot {
    /// The principal this slot is counted for.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.limiter.release(self.principal.as_deref());
    }
}
