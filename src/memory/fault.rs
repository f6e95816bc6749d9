//! Fault-injecting cluster source for exercising memory pressure paths

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use crate::error::{MemError, Result};

use super::{cluster::Cluster, source::ClusterSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultPlan {
    Never,
    /// Every acquisition with ordinal >= n fails
    From(usize),
    /// Only the acquisition with ordinal n fails
    Once(usize),
}

/// Wraps another source and fails selected acquisitions.
///
/// Ordinals count every `acquire` call made through this source, starting at
/// zero, regardless of whether the call succeeded.
#[derive(Debug)]
pub struct FaultyClusterSource {
    inner: Arc<dyn ClusterSource>,
    plan: Mutex<FaultPlan>,
    attempts: AtomicUsize,
    failures: AtomicUsize,
}

impl FaultyClusterSource {
    /// Wrap `inner` with no faults planned
    pub fn new(inner: Arc<dyn ClusterSource>) -> Self {
        Self {
            inner,
            plan: Mutex::new(FaultPlan::Never),
            attempts: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fail every acquisition from ordinal `n` onwards
    pub fn fail_from(&self, n: usize) {
        self.set_plan(FaultPlan::From(n));
    }

    /// Fail only the acquisition with ordinal `n`
    pub fn fail_once_at(&self, n: usize) {
        self.set_plan(FaultPlan::Once(n));
    }

    /// Stop injecting faults and restart ordinal counting
    pub fn clear(&self) {
        self.set_plan(FaultPlan::Never);
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Number of acquisitions attempted since the last `clear`
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of injected failures so far
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn set_plan(&self, plan: FaultPlan) {
        *self.plan.lock().unwrap_or_else(PoisonError::into_inner) = plan;
    }

    fn should_fail(&self, ordinal: usize) -> bool {
        match *self.plan.lock().unwrap_or_else(PoisonError::into_inner) {
            FaultPlan::Never => false,
            FaultPlan::From(n) => ordinal >= n,
            FaultPlan::Once(n) => ordinal == n,
        }
    }
}

impl ClusterSource for FaultyClusterSource {
    fn acquire(&self, len: usize) -> Result<Cluster> {
        let ordinal = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(ordinal) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(MemError::out_of_memory(format!(
                "injected failure for cluster #{} ({} bytes)",
                ordinal, len
            )));
        }
        self.inner.acquire(len)
    }

    fn name(&self) -> &'static str {
        "faulty"
    }
}
