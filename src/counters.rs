//! Hardware counter collaborator.
//!
//! The engine never reads counters itself. A [`CounterSubsystem`] backend takes
//! opaque [`CounterState`] snapshots and derives metrics from a before/after
//! pair; the engine only ever pairs the two snapshots of one enter/exit.

use crate::errors::{ProfileError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Raw slots a backend may fill in a snapshot.
pub const COUNTER_SLOTS: usize = 8;

/// Opaque snapshot of the counter subsystem.
///
/// Backends decide what each slot means. The engine only stores and hands them
/// back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterState {
    raw: [u64; COUNTER_SLOTS],
}

impl CounterState {
    pub fn from_raw(raw: [u64; COUNTER_SLOTS]) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &[u64; COUNTER_SLOTS] {
        &self.raw
    }
}

/// Metrics derived from one enter/exit pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterSample {
    pub ipc: f64,
    pub l2_hit: f64,
    pub l3_hit: f64,
    pub bytes_read: u64,
}

/// Pluggable source of hardware counter snapshots.
pub trait CounterSubsystem: Send + Sync {
    /// Program the counters. Called when the first context is created.
    fn program(&self) -> Result<()>;

    /// Release the counters. Called when the last context is removed.
    fn cleanup(&self);

    fn snapshot(&self) -> CounterState;

    fn ipc(&self, before: &CounterState, after: &CounterState) -> f64;
    fn l2_hit_ratio(&self, before: &CounterState, after: &CounterState) -> f64;
    fn l3_hit_ratio(&self, before: &CounterState, after: &CounterState) -> f64;
    fn bytes_read(&self, before: &CounterState, after: &CounterState) -> u64;

    /// Derive every metric for one pair.
    fn sample(&self, before: &CounterState, after: &CounterState) -> CounterSample {
        CounterSample {
            ipc: self.ipc(before, after),
            l2_hit: self.l2_hit_ratio(before, after),
            l3_hit: self.l3_hit_ratio(before, after),
            bytes_read: self.bytes_read(before, after),
        }
    }
}

/// Backend for hosts without counter access. Programs successfully and reports
/// zero for every metric.
#[derive(Debug, Default)]
pub struct DisabledCounters;

impl CounterSubsystem for DisabledCounters {
    fn program(&self) -> Result<()> {
        Ok(())
    }

    fn cleanup(&self) {}

    fn snapshot(&self) -> CounterState {
        CounterState::default()
    }

    fn ipc(&self, _before: &CounterState, _after: &CounterState) -> f64 {
        0.0
    }

    fn l2_hit_ratio(&self, _before: &CounterState, _after: &CounterState) -> f64 {
        0.0
    }

    fn l3_hit_ratio(&self, _before: &CounterState, _after: &CounterState) -> f64 {
        0.0
    }

    fn bytes_read(&self, _before: &CounterState, _after: &CounterState) -> u64 {
        0
    }
}

/// Process-wide owner of a counter backend with a reference-counted lifecycle.
///
/// `retain` and `release` are only called with the registry lock held, so the
/// count and the program/cleanup calls it gates never interleave.
pub struct CounterService {
    backend: Box<dyn CounterSubsystem>,
    users: AtomicUsize,
}

impl CounterService {
    pub fn new(backend: Box<dyn CounterSubsystem>) -> Self {
        Self {
            backend,
            users: AtomicUsize::new(0),
        }
    }

    pub fn backend(&self) -> &dyn CounterSubsystem {
        self.backend.as_ref()
    }

    pub fn users(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    /// Register one more user, programming the backend on 0 -> 1.
    pub(crate) fn retain(&self) -> Result<()> {
        if self.users.load(Ordering::Acquire) == 0 {
            self.backend.program().map_err(|e| match e {
                ProfileError::CounterProgramming(_) => e,
                other => ProfileError::CounterProgramming(other.to_string()),
            })?;
            log::info!("Counter subsystem programmed");
        }
        self.users.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop one user, cleaning the backend up on 1 -> 0.
    pub(crate) fn release(&self) {
        let previous = self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous == 1 {
            self.backend.cleanup();
            log::info!("Counter subsystem cleaned up");
        }
    }
}

impl std::fmt::Debug for CounterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterService")
            .field("users", &self.users())
            .finish()
    }
}
