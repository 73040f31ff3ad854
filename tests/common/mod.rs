//! Counter backends shared by the integration tests.

use laneprof::counters::COUNTER_SLOTS;
use laneprof::{CounterState, CounterSubsystem, ProfileError, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Slot layout used by [`ScriptedCounters`].
pub const SLOT_IPC: usize = 0;
pub const SLOT_BYTES: usize = 1;

/// Snapshot with the given IPC and byte slots.
pub fn state(ipc: u64, bytes: u64) -> CounterState {
    let mut raw = [0u64; COUNTER_SLOTS];
    raw[SLOT_IPC] = ipc;
    raw[SLOT_BYTES] = bytes;
    CounterState::from_raw(raw)
}

/// Backend that differences slots directly and counts lifecycle calls.
///
/// Each `snapshot` advances a clock by `step`, so a region entered and left
/// with nothing in between reports an IPC of `step`.
#[derive(Default)]
pub struct ScriptedCounters {
    pub programmed: Arc<AtomicU32>,
    pub cleaned: Arc<AtomicU32>,
    pub fail_program: bool,
    clock: AtomicU64,
    pub step: u64,
}

impl ScriptedCounters {
    pub fn with_step(step: u64) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    /// Backend whose programming always fails.
    pub fn failing() -> Self {
        Self {
            fail_program: true,
            ..Self::default()
        }
    }
}

impl CounterSubsystem for ScriptedCounters {
    fn program(&self) -> Result<()> {
        if self.fail_program {
            return Err(ProfileError::CounterProgramming("counters unavailable".into()));
        }
        self.programmed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cleanup(&self) {
        self.cleaned.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> CounterState {
        let now = self.clock.fetch_add(self.step, Ordering::SeqCst) + self.step;
        state(now, now * 64)
    }

    fn ipc(&self, before: &CounterState, after: &CounterState) -> f64 {
        (after.raw()[SLOT_IPC] - before.raw()[SLOT_IPC]) as f64
    }

    fn l2_hit_ratio(&self, _before: &CounterState, _after: &CounterState) -> f64 {
        0.5
    }

    fn l3_hit_ratio(&self, _before: &CounterState, _after: &CounterState) -> f64 {
        0.25
    }

    fn bytes_read(&self, before: &CounterState, after: &CounterState) -> u64 {
        after.raw()[SLOT_BYTES] - before.raw()[SLOT_BYTES]
    }
}
