//! Per-thread profiling context.
//!
//! A [`Context`] owns the stack of open regions for one thread of execution and
//! the table of every region it has ever seen. Re-entering a region with the
//! same `(start_line, kind)` identity reuses its statistics instead of creating
//! a fresh record, which keeps loops with many iterations cheap.

use crate::counters::{CounterState, CounterSubsystem};
use crate::errors::{ProfileError, Result};
use crate::flags::ProfileFlags;
use crate::region::{Region, RegionId, RegionKey, RegionKind};
use crate::report::ProfileReport;
use std::collections::HashMap;
use std::thread::ThreadId;

/// What the first instrumentation call of a thread declares about the program.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSpec {
    pub program: String,
    pub line: i32,
    pub lane_width: u32,
    pub flags: ProfileFlags,
}

impl ContextSpec {
    pub fn new(program: impl Into<String>, line: i32, lane_width: u32, flags: ProfileFlags) -> Self {
        Self {
            program: program.into(),
            line,
            lane_width,
            flags,
        }
    }
}

/// One open dynamic entry.
///
/// The counter baseline lives here and not on the shared [`Region`], so a
/// region that is open at two depths of recursion keeps both baselines.
#[derive(Debug, Clone, Copy)]
enum Frame {
    Recorded {
        slot: usize,
        baseline: Option<CounterState>,
    },
    /// Entry that is tracked for balance only: filtered kind or library origin.
    Suppressed { kind: RegionKind },
}

#[derive(Debug)]
pub struct Context {
    owner: ThreadId,
    spec: ContextSpec,
    task: Option<i32>,
    call_stack: Vec<Frame>,
    regions: Vec<Region>,
    region_table: HashMap<RegionKey, usize>,
    next_region_id: RegionId,
}

impl Context {
    pub fn new(owner: ThreadId, spec: ContextSpec) -> Self {
        Self {
            owner,
            spec,
            task: None,
            call_stack: Vec::new(),
            regions: Vec::new(),
            region_table: HashMap::new(),
            next_region_id: 0,
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn spec(&self) -> &ContextSpec {
        &self.spec
    }

    pub fn flags(&self) -> ProfileFlags {
        self.spec.flags
    }

    pub fn total_lanes(&self) -> u32 {
        self.spec.lane_width
    }

    pub fn task(&self) -> i32 {
        self.task.unwrap_or(0)
    }

    /// Record the task id the first time a region reports one.
    pub fn note_task(&mut self, task: i32) {
        self.task.get_or_insert(task);
    }

    pub fn depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Whether entries of `kind` are recorded under the current flags.
    pub fn records(&self, kind: RegionKind) -> bool {
        self.spec.flags.contains(kind.flag())
    }

    /// Whether region entries and exits should carry counter snapshots.
    pub fn samples_counters(&self) -> bool {
        self.spec.flags.samples_counters()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, key: RegionKey) -> Option<&Region> {
        self.region_table.get(&key).map(|&slot| &self.regions[slot])
    }

    /// Region at the top of the stack, if that entry is recorded.
    pub fn current(&self) -> Option<&Region> {
        match self.call_stack.last()? {
            Frame::Recorded { slot, .. } => Some(&self.regions[*slot]),
            Frame::Suppressed { .. } => None,
        }
    }

    /// Enter a region.
    ///
    /// Returns the id of the region the entry was recorded against, or `None`
    /// when the kind is filtered out by the context flags.
    pub fn push(
        &mut self,
        kind: RegionKind,
        start_line: i32,
        end_line_hint: i32,
        mask: u64,
        snapshot: Option<CounterState>,
    ) -> Option<RegionId> {
        if !self.records(kind) {
            self.call_stack.push(Frame::Suppressed { kind });
            return None;
        }

        let key = RegionKey::new(start_line, kind);
        let slot = match self.region_table.get(&key) {
            Some(&slot) => {
                self.regions[slot].extend_end_line(end_line_hint);
                slot
            }
            None => {
                let id = self.next_region_id;
                self.next_region_id += 1;
                self.regions.push(Region::new(id, key, end_line_hint, mask));
                let slot = self.regions.len() - 1;
                self.region_table.insert(key, slot);
                slot
            }
        };

        let region = &mut self.regions[slot];
        region.record_entry();
        let id = region.id();

        let baseline = snapshot.filter(|_| self.samples_counters());
        self.call_stack.push(Frame::Recorded { slot, baseline });
        Some(id)
    }

    /// Enter a region whose statistics must not be recorded at all.
    ///
    /// The frame keeps the stack balanced for the matching [`Context::pop`].
    pub fn push_suppressed(&mut self, kind: RegionKind) {
        self.call_stack.push(Frame::Suppressed { kind });
    }

    /// Leave the innermost open region.
    ///
    /// The region stays in the table to keep accumulating across future
    /// entries. Returns the id of the region that was closed, `None` for a
    /// suppressed frame.
    pub fn pop(
        &mut self,
        exit: Option<CounterState>,
        observed_end_line: i32,
        counters: &dyn CounterSubsystem,
    ) -> Result<Option<RegionId>> {
        let frame = self.call_stack.pop().ok_or(ProfileError::UnbalancedEnd {
            end_line: observed_end_line,
        })?;

        match frame {
            Frame::Suppressed { .. } => Ok(None),
            Frame::Recorded { slot, baseline } => {
                let sample = match (baseline, exit) {
                    (Some(before), Some(after)) => Some(counters.sample(&before, &after)),
                    _ => None,
                };
                let region = &mut self.regions[slot];
                region.record_exit(sample, observed_end_line);
                Ok(Some(region.id()))
            }
        }
    }

    /// Kind of the innermost open frame.
    pub fn top_kind(&self) -> Option<RegionKind> {
        match self.call_stack.last()? {
            Frame::Recorded { slot, .. } => Some(self.regions[*slot].kind()),
            Frame::Suppressed { kind } => Some(*kind),
        }
    }

    /// Attribute a line observation to the innermost open region.
    pub fn update_current(&mut self, line: i32, mask: u64) -> Result<Option<RegionId>> {
        let total_lanes = self.spec.lane_width;
        match self.call_stack.last() {
            None => Err(ProfileError::NoActiveRegion { line }),
            Some(Frame::Suppressed { .. }) => Ok(None),
            Some(Frame::Recorded { slot, .. }) => {
                let region = &mut self.regions[*slot];
                region.record_line(line, mask, total_lanes);
                Ok(Some(region.id()))
            }
        }
    }

    /// Build the report of every region this context has ever recorded.
    pub fn to_report(&self) -> ProfileReport {
        let mut regions: Vec<_> = self.regions.iter().map(Region::to_record).collect();
        regions.sort_by_key(|r| r.region_id);
        ProfileReport {
            file: self.spec.program.clone(),
            line: self.spec.line,
            total_num_lanes: self.spec.lane_width,
            task: self.task(),
            regions,
        }
    }

    /// Move the accumulated state out, leaving an empty context with the
    /// same owner and spec behind.
    pub(crate) fn detach(&mut self) -> Context {
        let fresh = Context::new(self.owner, self.spec.clone());
        std::mem::replace(self, fresh)
    }
}
