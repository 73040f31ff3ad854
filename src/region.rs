//! Per-region statistics.
//!
//! A [`Region`] aggregates every dynamic entry into one static source construct
//! within a context. Loops enter the same region once per iteration, so the
//! statistics are cumulative and the hardware metrics are running averages.

use crate::counters::CounterSample;
use crate::errors::{ProfileError, Result};
use crate::lanes;
use crate::report::{LinePercent, RegionRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of profiled construct. Discriminants are the call-site ABI codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum RegionKind {
    IfUniform = 0x1,
    IfVarying = 0x2,
    Loop = 0x4,
    Foreach = 0x8,
    Switch = 0x10,
    Function = 0x20,
}

impl RegionKind {
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0x1 => Ok(RegionKind::IfUniform),
            0x2 => Ok(RegionKind::IfVarying),
            0x4 => Ok(RegionKind::Loop),
            0x8 => Ok(RegionKind::Foreach),
            0x10 => Ok(RegionKind::Switch),
            0x20 => Ok(RegionKind::Function),
            other => Err(ProfileError::UnknownRegionKind(other)),
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Flag that enables recording of this kind.
    pub fn flag(self) -> crate::flags::ProfileFlags {
        use crate::flags::ProfileFlags;
        match self {
            RegionKind::IfUniform | RegionKind::IfVarying => ProfileFlags::IF,
            RegionKind::Loop => ProfileFlags::LOOP,
            RegionKind::Foreach => ProfileFlags::FOREACH,
            RegionKind::Switch => ProfileFlags::SWITCH,
            RegionKind::Function => ProfileFlags::FUNCTION,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RegionKind::IfUniform => "if_uniform",
            RegionKind::IfVarying => "if_varying",
            RegionKind::Loop => "loop",
            RegionKind::Foreach => "foreach",
            RegionKind::Switch => "switch",
            RegionKind::Function => "function",
        }
    }
}

/// Static identity of a region inside one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey {
    pub start_line: i32,
    pub kind: RegionKind,
}

impl RegionKey {
    pub fn new(start_line: i32, kind: RegionKind) -> Self {
        Self { start_line, kind }
    }
}

/// Unique id of a region, in creation order.
pub type RegionId = u64;

/// Cumulative `(denominator, numerator)` pair kept per source line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineTally {
    pub total: u64,
    pub hits: u64,
}

impl LineTally {
    #[inline]
    fn add(&mut self, total: u64, hits: u64) {
        self.total += total;
        self.hits += hits;
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.hits as f64 / self.total as f64 * 100.0
        }
    }
}

/// Running mean folded one sample at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RunningMean {
    value: f64,
}

impl RunningMean {
    /// Fold sample `x` as the `n`th observation.
    #[inline]
    fn fold(&mut self, x: f64, n: u64) {
        self.value = (self.value * (n - 1) as f64 + x) / n as f64;
    }
}

#[derive(Debug, Clone)]
pub struct Region {
    id: RegionId,
    key: RegionKey,
    end_line: i32,
    initial_mask: u64,
    entry_count: u64,
    samples: u64,
    ipc: RunningMean,
    l2_hit: RunningMean,
    l3_hit: RunningMean,
    bytes_read: RunningMean,
    lane_usage: BTreeMap<i32, LineTally>,
    full_mask: BTreeMap<i32, LineTally>,
}

impl Region {
    /// Create a region on its first dynamic entry.
    pub fn new(id: RegionId, key: RegionKey, end_line_hint: i32, initial_mask: u64) -> Self {
        Self {
            id,
            key,
            end_line: end_line_hint,
            initial_mask,
            entry_count: 0,
            samples: 0,
            ipc: RunningMean::default(),
            l2_hit: RunningMean::default(),
            l3_hit: RunningMean::default(),
            bytes_read: RunningMean::default(),
            lane_usage: BTreeMap::new(),
            full_mask: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn key(&self) -> RegionKey {
        self.key
    }

    pub fn kind(&self) -> RegionKind {
        self.key.kind
    }

    pub fn start_line(&self) -> i32 {
        self.key.start_line
    }

    pub fn end_line(&self) -> i32 {
        self.end_line
    }

    pub fn initial_mask(&self) -> u64 {
        self.initial_mask
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Number of counter samples folded into the averages.
    pub fn sample_count(&self) -> u64 {
        self.samples
    }

    pub fn ipc(&self) -> f64 {
        self.ipc.value
    }

    pub fn l2_hit(&self) -> f64 {
        self.l2_hit.value
    }

    pub fn l3_hit(&self) -> f64 {
        self.l3_hit.value
    }

    pub fn bytes_read(&self) -> f64 {
        self.bytes_read.value
    }

    pub fn lane_usage(&self, line: i32) -> Option<LineTally> {
        self.lane_usage.get(&line).copied()
    }

    pub fn full_mask(&self, line: i32) -> Option<LineTally> {
        self.full_mask.get(&line).copied()
    }

    pub fn record_entry(&mut self) {
        self.entry_count += 1;
    }

    /// Fold another reported end line into the resolved one.
    ///
    /// `end_line` only ever grows: neither the compiler's hint nor a single
    /// observed exit is a reliable end on its own.
    #[inline]
    pub fn extend_end_line(&mut self, line: i32) {
        self.end_line = self.end_line.max(line);
    }

    /// Close one dynamic entry, folding its counter sample into the averages.
    pub fn record_exit(&mut self, sample: Option<CounterSample>, observed_end_line: i32) {
        self.extend_end_line(observed_end_line);

        if let Some(sample) = sample {
            self.samples += 1;
            let n = self.samples;
            self.ipc.fold(sample.ipc, n);
            self.l2_hit.fold(sample.l2_hit, n);
            self.l3_hit.fold(sample.l3_hit, n);
            self.bytes_read.fold(sample.bytes_read as f64, n);
        }
    }

    /// Record that `line` ran with `mask` on a `total_lanes` wide target.
    pub fn record_line(&mut self, line: i32, mask: u64, total_lanes: u32) {
        let used = lanes::popcount(mask, total_lanes);
        self.lane_usage
            .entry(line)
            .or_default()
            .add(total_lanes as u64, used as u64);

        let available = lanes::lanes_available(self.initial_mask, used, total_lanes);
        self.full_mask
            .entry(line)
            .or_default()
            .add(1, (used == available) as u64);
    }

    pub fn to_record(&self) -> RegionRecord {
        RegionRecord {
            region_id: self.id,
            region_type: self.key.kind,
            start_line: self.key.start_line,
            end_line: self.end_line,
            initial_mask: self.initial_mask,
            entry_count: self.entry_count,
            ipc: self.ipc.value,
            l2_hit: self.l2_hit.value,
            l3_hit: self.l3_hit.value,
            bytes_read: self.bytes_read.value,
            lane_usage: percentages(&self.lane_usage),
            full_mask_percentage: percentages(&self.full_mask),
        }
    }
}

fn percentages(tallies: &BTreeMap<i32, LineTally>) -> Vec<LinePercent> {
    tallies
        .iter()
        .map(|(&line, tally)| LinePercent {
            line,
            percent: tally.percent(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_region(initial_mask: u64) -> Region {
        Region::new(0, RegionKey::new(10, RegionKind::Loop), 20, initial_mask)
    }

    #[test]
    fn test_kind_codes_round_trip() {
        for kind in [
            RegionKind::IfUniform,
            RegionKind::IfVarying,
            RegionKind::Loop,
            RegionKind::Foreach,
            RegionKind::Switch,
            RegionKind::Function,
        ] {
            assert_eq!(RegionKind::from_code(kind.code()).unwrap(), kind);
        }
        assert!(RegionKind::from_code(0x40).is_err());
    }

    #[test]
    fn test_full_mask_half() {
        let mut region = loop_region(0xFF);
        region.record_line(12, 0xFF, 8);
        region.record_line(12, 0x0F, 8);

        assert_eq!(region.full_mask(12), Some(LineTally { total: 2, hits: 1 }));
        assert_eq!(region.lane_usage(12), Some(LineTally { total: 16, hits: 12 }));

        let record = region.to_record();
        assert_eq!(record.full_mask_percentage, vec![LinePercent { line: 12, percent: 50.0 }]);
        assert_eq!(record.lane_usage, vec![LinePercent { line: 12, percent: 75.0 }]);
    }

    #[test]
    fn test_unmasked_join_counts_as_full() {
        let mut region = loop_region(0x1);
        region.record_line(11, 0x3, 4);
        assert_eq!(region.full_mask(11), Some(LineTally { total: 1, hits: 1 }));
    }

    #[test]
    fn test_end_line_is_monotonic() {
        let mut region = loop_region(0xFF);
        region.record_exit(None, 7);
        assert_eq!(region.end_line(), 20);
        region.record_exit(None, 25);
        region.record_exit(None, 21);
        assert_eq!(region.end_line(), 25);
    }

    #[test]
    fn test_running_average_matches_mean() {
        let mut region = loop_region(0xFF);
        let ipcs = [1.0, 2.0, 4.5, 0.5];
        for &ipc in &ipcs {
            region.record_entry();
            region.record_exit(
                Some(CounterSample {
                    ipc,
                    l2_hit: 0.5,
                    l3_hit: 0.25,
                    bytes_read: 64,
                }),
                20,
            );
        }
        assert_eq!(region.entry_count(), 4);
        assert!((region.ipc() - 2.0).abs() < 1e-12);
        assert!((region.l2_hit() - 0.5).abs() < 1e-12);
        assert!((region.bytes_read() - 64.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_sample_leaves_average_untouched() {
        let mut region = loop_region(0xFF);
        region.record_entry();
        region.record_exit(None, 20);
        assert_eq!(region.sample_count(), 0);
        assert_eq!(region.ipc(), 0.0);
    }

    #[test]
    fn test_percentages_in_line_order() {
        let mut region = loop_region(0xF);
        region.record_line(19, 0xF, 4);
        region.record_line(11, 0x1, 4);
        region.record_line(15, 0x3, 4);
        let lines: Vec<i32> = region.to_record().lane_usage.iter().map(|p| p.line).collect();
        assert_eq!(lines, vec![11, 15, 19]);
    }
}
