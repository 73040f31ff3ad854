//! Report model and writer.
//!
//! A finished context becomes one [`ProfileReport`]. The model is plain serde
//! data; [`ReportWriter`] decides where it lands and renders it as JSON.

use crate::errors::{ProfileError, Result};
use crate::region::{RegionId, RegionKind};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Percentage observed for one source line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinePercent {
    pub line: i32,
    pub percent: f64,
}

/// Serialized form of one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub region_id: RegionId,
    pub region_type: RegionKind,
    pub start_line: i32,
    pub end_line: i32,
    pub initial_mask: u64,
    #[serde(default)]
    pub entry_count: u64,
    pub ipc: f64,
    pub l2_hit: f64,
    pub l3_hit: f64,
    pub bytes_read: f64,
    pub lane_usage: Vec<LinePercent>,
    pub full_mask_percentage: Vec<LinePercent>,
}

/// Everything one context recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    pub file: String,
    pub line: i32,
    pub total_num_lanes: u32,
    pub task: i32,
    pub regions: Vec<RegionRecord>,
}

impl ProfileReport {
    pub fn region(&self, id: RegionId) -> Option<&RegionRecord> {
        self.regions.iter().find(|r| r.region_id == id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read back a report written by [`ReportWriter`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ProfileError::report_io(path, e))?;
        Self::from_json(&text)
    }

    /// File name that keeps reports of different programs, declarations and
    /// tasks apart.
    pub fn file_name(&self) -> String {
        self.numbered_file_name(0)
    }

    /// File name for the `copy`th context sharing program, line and task.
    /// Copy 0 carries no suffix.
    pub fn numbered_file_name(&self, copy: u32) -> String {
        let program = Path::new(&self.file)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("unknown");
        match copy {
            0 => format!("{}.{}.{}.json", program, self.line, self.task),
            n => format!("{}.{}.{}.{}.json", program, self.line, self.task, n),
        }
    }
}

/// Writes reports into one timestamped directory under a results root.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    directory: PathBuf,
}

impl ReportWriter {
    /// Writer stamped with the current local time.
    pub fn new(results_root: impl Into<PathBuf>) -> Self {
        Self::stamped(results_root, Local::now())
    }

    pub fn stamped(results_root: impl Into<PathBuf>, at: DateTime<Local>) -> Self {
        let directory = results_root
            .into()
            .join(format!("profile_{}", at.format("%Y%m%d%H%M%S")));
        Self { directory }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Write `report`, creating the results directory on first use.
    ///
    /// Never replaces an existing report: a context whose name is taken gets
    /// the next free numbered name.
    pub fn write(&self, report: &ProfileReport) -> Result<PathBuf> {
        fs::create_dir_all(&self.directory)
            .map_err(|e| ProfileError::report_io(&self.directory, e))?;

        let (path, file) = self.create_unique(report)?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, report)?;
        out.flush().map_err(|e| ProfileError::report_io(&path, e))?;

        log::debug!(
            "Wrote profile report with {} regions to {}",
            report.regions.len(),
            path.display()
        );
        Ok(path)
    }

    fn create_unique(&self, report: &ProfileReport) -> Result<(PathBuf, fs::File)> {
        let mut copy = 0u32;
        loop {
            let path = self.directory.join(report.numbered_file_name(copy));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    copy = copy.checked_add(1).ok_or_else(|| ProfileError::report_io(&path, e))?;
                }
                Err(e) => return Err(ProfileError::report_io(&path, e)),
            }
        }
    }
}
