//! Runtime configuration for the profiler.
//!
//! Values the call-site ABI does not carry (where reports go, which source
//! origin is never instrumented, defaults for threads that skip `init`) live
//! here. A process-wide instance is read once when the global profiler is
//! built.

use crate::errors::{ProfileError, Result};
use crate::flags::ProfileFlags;
use crate::lanes::MAX_LANES;
use log::LevelFilter;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_RESULTS_DIR: &str = "LANEPROF_RESULTS_DIR";
pub const ENV_LIBRARY_ORIGIN: &str = "LANEPROF_LIBRARY_ORIGIN";
pub const ENV_LANES: &str = "LANEPROF_LANES";
pub const ENV_FLAGS: &str = "LANEPROF_FLAGS";
pub const ENV_LOG: &str = "LANEPROF_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfilerConfig {
    /// Directory under which the timestamped results directory is created
    pub results_root: PathBuf,
    /// Source origin whose regions are never instrumented
    pub library_origin: String,
    /// Lane width for threads that start a region before calling `init`
    pub default_lane_width: u32,
    /// Flags for threads that start a region before calling `init`
    pub default_flags: ProfileFlags,
    /// `log` level filter name (off, error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            results_root: PathBuf::from("."),
            library_origin: "stdlib.ispc".to_string(),
            default_lane_width: 8,
            default_flags: ProfileFlags::ALL,
            log_level: "warn".to_string(),
        }
    }
}

impl ProfilerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_lane_width == 0 || self.default_lane_width > MAX_LANES {
            return Err(ProfileError::Configuration(format!(
                "Default lane width must be between 1 and {}, got {}",
                MAX_LANES, self.default_lane_width
            )));
        }
        self.log_filter()?;
        Ok(())
    }

    pub fn log_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.log_level).map_err(|_| {
            ProfileError::Configuration(format!("Unknown log level '{}'", self.log_level))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by whichever `LANEPROF_*` variables are set.
    pub fn from_environment() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_RESULTS_DIR) {
            config.results_root = PathBuf::from(dir);
        }
        if let Some(origin) = lookup(ENV_LIBRARY_ORIGIN) {
            config.library_origin = origin;
        }
        if let Some(lanes) = lookup(ENV_LANES) {
            config.default_lane_width = lanes.trim().parse().map_err(|e| {
                ProfileError::Configuration(format!("Invalid {}='{}': {}", ENV_LANES, lanes, e))
            })?;
        }
        if let Some(flags) = lookup(ENV_FLAGS) {
            config.default_flags = ProfileFlags::from_raw(parse_flags(&flags)?);
        }
        if let Some(level) = lookup(ENV_LOG) {
            config.log_level = level.trim().to_ascii_lowercase();
        }

        config.validate()?;
        Ok(config)
    }
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_flags(value: &str) -> Result<u32> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|e| ProfileError::Configuration(format!("Invalid {}='{}': {}", ENV_FLAGS, value, e)))
}

/// Global profiler configuration
pub static GLOBAL_PROFILER_CONFIG: Lazy<RwLock<ProfilerConfig>> = Lazy::new(|| {
    RwLock::new(ProfilerConfig::from_environment().unwrap_or_else(|e| {
        log::warn!("Ignoring profiler environment configuration: {}", e);
        ProfilerConfig::default()
    }))
});

pub fn get_profiler_config() -> ProfilerConfig {
    GLOBAL_PROFILER_CONFIG.read().clone()
}

/// Replace the global configuration. Only affects a global profiler that has
/// not been built yet.
pub fn set_profiler_config(config: ProfilerConfig) -> Result<()> {
    config.validate()?;
    *GLOBAL_PROFILER_CONFIG.write() = config;
    Ok(())
}
