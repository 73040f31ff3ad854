//! Instrumentation runtime for SIMD kernels.
//!
//! Compiler-generated code calls into [`ffi`] around profiled regions. Each
//! thread gets its own [`context::Context`] through the [`registry::Registry`];
//! regions are recycled by source identity so loops aggregate into one record,
//! and a finished context is written out as a [`report::ProfileReport`].

use std::sync::Once;

static INIT: Once = Once::new();

// Module declarations
pub mod config;
pub mod context;
pub mod counters;
pub mod errors;
pub mod ffi;
pub mod flags;
pub mod lanes;
pub mod logging;
pub mod profiler;
pub mod region;
pub mod registry;
pub mod report;

pub(crate) fn ensure_logging() {
    INIT.call_once(|| {
        let config = crate::config::get_profiler_config();
        let level = config.log_filter().unwrap_or(log::LevelFilter::Warn);
        // A host that installed its own logger keeps it
        let _ = crate::logging::init_logging(level);
    });
}

pub use crate::config::ProfilerConfig;
pub use crate::context::{Context, ContextSpec};
pub use crate::counters::{CounterSample, CounterState, CounterSubsystem, DisabledCounters};
pub use crate::errors::{ProfileError, Result};
pub use crate::flags::ProfileFlags;
pub use crate::profiler::Profiler;
pub use crate::region::{Region, RegionId, RegionKey, RegionKind};
pub use crate::registry::Registry;
pub use crate::report::{ProfileReport, ReportWriter};
