//! Per-event profiling API.
//!
//! [`Profiler`] ties the registry, the counter service and the report writer
//! together and exposes one method per call-site event. Every method names the
//! calling thread explicitly and returns a typed result; the C ABI in
//! [`crate::ffi`] decides what to do with errors.

use crate::config::{get_profiler_config, ProfilerConfig};
use crate::context::ContextSpec;
use crate::counters::{CounterService, CounterSubsystem, DisabledCounters};
use crate::errors::{ProfileError, Result};
use crate::flags::ProfileFlags;
use crate::lanes::{mask_to_string, MAX_LANES};
use crate::logging::ProfilerLogger;
use crate::region::{RegionId, RegionKind};
use crate::registry::{ContextHandle, Registry};
use crate::report::ReportWriter;
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::ThreadId;

static LOGGER: ProfilerLogger = ProfilerLogger::new("laneprof::profiler");

pub struct Profiler {
    registry: Registry,
    writer: ReportWriter,
    default_lane_width: u32,
    default_flags: ProfileFlags,
}

impl Profiler {
    /// Profiler without hardware counters.
    pub fn new(config: &ProfilerConfig) -> Self {
        Self::with_counters(config, Box::new(DisabledCounters))
    }

    pub fn with_counters(config: &ProfilerConfig, counters: Box<dyn CounterSubsystem>) -> Self {
        let service = Arc::new(CounterService::new(counters));
        Self {
            registry: Registry::new(service, config.library_origin.clone()),
            writer: ReportWriter::new(config.results_root.clone()),
            default_lane_width: config.default_lane_width,
            default_flags: config.default_flags,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn writer(&self) -> &ReportWriter {
        &self.writer
    }

    fn counters(&self) -> &dyn CounterSubsystem {
        self.registry.counters().backend()
    }

    fn context(&self, thread: ThreadId, operation: &'static str) -> Result<ContextHandle> {
        self.registry
            .get(thread)
            .ok_or(ProfileError::MissingContext { operation })
    }

    /// Declare the program a thread is about to profile. Later calls from the
    /// same thread keep the first declaration.
    pub fn init(
        &self,
        thread: ThreadId,
        origin: &str,
        declared_line: i32,
        lane_width: i32,
        flags: u32,
    ) -> Result<()> {
        let lane_width = checked_lane_width(lane_width)?;
        let spec = ContextSpec::new(origin, declared_line, lane_width, ProfileFlags::from_raw(flags));
        self.registry.acquire(thread, spec)?;
        Ok(())
    }

    /// Enter a region. Returns the id it was recorded against, `None` when it
    /// is filtered out.
    #[allow(clippy::too_many_arguments)]
    pub fn start_region(
        &self,
        thread: ThreadId,
        origin: &str,
        region_kind: i32,
        start_line: i32,
        end_line_hint: i32,
        task: i32,
        mask: u64,
    ) -> Result<Option<RegionId>> {
        let kind = RegionKind::from_code(region_kind)?;

        if self.registry.is_library_origin(origin) {
            // Keep the stack balanced for the matching end_region
            if let Some(handle) = self.registry.get(thread) {
                handle.lock().push_suppressed(kind);
            }
            return Ok(None);
        }

        let spec = ContextSpec::new(origin, start_line, self.default_lane_width, self.default_flags);
        let handle = match self.registry.acquire(thread, spec)? {
            Some(handle) => handle,
            None => return Ok(None),
        };

        let mut ctx = handle.lock();
        ctx.note_task(task);
        let snapshot = (ctx.samples_counters() && ctx.records(kind)).then(|| self.counters().snapshot());
        Ok(ctx.push(kind, start_line, end_line_hint, mask, snapshot))
    }

    /// Leave the innermost open region.
    pub fn end_region(&self, thread: ThreadId, region_kind: i32, end_line: i32) -> Result<Option<RegionId>> {
        let handle = self.context(thread, "end_region")?;
        let mut ctx = handle.lock();
        let exit = ctx.samples_counters().then(|| self.counters().snapshot());

        if let Ok(kind) = RegionKind::from_code(region_kind) {
            match ctx.top_kind() {
                Some(top) if top != kind => LOGGER.log_debug(
                    "end_region",
                    &format!(
                        "region kind {} ends an open {} region at line {}",
                        kind.as_str(),
                        top.as_str(),
                        end_line
                    ),
                ),
                _ => {}
            }
        }

        ctx.pop(exit, end_line, self.counters())
    }

    /// Loop iteration observation.
    pub fn iteration(
        &self,
        thread: ThreadId,
        note: &str,
        line: i32,
        mask: u64,
        region_kind: i32,
    ) -> Result<Option<RegionId>> {
        self.observe(thread, "iteration", note, line, mask, region_kind)
    }

    /// Conditional branch observation.
    pub fn if_branch(
        &self,
        thread: ThreadId,
        note: &str,
        line: i32,
        mask: u64,
        region_kind: i32,
    ) -> Result<Option<RegionId>> {
        self.observe(thread, "if_branch", note, line, mask, region_kind)
    }

    fn observe(
        &self,
        thread: ThreadId,
        operation: &'static str,
        note: &str,
        line: i32,
        mask: u64,
        region_kind: i32,
    ) -> Result<Option<RegionId>> {
        let kind = RegionKind::from_code(region_kind)?;
        let handle = self.context(thread, operation)?;
        let mut ctx = handle.lock();
        if !ctx.records(kind) {
            return Ok(None);
        }

        if log::log_enabled!(log::Level::Trace) {
            LOGGER.log_trace(
                operation,
                &format!("[{}] {} {}", line, note, mask_to_string(mask, ctx.total_lanes())),
            );
        }
        ctx.update_current(line, mask)
    }

    /// Finalize the calling thread's context and write its report.
    ///
    /// The context is removed even if writing fails; its statistics are then
    /// lost.
    pub fn complete(&self, thread: ThreadId) -> Result<PathBuf> {
        let ctx = self
            .registry
            .finalize(thread)
            .ok_or(ProfileError::MissingContext { operation: "complete" })?;

        if ctx.depth() > 0 {
            LOGGER.log_warning(
                "complete",
                &format!("{} region(s) still open at completion", ctx.depth()),
            );
        }

        let report = ctx.to_report();
        self.writer.write(&report)
    }
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("registry", &self.registry)
            .field("results", &self.writer.directory())
            .finish()
    }
}

fn checked_lane_width(lane_width: i32) -> Result<u32> {
    match u32::try_from(lane_width) {
        Ok(width) if (1..=MAX_LANES).contains(&width) => Ok(width),
        _ => Err(ProfileError::InvalidLaneWidth(lane_width)),
    }
}

static GLOBAL_PROFILER: OnceCell<Profiler> = OnceCell::new();

/// Process-wide profiler used by the C ABI, built from the global
/// configuration on first use.
pub fn global() -> &'static Profiler {
    GLOBAL_PROFILER.get_or_init(|| Profiler::new(&get_profiler_config()))
}

/// Install a custom profiler (for example one with a hardware counter
/// backend) before the first instrumentation call. Hands the profiler back if
/// one is already in place.
pub fn install_global(profiler: Profiler) -> std::result::Result<(), Profiler> {
    GLOBAL_PROFILER.set(profiler)
}
