//! End-to-end tests: profile a thread, complete it, read the report back

mod common;

use common::ScriptedCounters;
use laneprof::{ProfileError, ProfileFlags, ProfileReport, Profiler, ProfilerConfig, RegionKind};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

fn profiler_in(root: &std::path::Path) -> Profiler {
    Profiler::with_counters(
        &ProfilerConfig {
            results_root: root.to_path_buf(),
            ..ProfilerConfig::default()
        },
        Box::new(ScriptedCounters::with_step(7)),
    )
}

#[test]
fn test_completed_report_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = profiler_in(dir.path());
    let me = thread::current().id();

    profiler
        .init(me, "src/mandelbrot.ispc", 12, 8, ProfileFlags::ALL.bits())
        .unwrap();
    profiler
        .start_region(me, "src/mandelbrot.ispc", RegionKind::Function.code(), 12, 40, 3, 0xFF)
        .unwrap();
    for i in 0..10u64 {
        profiler
            .start_region(me, "src/mandelbrot.ispc", RegionKind::Foreach.code(), 15, 30, 3, 0xFF)
            .unwrap();
        profiler
            .iteration(me, "foreach", 16, 0xFF >> (i % 4), RegionKind::Foreach.code())
            .unwrap();
        profiler
            .if_branch(me, "if", 18, 0x0F, RegionKind::IfVarying.code())
            .unwrap();
        profiler
            .end_region(me, RegionKind::Foreach.code(), 31)
            .unwrap();
    }
    profiler
        .end_region(me, RegionKind::Function.code(), 40)
        .unwrap();

    let expected = profiler.registry().get(me).unwrap().lock().to_report();
    let path = profiler.complete(me).unwrap();

    assert!(path.starts_with(dir.path()));
    assert_eq!(path.file_name().unwrap(), "mandelbrot.ispc.12.3.json");

    let loaded = ProfileReport::load(&path).unwrap();
    assert_eq!(loaded, expected);
    assert_eq!(loaded.total_num_lanes, 8);
    assert_eq!(loaded.task, 3);

    let foreach = loaded.region(1).unwrap();
    assert_eq!(foreach.region_type, RegionKind::Foreach);
    assert_eq!(foreach.entry_count, 10);
    assert_eq!(foreach.end_line, 31);
    // Every entry/exit pair spans exactly one snapshot step
    assert_eq!(foreach.ipc, 7.0);
    assert_eq!(foreach.bytes_read, 7.0 * 64.0);
    let lines: Vec<i32> = foreach.lane_usage.iter().map(|p| p.line).collect();
    assert_eq!(lines, vec![16, 18]);

    // Context is gone after completion
    assert!(profiler.registry().get(me).is_none());
    assert!(matches!(
        profiler.complete(me),
        Err(ProfileError::MissingContext { .. })
    ));
}

#[test]
fn test_counters_disabled_by_flags_leave_metrics_zero() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = profiler_in(dir.path());
    let me = thread::current().id();

    profiler
        .init(me, "k.ispc", 1, 4, ProfileFlags::ALL_NO_COUNTERS.bits())
        .unwrap();
    profiler
        .start_region(me, "k.ispc", RegionKind::Loop.code(), 2, 8, 0, 0xF)
        .unwrap();
    profiler.end_region(me, RegionKind::Loop.code(), 8).unwrap();

    let report = ProfileReport::load(profiler.complete(me).unwrap()).unwrap();
    let region = &report.regions[0];
    assert_eq!(region.ipc, 0.0);
    assert_eq!(region.l2_hit, 0.0);
    assert_eq!(region.l3_hit, 0.0);
    assert_eq!(region.bytes_read, 0.0);
}

#[test]
fn test_filtered_kinds_do_not_appear() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = profiler_in(dir.path());
    let me = thread::current().id();

    profiler
        .init(me, "k.ispc", 1, 8, (ProfileFlags::LOOP | ProfileFlags::COUNTERS).bits())
        .unwrap();
    profiler
        .start_region(me, "k.ispc", RegionKind::Function.code(), 1, 50, 0, 0xFF)
        .unwrap();
    profiler
        .start_region(me, "k.ispc", RegionKind::Loop.code(), 5, 9, 0, 0xFF)
        .unwrap();
    profiler
        .if_branch(me, "if", 6, 0x3, RegionKind::IfUniform.code())
        .unwrap();
    profiler
        .iteration(me, "loop", 7, 0x3, RegionKind::Loop.code())
        .unwrap();
    profiler.end_region(me, RegionKind::Loop.code(), 9).unwrap();
    profiler.end_region(me, RegionKind::Function.code(), 50).unwrap();

    let report = ProfileReport::load(profiler.complete(me).unwrap()).unwrap();
    assert_eq!(report.regions.len(), 1);
    let region = &report.regions[0];
    assert_eq!(region.region_type, RegionKind::Loop);
    assert_eq!(region.region_id, 0);
    assert_eq!(region.lane_usage.len(), 1);
    assert_eq!(region.lane_usage[0].line, 7);
    assert_eq!(region.lane_usage[0].percent, 25.0);
}

#[test]
fn test_unwritable_results_drop_context() {
    let dir = tempfile::tempdir().unwrap();
    // A plain file where the results root should be
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"x").unwrap();
    let profiler = profiler_in(&blocker);
    let me = thread::current().id();

    profiler
        .init(me, "k.ispc", 1, 8, ProfileFlags::ALL.bits())
        .unwrap();
    profiler
        .start_region(me, "k.ispc", RegionKind::Loop.code(), 2, 3, 0, 0xFF)
        .unwrap();
    profiler.end_region(me, RegionKind::Loop.code(), 3).unwrap();

    let err = profiler.complete(me).unwrap_err();
    assert!(matches!(err, ProfileError::ReportIo { .. }));
    assert!(!err.is_fatal());
    assert!(profiler.registry().get(me).is_none());
}

#[test]
fn test_unbalanced_end_is_soft() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = profiler_in(dir.path());
    let me = thread::current().id();

    profiler
        .init(me, "k.ispc", 1, 8, ProfileFlags::ALL.bits())
        .unwrap();
    let err = profiler
        .end_region(me, RegionKind::Loop.code(), 3)
        .unwrap_err();
    assert!(matches!(err, ProfileError::UnbalancedEnd { end_line: 3 }));

    let err = profiler
        .iteration(me, "stray", 4, 0xFF, RegionKind::Loop.code())
        .unwrap_err();
    assert!(matches!(err, ProfileError::NoActiveRegion { line: 4 }));

    // Profiling continues normally afterwards
    assert_eq!(
        profiler
            .start_region(me, "k.ispc", RegionKind::Loop.code(), 2, 3, 0, 0xFF)
            .unwrap(),
        Some(0)
    );
}

#[test]
fn test_threads_sharing_a_kernel_write_separate_reports() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = Arc::new(profiler_in(dir.path()));
    let num_threads = 4;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_index| {
            let profiler = Arc::clone(&profiler);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let me = thread::current().id();
                profiler
                    .init(me, "k.ispc", 1, 8, ProfileFlags::ALL.bits())
                    .unwrap();
                for _ in 0..=thread_index {
                    profiler
                        .start_region(me, "k.ispc", RegionKind::Loop.code(), 2, 6, 0, 0xFF)
                        .unwrap();
                    profiler.end_region(me, RegionKind::Loop.code(), 6).unwrap();
                }
                barrier.wait();
                (thread_index as u64 + 1, profiler.complete(me).unwrap())
            })
        })
        .collect();

    let written: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let paths: HashSet<_> = written.iter().map(|(_, path)| path.clone()).collect();
    assert_eq!(paths.len(), num_threads);

    let directory = profiler.writer().directory();
    assert_eq!(std::fs::read_dir(directory).unwrap().count(), num_threads);
    for (cycles, path) in &written {
        let report = ProfileReport::load(path).unwrap();
        assert_eq!(report.regions[0].entry_count, *cycles);
    }
}
