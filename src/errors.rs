use std::path::PathBuf;
use thiserror::Error;

/// Centralized error type for the profiling runtime.
///
/// Only [`ProfileError::CounterProgramming`] is fatal. Everything else is a
/// diagnostic the call-site layer logs and swallows, since out-of-order
/// instrumentation must never take the host program down.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The hardware counter subsystem could not be programmed
    #[error("Counter subsystem programming failed: {0}")]
    CounterProgramming(String),

    /// An operation that needs a context ran on a thread without one
    #[error("No profiling context for {operation}")]
    MissingContext { operation: &'static str },

    /// `end_region` with an empty region stack
    #[error("Region end at line {end_line} without matching start")]
    UnbalancedEnd { end_line: i32 },

    /// Line observation outside any profiled region
    #[error("Observation at line {line} outside any profiled region")]
    NoActiveRegion { line: i32 },

    /// Region kind code not recognised
    #[error("Unknown region kind {0:#x}")]
    UnknownRegionKind(i32),

    /// Lane width outside 1..=64
    #[error("Invalid lane width {0}")]
    InvalidLaneWidth(i32),

    /// Caller passed a string that is not valid UTF-8 or a null pointer
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Report directory or file could not be created or written
    #[error("Report IO error at {path}: {source}")]
    ReportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Report could not be serialized or parsed
    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration rejected by validation
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ProfileError {
    /// Whether the process must not keep profiling after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProfileError::CounterProgramming(_))
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ProfileError::CounterProgramming(_) => "COUNTER_PROGRAMMING",
            ProfileError::MissingContext { .. } => "MISSING_CONTEXT",
            ProfileError::UnbalancedEnd { .. } => "UNBALANCED_END",
            ProfileError::NoActiveRegion { .. } => "NO_ACTIVE_REGION",
            ProfileError::UnknownRegionKind(_) => "UNKNOWN_REGION_KIND",
            ProfileError::InvalidLaneWidth(_) => "INVALID_LANE_WIDTH",
            ProfileError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ProfileError::ReportIo { .. } => "REPORT_IO",
            ProfileError::Serialization(_) => "SERIALIZATION",
            ProfileError::Configuration(_) => "CONFIGURATION",
        }
    }

    pub(crate) fn report_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProfileError::ReportIo {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using ProfileError
pub type Result<T> = std::result::Result<T, ProfileError>;
