//! Differential Testing Harness
//!
//! This module provides the engine that compares two pm_encoder
//! implementations:
//!
//! - [`ProcessRunner`]: Running one engine under a timeout
//! - [`OutputClassifier`]: Assigning a [`FailureType`] to a pair of outputs
//! - [`ArtifactComparator`]: Byte-exact comparison of generated files
//! - [`TestVector`]: Persisted records of mismatches
//! - [`Aggregator`]: Running a target list and writing the reports

mod artifact;
mod comparison;
mod process;
mod report;
mod runner;
mod traits;
mod vector;

pub use artifact::{
    ArtifactCapture, ArtifactComparator, ArtifactResult, ArtifactSummary, CONTEXT_FILE,
    MAX_ARTIFACT_DIFF_LINES,
};
pub use comparison::{
    Classification, FailureType, FileChange, MAX_DIFF_LINES, OutputClassifier, RunResult,
    RunSummary, STDERR_EXCERPT_CHARS, extract_files,
};
pub use process::{
    AgentTarget, Capture, CommandSpec, DEFAULT_MARKER, DEFAULT_TIMEOUT, EngineSpec,
    LAUNCH_FAILURE_EXIT_CODE, Lens, Mode, ProcessRunner, ProjectRoot, Side, TIMEOUT_EXIT_CODE,
    TIMEOUT_STDERR,
};
pub use report::{
    Aggregator, ConsoleReporter, RESULTS_FILE, ReportEntry, ReportFiles, RunReport, RunStats,
    SUMMARY_FILE, TargetReport,
};
pub use runner::{DifferentialRunner, EnginePair};
pub use traits::{Harness, TargetOutcome};
pub use vector::{Expectation, Observation, TestVector, VectorWrite};
