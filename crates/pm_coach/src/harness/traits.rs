//! Harness - Trait shared by the differential and artifact modes
//!
//! The aggregator drives every target through one [`Harness`] and only sees
//! the resulting [`TargetOutcome`].

use super::artifact::ArtifactResult;
use super::comparison::{FailureType, RunResult};
use super::process::Mode;
use crate::error::Result;
use crate::source::RepoSource;

/// One comparison mode applied to a target.
pub trait Harness: Send + Sync {
    /// Mode passed to both engines.
    fn mode(&self) -> Mode;

    /// Run both engines against `source` and classify the outcome.
    ///
    /// Engine failures are outcomes, not errors. `Err` means the target
    /// itself could not be tested (no checkout, staging I/O failed).
    fn run_target(&self, source: &dyn RepoSource) -> Result<TargetOutcome>;
}

/// Classified result of one target, whichever mode produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Differential(RunResult),
    Artifact(ArtifactResult),
}

impl TargetOutcome {
    pub fn target_name(&self) -> &str {
        match self {
            TargetOutcome::Differential(run) => &run.target_name,
            TargetOutcome::Artifact(run) => &run.target_name,
        }
    }

    pub fn failure_type(&self) -> FailureType {
        match self {
            TargetOutcome::Differential(run) => run.failure_type,
            TargetOutcome::Artifact(run) => run.failure_type,
        }
    }

    pub fn matched(&self) -> bool {
        self.failure_type().is_match()
    }

    pub fn diff_summary(&self) -> &str {
        match self {
            TargetOutcome::Differential(run) => &run.diff_summary,
            TargetOutcome::Artifact(run) => &run.diff_summary,
        }
    }

    /// All diff lines, artifact diffs concatenated instruction file first.
    pub fn diff_lines(&self) -> Vec<&str> {
        match self {
            TargetOutcome::Differential(run) => run.diff_lines.iter().map(String::as_str).collect(),
            TargetOutcome::Artifact(run) => run
                .instruction_diff
                .iter()
                .chain(&run.context_diff)
                .map(String::as_str)
                .collect(),
        }
    }
}
