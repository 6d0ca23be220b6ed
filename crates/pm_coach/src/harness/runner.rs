//! DifferentialRunner - Serialize one target with both engines
//!
//! [`EnginePair`] owns everything needed to launch the two implementations;
//! it is read-only after construction and shared across worker threads.

use std::path::Path;

use tracing::{debug, info};

use super::comparison::{OutputClassifier, RunResult};
use super::process::{Capture, EngineSpec, Mode, ProcessRunner, ProjectRoot, Side};
use super::traits::{Harness, TargetOutcome};
use crate::error::Result;
use crate::source::RepoSource;

/// The reference and candidate engines plus the runner that launches them.
#[derive(Debug, Clone)]
pub struct EnginePair {
    root: ProjectRoot,
    a: EngineSpec,
    b: EngineSpec,
    runner: ProcessRunner,
}

impl EnginePair {
    pub fn new(root: ProjectRoot, a: EngineSpec, b: EngineSpec, runner: ProcessRunner) -> Self {
        Self { root, a, b, runner }
    }

    pub fn root(&self) -> &ProjectRoot {
        &self.root
    }

    pub fn engine(&self, side: Side) -> &EngineSpec {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    /// Classifier labelled with the engine names.
    pub fn classifier(&self) -> OutputClassifier {
        OutputClassifier::new(&self.a.label, &self.b.label)
    }

    /// Launch one side in `cwd`.
    pub fn run(&self, side: Side, mode: &Mode, cwd: &Path) -> Capture {
        let command = self.engine(side).command(&self.root, mode);
        debug!(side = side.as_str(), command = %command, cwd = %cwd.display(), "Launching engine");
        self.runner.run(&command, cwd)
    }
}

/// Runs both engines in a stdout-producing mode and classifies the pair.
#[derive(Debug, Clone)]
pub struct DifferentialRunner {
    engines: EnginePair,
    mode: Mode,
    classifier: OutputClassifier,
}

impl DifferentialRunner {
    /// `mode` should be serialize or lens; artifact runs go through
    /// [`super::artifact::ArtifactComparator`].
    pub fn new(engines: EnginePair, mode: Mode) -> Self {
        let classifier = engines.classifier();
        Self {
            engines,
            mode,
            classifier,
        }
    }

    pub fn compare(&self, source: &dyn RepoSource) -> Result<RunResult> {
        let path = source.require_path()?;
        let metadata = source.metadata();

        let a = self.engines.run(Side::A, &self.mode, path);
        let b = self.engines.run(Side::B, &self.mode, path);
        let result = self.classifier.classify_run(&metadata, a, b);

        info!(
            target = %result.target_name,
            failure_type = %result.failure_type,
            a_ms = result.a.elapsed_ms,
            b_ms = result.b.elapsed_ms,
            "Target compared"
        );
        Ok(result)
    }
}

impl Harness for DifferentialRunner {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn run_target(&self, source: &dyn RepoSource) -> Result<TargetOutcome> {
        self.compare(source).map(TargetOutcome::Differential)
    }
}
