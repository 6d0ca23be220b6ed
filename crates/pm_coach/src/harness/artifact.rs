//! ArtifactComparator - Byte-exact comparison of generated files
//!
//! In artifact mode each engine writes an instruction file and `CONTEXT.txt`
//! into the target directory instead of printing to stdout. The two engines
//! share that directory, so A's files are moved into a scratch area before B
//! runs. A crash of A stops the comparison; B is never launched.
//!
//! All scratch state lives in a [`Staging`] guard. Dropping it removes any
//! artifacts an engine left behind, puts back files the target already had
//! under those names, and deletes the scratch directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::comparison::{FailureType, OutputClassifier, line_diff};
use super::process::{AgentTarget, Capture, Mode, Side};
use super::runner::EnginePair;
use super::traits::{Harness, TargetOutcome};
use crate::error::{CoachError, Result};
use crate::source::RepoSource;

/// Second artifact, written by every agent target.
pub const CONTEXT_FILE: &str = "CONTEXT.txt";

/// Maximum diff lines kept per artifact.
pub const MAX_ARTIFACT_DIFF_LINES: usize = 100;

const DIFF_CONTEXT: usize = 3;
const STASH_PREFIX: &str = "orig_";

/// One engine's run plus the artifacts it produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactCapture {
    pub capture: Capture,
    pub instruction: Option<Vec<u8>>,
    pub context: Option<Vec<u8>>,
}

/// Classified artifact comparison of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactResult {
    pub target_name: String,
    pub target_origin: String,
    pub file_count: usize,
    pub agent: AgentTarget,
    pub failure_type: FailureType,
    pub a: ArtifactCapture,
    /// `None` when A crashed and B was never run.
    pub b: Option<ArtifactCapture>,
    pub instruction_match: bool,
    pub context_match: bool,
    pub instruction_diff: Vec<String>,
    pub context_diff: Vec<String>,
    pub diff_summary: String,
}

impl ArtifactResult {
    pub fn matched(&self) -> bool {
        self.failure_type.is_match()
    }

    pub fn instruction_file(&self) -> &'static str {
        self.agent.instruction_file()
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            target_name: self.target_name.clone(),
            target_origin: self.target_origin.clone(),
            matched: self.matched(),
            failure_type: self.failure_type,
            diff_summary: self.diff_summary.clone(),
            instruction_file: self.instruction_file().to_string(),
            instruction_match: self.instruction_match,
            context_match: self.context_match,
            a_exit_code: self.a.capture.exit_code,
            b_exit_code: self.b.as_ref().map(|b| b.capture.exit_code),
            a_time_ms: self.a.capture.elapsed_ms,
            b_time_ms: self.b.as_ref().map(|b| b.capture.elapsed_ms),
            file_count: self.file_count,
            diff_line_count: self.instruction_diff.len() + self.context_diff.len(),
        }
    }
}

/// Entry written to the results file for an artifact run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub target_name: String,
    pub target_origin: String,
    #[serde(rename = "match")]
    pub matched: bool,
    pub failure_type: FailureType,
    pub diff_summary: String,
    pub instruction_file: String,
    pub instruction_match: bool,
    pub context_match: bool,
    pub a_exit_code: i32,
    pub b_exit_code: Option<i32>,
    pub a_time_ms: u64,
    pub b_time_ms: Option<u64>,
    pub file_count: usize,
    pub diff_line_count: usize,
}

/// Runs both engines in artifact mode and compares their files byte for byte.
#[derive(Debug, Clone)]
pub struct ArtifactComparator {
    engines: EnginePair,
    agent: AgentTarget,
    classifier: OutputClassifier,
}

impl ArtifactComparator {
    pub fn new(engines: EnginePair, agent: AgentTarget) -> Self {
        let classifier = engines.classifier();
        Self {
            engines,
            agent,
            classifier,
        }
    }

    fn names(&self) -> [&'static str; 2] {
        [self.agent.instruction_file(), CONTEXT_FILE]
    }

    pub fn compare(&self, source: &dyn RepoSource) -> Result<ArtifactResult> {
        let path = source.require_path()?;
        let metadata = source.metadata();
        let mode = Mode::Artifacts(self.agent);
        let staging = Staging::new(path, self.names())?;

        let mut result = ArtifactResult {
            target_name: metadata.name,
            target_origin: metadata.origin_url.unwrap_or_default(),
            file_count: metadata.file_count,
            agent: self.agent,
            failure_type: FailureType::None,
            a: ArtifactCapture::default(),
            b: None,
            instruction_match: false,
            context_match: false,
            instruction_diff: Vec::new(),
            context_diff: Vec::new(),
            diff_summary: String::new(),
        };

        let a = self.engines.run(Side::A, &mode, path);
        if !a.succeeded() {
            let crash = self.classifier.crash(Side::A, &a);
            result.failure_type = crash.failure_type;
            result.diff_summary = crash.summary;
            result.a.capture = a;
            return Ok(result);
        }
        result.a = staging.collect(Side::A, a)?;

        let b = self.engines.run(Side::B, &mode, path);
        if !b.succeeded() {
            let crash = self.classifier.crash(Side::B, &b);
            result.failure_type = crash.failure_type;
            result.diff_summary = crash.summary;
            result.b = Some(ArtifactCapture {
                capture: b,
                ..ArtifactCapture::default()
            });
            return Ok(result);
        }
        let b = staging.collect(Side::B, b)?;

        self.compare_staged(&mut result, &b);
        result.b = Some(b);
        info!(
            target = %result.target_name,
            failure_type = %result.failure_type,
            "Artifacts compared"
        );
        Ok(result)
    }

    fn compare_staged(&self, result: &mut ArtifactResult, b: &ArtifactCapture) {
        let [instruction, context] = self.names();
        let a = &result.a;

        if a.instruction.is_none() && b.instruction.is_none() {
            warn!(target = %result.target_name, file = instruction, "Neither engine generated artifact");
        }
        if a.context.is_none() && b.context.is_none() {
            warn!(target = %result.target_name, file = context, "Neither engine generated artifact");
        }

        result.instruction_match = a.instruction == b.instruction;
        result.context_match = a.context == b.context;
        if !result.instruction_match {
            result.instruction_diff =
                artifact_diff(instruction, a.instruction.as_deref(), b.instruction.as_deref());
        }
        if !result.context_match {
            result.context_diff = artifact_diff(context, a.context.as_deref(), b.context.as_deref());
        }

        if result.instruction_match && result.context_match {
            result.failure_type = FailureType::None;
            result.diff_summary = "Identical artifacts (0 bytes difference)".to_string();
        } else {
            result.failure_type = FailureType::ArtifactMismatch;
            result.diff_summary = format!(
                "Artifacts differ: {instruction}={}, {context}={}",
                !result.instruction_match, !result.context_match
            );
        }
    }
}

impl Harness for ArtifactComparator {
    fn mode(&self) -> Mode {
        Mode::Artifacts(self.agent)
    }

    fn run_target(&self, source: &dyn RepoSource) -> Result<TargetOutcome> {
        self.compare(source).map(TargetOutcome::Artifact)
    }
}

/// Bounded unified diff of one artifact pair. A missing file diffs as empty.
fn artifact_diff(name: &str, a: Option<&[u8]>, b: Option<&[u8]>) -> Vec<String> {
    let old = String::from_utf8_lossy(a.unwrap_or_default());
    let new = String::from_utf8_lossy(b.unwrap_or_default());
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let label = |side: Side, present: bool| {
        let staged = format!("{}{name}", side.staging_prefix());
        if present { staged } else { format!("{staged} (not generated)") }
    };
    let mut lines = line_diff(
        &old_lines,
        &new_lines,
        &label(Side::A, a.is_some()),
        &label(Side::B, b.is_some()),
        DIFF_CONTEXT,
    )
    .lines;

    if lines.is_empty() {
        // Same lines, so the bytes differ only in terminators or a trailing newline.
        lines.push(format!(
            "{name}: line terminators differ ({} vs {} bytes)",
            a.map_or(0, <[u8]>::len),
            b.map_or(0, <[u8]>::len)
        ));
    }
    lines.truncate(MAX_ARTIFACT_DIFF_LINES);
    lines
}

/// Scratch directory guard for one artifact comparison.
///
/// Only names listed in `cleared` are ever removed from the target: either
/// the target never had them or the original is safe in the scratch area.
struct Staging<'a> {
    target: &'a Path,
    scratch: TempDir,
    names: [&'static str; 2],
    cleared: Vec<&'static str>,
    stashed: Vec<&'static str>,
}

impl<'a> Staging<'a> {
    /// Create the scratch area and set aside files the target already has
    /// under the artifact names, so both engines see the same tree.
    fn new(target: &'a Path, names: [&'static str; 2]) -> Result<Self> {
        let mut staging = Self::empty(target, names)?;
        staging.stash_existing()?;
        Ok(staging)
    }

    fn empty(target: &'a Path, names: [&'static str; 2]) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("pm_coach_artifacts_")
            .tempdir()
            .map_err(|e| CoachError::io(std::env::temp_dir(), e))?;
        Ok(Self {
            target,
            scratch,
            names,
            cleared: Vec::new(),
            stashed: Vec::new(),
        })
    }

    fn stash_existing(&mut self) -> Result<()> {
        for name in self.names {
            let existing = self.target.join(name);
            if existing.is_file() {
                let stash = self.scratch_path(STASH_PREFIX, name);
                move_file(&existing, &stash).map_err(|e| CoachError::io(&existing, e))?;
                debug!(file = name, "Set aside pre-existing artifact");
                self.stashed.push(name);
            }
            self.cleared.push(name);
        }
        Ok(())
    }

    fn scratch_path(&self, prefix: &str, name: &str) -> PathBuf {
        self.scratch.path().join(format!("{prefix}{name}"))
    }

    /// Move `side`'s artifacts out of the target and read them back.
    fn collect(&self, side: Side, capture: Capture) -> Result<ArtifactCapture> {
        let [instruction, context] = self.names;
        Ok(ArtifactCapture {
            capture,
            instruction: self.stage(side, instruction)?,
            context: self.stage(side, context)?,
        })
    }

    fn stage(&self, side: Side, name: &str) -> Result<Option<Vec<u8>>> {
        let generated = self.target.join(name);
        if !generated.is_file() {
            debug!(side = side.as_str(), file = name, "Artifact not generated");
            return Ok(None);
        }
        let staged = self.scratch_path(&side.staging_prefix(), name);
        move_file(&generated, &staged).map_err(|e| CoachError::io(&generated, e))?;
        let bytes = fs::read(&staged).map_err(|e| CoachError::io(&staged, e))?;
        Ok(Some(bytes))
    }
}

impl Drop for Staging<'_> {
    fn drop(&mut self) {
        for name in &self.cleared {
            let leftover = self.target.join(name);
            if leftover.is_file() {
                if let Err(e) = fs::remove_file(&leftover) {
                    warn!(path = %leftover.display(), error = %e, "Failed to remove leftover artifact");
                }
            }
        }
        for name in &self.stashed {
            let stash = self.scratch_path(STASH_PREFIX, name);
            let original = self.target.join(name);
            if let Err(e) = move_file(&stash, &original) {
                warn!(path = %original.display(), error = %e, "Failed to restore pre-existing artifact");
            }
        }
    }
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}
