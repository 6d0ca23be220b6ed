//! Aggregator - Running every target and reporting the results
//!
//! Targets run through one [`Harness`], sequentially or on a bounded rayon
//! pool. Results always come back in target order. Vectors are written after
//! all targets finish, one at a time.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{info, warn};

use super::artifact::ArtifactSummary;
use super::comparison::{FailureType, RunSummary};
use super::process::Mode;
use super::traits::{Harness, TargetOutcome};
use super::vector::{TestVector, VectorWrite};
use crate::error::{CoachError, Result};
use crate::source::open_source;

/// Results file name inside the output directory.
pub const RESULTS_FILE: &str = "results.json";

/// Run summary file name inside the output directory.
pub const SUMMARY_FILE: &str = "summary.json";

/// Diff lines shown per failing target in verbose console output.
const VERBOSE_DIFF_LINES: usize = 20;

/// Drives targets through a harness.
pub struct Aggregator<'h> {
    harness: &'h dyn Harness,
    jobs: usize,
    snapshot: bool,
    vector_dir: Option<PathBuf>,
}

impl<'h> Aggregator<'h> {
    pub fn new(harness: &'h dyn Harness) -> Self {
        Self {
            harness,
            jobs: 1,
            snapshot: false,
            vector_dir: None,
        }
    }

    /// Number of targets processed concurrently.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Run each target in a temporary copy.
    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Write a vector for every failing target into `dir`.
    pub fn vectors_into(mut self, dir: impl Into<PathBuf>) -> Self {
        self.vector_dir = Some(dir.into());
        self
    }

    /// Run every target and collect the outcomes in target order.
    pub fn run(&self, targets: &[PathBuf]) -> Result<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(targets = targets.len(), jobs = self.jobs, mode = self.harness.mode().name(), "Starting run");

        let mut reports = if self.jobs <= 1 || targets.len() <= 1 {
            targets
                .iter()
                .map(|target| self.run_one(target))
                .collect::<Result<Vec<_>>>()?
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.jobs)
                .build()
                .map_err(|e| CoachError::WorkerPool(e.to_string()))?;
            pool.install(|| {
                targets
                    .par_iter()
                    .map(|target| self.run_one(target))
                    .collect::<Result<Vec<_>>>()
            })?
        };

        if let Some(dir) = &self.vector_dir {
            let mode = self.harness.mode();
            for report in &mut reports {
                let Ok(outcome) = &report.outcome else { continue };
                if let Some(vector) = TestVector::from_outcome(outcome, &mode) {
                    report.vector = Some(vector.write(dir)?);
                }
            }
        }

        Ok(RunReport {
            mode: self.harness.mode(),
            started_at,
            duration: clock.elapsed(),
            targets: reports,
        })
    }

    /// Environment errors abort the run; anything else becomes an error entry.
    fn run_one(&self, target: &Path) -> Result<TargetReport> {
        let outcome = open_source(target, self.snapshot)
            .and_then(|source| self.harness.run_target(source.as_ref()));
        let outcome = match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_environment() => return Err(e),
            Err(e) => {
                warn!(target = %target.display(), error = %e, "Target could not be tested");
                Err(e.to_string())
            }
        };
        Ok(TargetReport {
            target: target.to_path_buf(),
            outcome,
            vector: None,
        })
    }
}

/// Outcome of one target as seen by the aggregator.
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub target: PathBuf,
    /// `Err` holds the message of a non-fatal error.
    pub outcome: std::result::Result<TargetOutcome, String>,
    pub vector: Option<VectorWrite>,
}

impl TargetReport {
    pub fn passed(&self) -> bool {
        matches!(&self.outcome, Ok(outcome) if outcome.matched())
    }

    pub fn name(&self) -> String {
        match &self.outcome {
            Ok(outcome) => outcome.target_name().to_string(),
            Err(_) => self
                .target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.target.display().to_string()),
        }
    }

    pub fn entry(&self) -> ReportEntry {
        match &self.outcome {
            Ok(TargetOutcome::Differential(run)) => ReportEntry::Differential(run.summary()),
            Ok(TargetOutcome::Artifact(run)) => ReportEntry::Artifact(run.summary()),
            Err(message) => ReportEntry::Error {
                target: self.name(),
                message: message.clone(),
            },
        }
    }
}

/// One element of `results.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReportEntry {
    Differential(RunSummary),
    Artifact(ArtifactSummary),
    Error { target: String, message: String },
}

/// Contents of `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub mode: Mode,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub parity_percent: f64,
    /// Count per failure kind, errors excluded.
    pub failure_counts: BTreeMap<String, usize>,
}

/// Paths written by [`RunReport::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    pub results: PathBuf,
    pub summary: PathBuf,
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: Mode,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.targets.len()
    }

    pub fn passed(&self) -> usize {
        self.targets.iter().filter(|t| t.passed()).count()
    }

    /// Failing targets, error entries included.
    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    pub fn errors(&self) -> usize {
        self.targets.iter().filter(|t| t.outcome.is_err()).count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    /// Percentage of matching targets; zero for an empty run.
    #[expect(
        clippy::cast_precision_loss,
        reason = "target counts are far below 2^52"
    )]
    pub fn parity(&self) -> f64 {
        if self.targets.is_empty() {
            return 0.0;
        }
        self.passed() as f64 / self.total() as f64 * 100.0
    }

    pub fn entries(&self) -> Vec<ReportEntry> {
        self.targets.iter().map(TargetReport::entry).collect()
    }

    pub fn stats(&self) -> RunStats {
        let mut failure_counts = BTreeMap::new();
        for outcome in self.targets.iter().filter_map(|t| t.outcome.as_ref().ok()) {
            let kind = outcome.failure_type();
            if kind != FailureType::None {
                *failure_counts.entry(kind.as_str().to_string()).or_insert(0) += 1;
            }
        }
        RunStats {
            mode: self.mode,
            started_at: self.started_at,
            duration_ms: u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
            total: self.total(),
            passed: self.passed(),
            failed: self.failed(),
            errors: self.errors(),
            parity_percent: self.parity(),
            failure_counts,
        }
    }

    /// Write `results.json` and `summary.json` into `dir`, creating it.
    pub fn write(&self, dir: &Path) -> Result<ReportFiles> {
        fs::create_dir_all(dir).map_err(|e| CoachError::io(dir, e))?;
        let files = ReportFiles {
            results: dir.join(RESULTS_FILE),
            summary: dir.join(SUMMARY_FILE),
        };
        write_json(&files.results, &self.entries(), "results")?;
        write_json(&files.summary, &self.stats(), "run summary")?;
        info!(results = %files.results.display(), "Results saved");
        Ok(files)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, what: &str) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value).map_err(|e| CoachError::json(what, e))?;
    json.push('\n');
    fs::write(path, json).map_err(|e| CoachError::io(path, e))
}

/// Human-readable progress and summary on a terminal.
pub struct ConsoleReporter<W: WriteColor> {
    out: W,
    verbose_diffs: bool,
}

impl ConsoleReporter<StandardStream> {
    /// Colors only when requested and stdout is a terminal.
    pub fn stdout(color: bool, verbose_diffs: bool) -> Self {
        let choice = if color && io::stdout().is_terminal() {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        Self::new(StandardStream::stdout(choice), verbose_diffs)
    }
}

impl<W: WriteColor> ConsoleReporter<W> {
    pub fn new(out: W, verbose_diffs: bool) -> Self {
        Self { out, verbose_diffs }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn colored(&mut self, color: Color, bold: bool, text: &str) -> io::Result<()> {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(color)).set_bold(bold);
        self.out.set_color(&spec)?;
        write!(self.out, "{text}")?;
        self.out.reset()
    }

    pub fn header(&mut self, targets: usize, mode: &Mode, output: &Path) -> io::Result<()> {
        self.colored(Color::Cyan, true, &format!("pm_coach v{}", env!("CARGO_PKG_VERSION")))?;
        writeln!(self.out)?;
        writeln!(self.out, "Testing {targets} target(s), mode: {}", mode_label(mode))?;
        writeln!(self.out, "Output: {}/", output.display())?;
        writeln!(self.out, "{}", "-".repeat(60))
    }

    pub fn target(&mut self, index: usize, total: usize, report: &TargetReport) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "[{index}/{total}] {}", report.target.display())?;

        match &report.outcome {
            Err(message) => {
                write!(self.out, "  ")?;
                self.colored(Color::Red, true, "Error:")?;
                writeln!(self.out, " {message}")?;
            }
            Ok(outcome) => {
                if let TargetOutcome::Differential(run) = outcome {
                    writeln!(
                        self.out,
                        "  Files: {}, A: {}ms, B: {}ms",
                        run.file_count, run.a.elapsed_ms, run.b.elapsed_ms
                    )?;
                }
                write!(self.out, "  Result: ")?;
                if outcome.matched() {
                    self.colored(Color::Green, true, "PASS")?;
                    writeln!(self.out, " ({})", outcome.diff_summary().to_lowercase())?;
                } else {
                    self.colored(Color::Red, true, "FAIL")?;
                    writeln!(self.out, " - {}", outcome.failure_type())?;
                    writeln!(self.out, "  Details: {}", outcome.diff_summary())?;
                    if self.verbose_diffs {
                        for line in outcome.diff_lines().into_iter().take(VERBOSE_DIFF_LINES) {
                            writeln!(self.out, "    {line}")?;
                        }
                    }
                }
            }
        }

        if let Some(vector) = &report.vector {
            let note = match vector {
                VectorWrite::Created(_) => "",
                VectorWrite::Unchanged(_) => " (unchanged)",
                VectorWrite::Preserved(_) => " (existing vector kept)",
            };
            writeln!(self.out, "  Vector: {}{note}", vector.path().display())?;
        }
        Ok(())
    }

    pub fn summary(&mut self, report: &RunReport, files: &ReportFiles) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "{}", "=".repeat(60))?;
        write!(self.out, "SUMMARY: ")?;
        self.colored(Color::Green, false, &format!("{} passed", report.passed()))?;
        write!(self.out, ", ")?;
        let failed_color = if report.failed() > 0 { Color::Red } else { Color::Green };
        self.colored(failed_color, false, &format!("{} failed", report.failed()))?;
        writeln!(self.out, ", {} total", report.total())?;
        writeln!(self.out, "Parity: {:.1}%", report.parity())?;
        writeln!(self.out, "Results saved: {}", files.results.display())?;
        self.out.flush()
    }

    /// Per-target lines followed by the summary.
    pub fn report(&mut self, report: &RunReport, files: &ReportFiles) -> io::Result<()> {
        let total = report.total();
        for (i, target) in report.targets.iter().enumerate() {
            self.target(i + 1, total, target)?;
        }
        self.summary(report, files)
    }
}

fn mode_label(mode: &Mode) -> String {
    match mode {
        Mode::Serialize => "serialize".to_string(),
        Mode::Lens(lens) => format!("lens ({})", lens.as_str()),
        Mode::Artifacts(agent) => format!("artifacts ({})", agent.as_str()),
    }
}
