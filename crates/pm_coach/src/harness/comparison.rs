//! OutputClassifier - Turning two engine captures into one failure kind
//!
//! Checks run in a fixed priority order and the first one that applies wins:
//!
//! 1. both engines crashed
//! 2. exactly one engine crashed
//! 3. byte-identical stdout (match)
//! 4. same lines in a different order or with different terminators
//!    (checksum mismatch)
//! 5. file set divergence from marker lines (missing / extra file)
//! 6. mojibake or escape sequences in added/removed lines (encoding diff)
//! 7. only marker header annotations differ (analyzer diff)
//! 8. anything else (output mismatch)
//!
//! Crash detection dominates every content check, and structural file-set
//! defects are reported before the opaque textual fallback.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use tracing::debug;

use super::process::{Capture, Side};
use crate::source::RepoMetadata;

/// Maximum number of diff lines kept on a [`RunResult`].
pub const MAX_DIFF_LINES: usize = 50;

/// Number of stderr characters embedded in crash summaries.
pub const STDERR_EXCERPT_CHARS: usize = 200;

/// `++++++++++ path/to/file ...`: exactly ten plus signs, a space, the path.
static MARKER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+{10} ([^\s\[]+)").expect("marker pattern is valid"));

/// Substrings that point at escaped or mis-decoded text.
const ENCODING_MARKERS: &[&str] = &["\\x", "\\u", "â", "ã", "ä", "Ã", "\u{fffd}"];

/// Closed taxonomy of comparison outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// Outputs match
    None,
    OutputMismatch,
    /// Same lines, different order
    ChecksumMismatch,
    MissingFile,
    ExtraFile,
    EncodingDiff,
    AnalyzerDiff,
    CrashA,
    CrashB,
    BothCrash,
    ArtifactMismatch,
    Unknown,
}

impl FailureType {
    pub const ALL: [FailureType; 12] = [
        FailureType::None,
        FailureType::OutputMismatch,
        FailureType::ChecksumMismatch,
        FailureType::MissingFile,
        FailureType::ExtraFile,
        FailureType::EncodingDiff,
        FailureType::AnalyzerDiff,
        FailureType::CrashA,
        FailureType::CrashB,
        FailureType::BothCrash,
        FailureType::ArtifactMismatch,
        FailureType::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FailureType::None => "none",
            FailureType::OutputMismatch => "output_mismatch",
            FailureType::ChecksumMismatch => "checksum_mismatch",
            FailureType::MissingFile => "missing_file",
            FailureType::ExtraFile => "extra_file",
            FailureType::EncodingDiff => "encoding_diff",
            FailureType::AnalyzerDiff => "analyzer_diff",
            FailureType::CrashA => "crash_a",
            FailureType::CrashB => "crash_b",
            FailureType::BothCrash => "both_crash",
            FailureType::ArtifactMismatch => "artifact_mismatch",
            FailureType::Unknown => "unknown",
        }
    }

    /// The only kind that counts as a match.
    pub fn is_match(self) -> bool {
        self == FailureType::None
    }

    pub fn is_crash(self) -> bool {
        matches!(
            self,
            FailureType::CrashA | FailureType::CrashB | FailureType::BothCrash
        )
    }

    /// Crash kind for a single failing side.
    pub fn crash_of(side: Side) -> Self {
        match side {
            Side::A => FailureType::CrashA,
            Side::B => FailureType::CrashB,
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single file differs between the two outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChange {
    /// Reported by A, absent from B
    Missing,
    /// Reported by B, absent from A
    Extra,
    /// Reported by both with different content
    Changed,
}

/// Outcome of the classifier's single decision point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub failure_type: FailureType,
    pub summary: String,
    pub diff_lines: Vec<String>,
    pub file_diff: BTreeMap<String, FileChange>,
}

impl Classification {
    fn new(failure_type: FailureType, summary: impl Into<String>) -> Self {
        Self {
            failure_type,
            summary: summary.into(),
            diff_lines: Vec::new(),
            file_diff: BTreeMap::new(),
        }
    }

    fn with_diff(mut self, mut lines: Vec<String>) -> Self {
        lines.truncate(MAX_DIFF_LINES);
        self.diff_lines = lines;
        self
    }

    fn with_files(mut self, file_diff: BTreeMap<String, FileChange>) -> Self {
        self.file_diff = file_diff;
        self
    }
}

/// One classified comparison of a target.
///
/// Immutable once built; the match flag is derived from the failure kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub target_name: String,
    pub target_origin: String,
    pub file_count: usize,
    pub failure_type: FailureType,
    pub a: Capture,
    pub b: Capture,
    pub diff_summary: String,
    pub diff_lines: Vec<String>,
    pub file_diff: BTreeMap<String, FileChange>,
}

impl RunResult {
    pub fn matched(&self) -> bool {
        self.failure_type.is_match()
    }

    /// Persisted view without raw outputs.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            target_name: self.target_name.clone(),
            target_origin: self.target_origin.clone(),
            matched: self.matched(),
            failure_type: self.failure_type,
            diff_summary: self.diff_summary.clone(),
            file_diff: self.file_diff.clone(),
            a_exit_code: self.a.exit_code,
            b_exit_code: self.b.exit_code,
            a_time_ms: self.a.elapsed_ms,
            b_time_ms: self.b.elapsed_ms,
            file_count: self.file_count,
            diff_line_count: self.diff_lines.len(),
        }
    }
}

/// Entry written to the results file for a differential run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub target_name: String,
    pub target_origin: String,
    #[serde(rename = "match")]
    pub matched: bool,
    pub failure_type: FailureType,
    pub diff_summary: String,
    pub file_diff: BTreeMap<String, FileChange>,
    pub a_exit_code: i32,
    pub b_exit_code: i32,
    pub a_time_ms: u64,
    pub b_time_ms: u64,
    pub file_count: usize,
    pub diff_line_count: usize,
}

/// Classifies pairs of captures. Labels only affect summary text.
#[derive(Debug, Clone)]
pub struct OutputClassifier {
    label_a: String,
    label_b: String,
}

impl Default for OutputClassifier {
    fn default() -> Self {
        Self::new("A", "B")
    }
}

impl OutputClassifier {
    pub fn new(label_a: impl Into<String>, label_b: impl Into<String>) -> Self {
        Self {
            label_a: label_a.into(),
            label_b: label_b.into(),
        }
    }

    fn label(&self, side: Side) -> &str {
        match side {
            Side::A => &self.label_a,
            Side::B => &self.label_b,
        }
    }

    /// Classify and package the result for `target`.
    pub fn classify_run(&self, target: &RepoMetadata, a: Capture, b: Capture) -> RunResult {
        let classification = self.classify(&a, &b);
        debug!(
            target = %target.name,
            failure_type = %classification.failure_type,
            "Classified comparison"
        );
        RunResult {
            target_name: target.name.clone(),
            target_origin: target.origin_url.clone().unwrap_or_default(),
            file_count: target.file_count,
            failure_type: classification.failure_type,
            a,
            b,
            diff_summary: classification.summary,
            diff_lines: classification.diff_lines,
            file_diff: classification.file_diff,
        }
    }

    /// Assign exactly one failure kind to a pair of captures.
    pub fn classify(&self, a: &Capture, b: &Capture) -> Classification {
        match (a.succeeded(), b.succeeded()) {
            (false, false) => Classification::new(
                FailureType::BothCrash,
                format!(
                    "Both crashed: {}={}, {}={}",
                    self.label_a, a.exit_code, self.label_b, b.exit_code
                ),
            ),
            (false, true) => self.crash(Side::A, a),
            (true, false) => self.crash(Side::B, b),
            (true, true) => self.compare_outputs(&a.stdout, &b.stdout),
        }
    }

    /// Summary for a single crashed side.
    pub fn crash(&self, side: Side, capture: &Capture) -> Classification {
        Classification::new(
            FailureType::crash_of(side),
            format!(
                "{} crashed (exit {}): {}",
                self.label(side),
                capture.exit_code,
                excerpt(&capture.stderr, STDERR_EXCERPT_CHARS)
            ),
        )
    }

    fn compare_outputs(&self, a: &str, b: &str) -> Classification {
        if a == b {
            return Classification::new(FailureType::None, "Identical output");
        }

        let a_lines: Vec<&str> = a.lines().collect();
        let b_lines: Vec<&str> = b.lines().collect();

        let mut a_sorted = a_lines.clone();
        let mut b_sorted = b_lines.clone();
        a_sorted.sort_unstable();
        b_sorted.sort_unstable();
        if a_sorted == b_sorted {
            let summary = if a_lines == b_lines {
                "Same lines, different line terminators"
            } else {
                "Same content, different order"
            };
            return Classification::new(FailureType::ChecksumMismatch, summary);
        }

        let diff = line_diff(&a_lines, &b_lines, &self.label_a, &self.label_b, 0);

        let a_files = extract_files(a);
        let b_files = extract_files(b);

        let missing: Vec<&String> = a_files.difference(&b_files).collect();
        if !missing.is_empty() {
            return Classification::new(
                FailureType::MissingFile,
                format!(
                    "{} missing {} file(s): {}",
                    self.label_b,
                    missing.len(),
                    join_paths(&missing)
                ),
            )
            .with_files(tag_files(&missing, FileChange::Missing))
            .with_diff(diff.lines);
        }

        let extra: Vec<&String> = b_files.difference(&a_files).collect();
        if !extra.is_empty() {
            return Classification::new(
                FailureType::ExtraFile,
                format!(
                    "{} extra {} file(s): {}",
                    self.label_b,
                    extra.len(),
                    join_paths(&extra)
                ),
            )
            .with_files(tag_files(&extra, FileChange::Extra))
            .with_diff(diff.lines);
        }

        let changed = changed_files(a, b);

        if diff
            .added
            .iter()
            .chain(diff.removed.iter())
            .any(|line| has_encoding_marker(line))
        {
            return Classification::new(
                FailureType::EncodingDiff,
                format!("Encoding difference ({} diff lines)", diff.lines.len()),
            )
            .with_files(changed)
            .with_diff(diff.lines);
        }

        let touched = diff.added.len() + diff.removed.len();
        if touched > 0
            && diff
                .added
                .iter()
                .chain(diff.removed.iter())
                .all(|line| MARKER_LINE.is_match(line))
        {
            return Classification::new(
                FailureType::AnalyzerDiff,
                format!("Analyzer annotations differ ({touched} header lines)"),
            )
            .with_files(changed)
            .with_diff(diff.lines);
        }

        Classification::new(
            FailureType::OutputMismatch,
            format!(
                "Output differs ({} added, {} removed)",
                diff.added.len(),
                diff.removed.len()
            ),
        )
        .with_files(changed)
        .with_diff(diff.lines)
    }
}

/// Paths named by marker lines in an engine's output.
pub fn extract_files(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(marker_path)
        .map(str::to_string)
        .collect()
}

fn marker_path(line: &str) -> Option<&str> {
    MARKER_LINE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|path| !path.is_empty())
}

/// Lines belonging to each file, from its marker up to the next marker.
fn sections(output: &str) -> BTreeMap<&str, Vec<&str>> {
    let mut sections: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut current: Option<&str> = None;
    for line in output.lines() {
        if let Some(path) = marker_path(line) {
            current = Some(path);
        }
        if let Some(path) = current {
            sections.entry(path).or_default().push(line);
        }
    }
    sections
}

fn changed_files(a: &str, b: &str) -> BTreeMap<String, FileChange> {
    let a_sections = sections(a);
    let b_sections = sections(b);
    a_sections
        .iter()
        .filter(|(path, lines)| b_sections.get(*path).is_some_and(|other| other != *lines))
        .map(|(path, _)| ((*path).to_string(), FileChange::Changed))
        .collect()
}

fn tag_files(paths: &[&String], change: FileChange) -> BTreeMap<String, FileChange> {
    paths.iter().map(|p| ((*p).clone(), change)).collect()
}

fn join_paths(paths: &[&String]) -> String {
    paths
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn has_encoding_marker(line: &str) -> bool {
    ENCODING_MARKERS.iter().any(|marker| line.contains(marker))
        || line.chars().any(|c| c.is_control() && c != '\t')
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Unified diff lines plus the raw added/removed content.
pub(crate) struct LineDiff {
    pub lines: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Unified diff between two line sequences, one output line per entry.
pub(crate) fn line_diff(
    old: &[&str],
    new: &[&str],
    old_label: &str,
    new_label: &str,
    context: usize,
) -> LineDiff {
    let diff = TextDiff::from_slices(old, new);
    let mut unified = diff.unified_diff();
    unified.context_radius(context);

    let mut result = LineDiff {
        lines: Vec::new(),
        added: Vec::new(),
        removed: Vec::new(),
    };
    for hunk in unified.iter_hunks() {
        if result.lines.is_empty() {
            result.lines.push(format!("--- {old_label}"));
            result.lines.push(format!("+++ {new_label}"));
        }
        result.lines.push(hunk.header().to_string());
        for change in hunk.iter_changes() {
            let value = change.value();
            let sign = match change.tag() {
                ChangeTag::Delete => {
                    result.removed.push(value.to_string());
                    '-'
                }
                ChangeTag::Insert => {
                    result.added.push(value.to_string());
                    '+'
                }
                ChangeTag::Equal => ' ',
            };
            result.lines.push(format!("{sign}{value}"));
        }
    }
    result
}
