//! Test vectors - Replayable records of observed mismatches
//!
//! A vector keeps enough to reproduce and recognise a failure (target, mode,
//! engine arguments, failure kind, digests of both outputs) without storing
//! the outputs themselves. Vectors form an append-only corpus: a file that
//! already exists is never rewritten.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::comparison::{FailureType, FileChange};
use super::process::Mode;
use super::traits::TargetOutcome;
use crate::error::{CoachError, Result};

/// What every vector asserts: the two engines agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    #[serde(rename = "match")]
    pub matched: bool,
    pub failure_type: FailureType,
}

impl Default for Expectation {
    fn default() -> Self {
        Self {
            matched: true,
            failure_type: FailureType::None,
        }
    }
}

/// What was observed instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(rename = "match")]
    pub matched: bool,
    pub failure_type: FailureType,
    pub diff_summary: String,
}

/// Persisted record of one non-matching target.
///
/// Field order is the serialization order, and maps are sorted, so the same
/// outcome always produces the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestVector {
    pub name: String,
    pub description: String,
    pub category: String,
    pub failure_type: FailureType,
    pub target: String,
    pub repo_url: String,
    pub mode: Mode,
    /// Arguments both engines received after their entry point.
    pub args: Vec<String>,
    pub expected: Expectation,
    pub actual: Observation,
    /// SHA-256 (lowercase hex) of each compared output, keyed by side and output.
    pub reproduction: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_diff: BTreeMap<String, FileChange>,
}

impl TestVector {
    /// Build a vector for a failing outcome; `None` for a match.
    pub fn from_outcome(outcome: &TargetOutcome, mode: &Mode) -> Option<Self> {
        if outcome.matched() {
            return None;
        }

        let (origin, category, reproduction, file_diff) = match outcome {
            TargetOutcome::Differential(run) => {
                let mut digests = BTreeMap::new();
                digests.insert("a_output".to_string(), sha256_hex(run.a.stdout.as_bytes()));
                digests.insert("b_output".to_string(), sha256_hex(run.b.stdout.as_bytes()));
                (&run.target_origin, "differential", digests, run.file_diff.clone())
            }
            TargetOutcome::Artifact(run) => {
                let mut digests = BTreeMap::new();
                let instruction = run.instruction_file();
                let sides = [("a", Some(&run.a)), ("b", run.b.as_ref())];
                for (side, capture) in sides {
                    let Some(capture) = capture else { continue };
                    if let Some(bytes) = &capture.instruction {
                        digests.insert(format!("{side}_{instruction}"), sha256_hex(bytes));
                    }
                    if let Some(bytes) = &capture.context {
                        digests.insert(format!("{side}_{}", super::artifact::CONTEXT_FILE), sha256_hex(bytes));
                    }
                }
                (&run.target_origin, "artifact", digests, BTreeMap::new())
            }
        };

        let target = outcome.target_name().to_string();
        Some(Self {
            name: format!("pm_coach_{target}"),
            description: format!("Auto-generated from {origin}"),
            category: category.to_string(),
            failure_type: outcome.failure_type(),
            repo_url: origin.clone(),
            target,
            mode: *mode,
            args: mode.args(),
            expected: Expectation::default(),
            actual: Observation {
                matched: false,
                failure_type: outcome.failure_type(),
                diff_summary: outcome.diff_summary().to_string(),
            },
            reproduction,
            file_diff,
        })
    }

    /// `vector_<target>.json`, with unsafe filename characters replaced.
    pub fn file_name(&self) -> String {
        format!("vector_{}.json", sanitize(&self.target))
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| CoachError::json(format!("vector {}", self.name), e))?;
        json.push('\n');
        Ok(json)
    }

    /// Write into `dir` unless a vector for this target already exists.
    pub fn write(&self, dir: &Path) -> Result<VectorWrite> {
        let path = dir.join(self.file_name());
        let json = self.to_json()?;

        match fs::read(&path) {
            Ok(existing) if existing == json.as_bytes() => return Ok(VectorWrite::Unchanged(path)),
            Ok(_) => {
                warn!(path = %path.display(), "Existing vector differs, leaving it untouched");
                return Ok(VectorWrite::Preserved(path));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoachError::io(&path, e)),
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| CoachError::io(&path, e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| CoachError::io(&path, e))?;
        info!(path = %path.display(), failure_type = %self.failure_type, "Vector written");
        Ok(VectorWrite::Created(path))
    }
}

/// What [`TestVector::write`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorWrite {
    Created(PathBuf),
    /// Identical vector already on disk.
    Unchanged(PathBuf),
    /// A different vector already on disk; kept as is.
    Preserved(PathBuf),
}

impl VectorWrite {
    pub fn path(&self) -> &Path {
        match self {
            VectorWrite::Created(path) | VectorWrite::Unchanged(path) | VectorWrite::Preserved(path) => path,
        }
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "target".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::comparison::OutputClassifier;
    use crate::harness::process::{Capture, Lens};
    use crate::source::RepoMetadata;
    use tempfile::TempDir;

    fn failing() -> TargetOutcome {
        let meta = RepoMetadata::new("requests").with_origin("file:///src/requests");
        let run = OutputClassifier::default().classify_run(
            &meta,
            Capture::success("++++++++++ main.py ++++++++++\nprint(1)\n"),
            Capture::success(""),
        );
        TargetOutcome::Differential(run)
    }

    #[test]
    fn matching_outcome_has_no_vector() {
        let run = OutputClassifier::default().classify_run(
            &RepoMetadata::new("same"),
            Capture::success("x"),
            Capture::success("x"),
        );
        assert!(TestVector::from_outcome(&TargetOutcome::Differential(run), &Mode::Serialize).is_none());
    }

    #[test]
    fn vector_records_digests_not_outputs() {
        let vector = TestVector::from_outcome(&failing(), &Mode::Lens(Lens::Debug)).unwrap();
        assert_eq!(vector.name, "pm_coach_requests");
        assert_eq!(vector.description, "Auto-generated from file:///src/requests");
        assert_eq!(vector.category, "differential");
        assert_eq!(vector.failure_type, FailureType::MissingFile);
        assert_eq!(vector.args, vec![".", "--lens", "debug"]);
        assert_eq!(vector.file_diff.get("main.py"), Some(&FileChange::Missing));
        // Digest of the empty string.
        assert_eq!(
            vector.reproduction["b_output"],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        let json = vector.to_json().unwrap();
        assert!(!json.contains("print(1)"));
        assert!(json.contains(r#""match": true"#));
        assert!(json.contains(r#""match": false"#));
    }

    #[test]
    fn serialization_is_idempotent() {
        let first = TestVector::from_outcome(&failing(), &Mode::Serialize).unwrap();
        let second = TestVector::from_outcome(&failing(), &Mode::Serialize).unwrap();
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());

        let parsed: TestVector = serde_json::from_str(&first.to_json().unwrap()).unwrap();
        assert_eq!(parsed, first);
    }

    #[test]
    fn write_is_create_once() {
        let dir = TempDir::new().unwrap();
        let vector = TestVector::from_outcome(&failing(), &Mode::Serialize).unwrap();

        let created = vector.write(dir.path()).unwrap();
        assert!(matches!(created, VectorWrite::Created(_)));
        let bytes = fs::read(created.path()).unwrap();

        assert!(matches!(vector.write(dir.path()).unwrap(), VectorWrite::Unchanged(_)));

        let mut changed = vector.clone();
        changed.actual.diff_summary = "something else".to_string();
        assert!(matches!(changed.write(dir.path()).unwrap(), VectorWrite::Preserved(_)));
        assert_eq!(fs::read(created.path()).unwrap(), bytes);
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize("my repo/../x"), "my_repo_.._x");
        assert_eq!(sanitize(".."), "target");
        assert_eq!(sanitize("flask-2.0"), "flask-2.0");
    }
}
