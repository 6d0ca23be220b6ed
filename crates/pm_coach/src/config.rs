//! Runtime configuration for `pm_coach`.
//!
//! [`CoachConfig`] is the single source of truth for a run, independent of
//! whether a value came from a JSON file, a flag or an environment variable.
//! Flags override the file.
//!
//! # Examples
//!
//! ```json
//! {
//!   "reference": { "label": "python", "launcher": "python3", "entry": "pm_encoder.py" },
//!   "candidate": { "label": "rust", "entry": "rust/target/release/pm_encoder" },
//!   "timeout_secs": 60,
//!   "mode": { "kind": "lens", "value": "security" },
//!   "jobs": 4
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::error::{CoachError, Result};
use crate::harness::{
    DEFAULT_MARKER, DEFAULT_TIMEOUT, EnginePair, EngineSpec, Mode, ProcessRunner, ProjectRoot,
};

/// Default output directory, relative to the working directory.
pub const DEFAULT_OUTPUT_DIR: &str = "pm_coach_results";

/// Everything a run needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    /// Implementation A.
    pub reference: EngineSpec,
    /// Implementation B.
    pub candidate: EngineSpec,
    /// Explicit project root; discovered from `marker` when absent.
    pub project_root: Option<PathBuf>,
    pub marker: String,
    pub timeout_secs: u64,
    pub mode: Mode,
    pub jobs: usize,
    pub output_dir: PathBuf,
    pub generate_vectors: bool,
    pub snapshot: bool,
    /// Print diff excerpts of failing targets to the console.
    pub verbose_diffs: bool,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            reference: EngineSpec::reference(),
            candidate: EngineSpec::candidate(),
            project_root: None,
            marker: DEFAULT_MARKER.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            mode: Mode::Serialize,
            jobs: 1,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            generate_vectors: false,
            snapshot: false,
            verbose_diffs: false,
        }
    }
}

impl CoachConfig {
    /// Read a JSON configuration file. Missing keys take default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| CoachError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| CoachError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Resolve the configuration for a command line: the `--config` file
    /// (if any) with every given flag applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unusable or the result fails validation.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if cli.artifacts {
            let configured = match config.mode {
                Mode::Artifacts(agent) => Some(agent),
                _ => None,
            };
            config.mode = Mode::Artifacts(cli.agent.or(configured).unwrap_or_default());
        } else if let Some(lens) = cli.lens {
            config.mode = Mode::Lens(lens);
        }

        override_engine(
            &mut config.reference,
            cli.reference_entry.as_ref(),
            cli.reference_launcher.as_deref(),
        );
        override_engine(
            &mut config.candidate,
            cli.candidate_entry.as_ref(),
            cli.candidate_launcher.as_deref(),
        );

        if let Some(root) = &cli.project_root {
            config.project_root = Some(root.clone());
        }
        if let Some(marker) = &cli.marker {
            config.marker.clone_from(marker);
        }
        if let Some(timeout) = cli.timeout_secs {
            config.timeout_secs = timeout;
        }
        if let Some(jobs) = cli.jobs {
            config.jobs = jobs;
        }
        if let Some(output) = &cli.output {
            config.output_dir.clone_from(output);
        }
        config.generate_vectors |= cli.generate_vectors;
        config.snapshot |= cli.snapshot;
        config.verbose_diffs |= cli.show_diffs;

        config.validate()?;
        Ok(config)
    }

    /// Check values that would make every run fail.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(CoachError::Config {
                path: "<resolved>".to_string(),
                reason: reason.to_string(),
            })
        };

        if self.timeout_secs == 0 {
            return invalid("timeout_secs must be greater than zero");
        }
        if self.jobs == 0 {
            return invalid("jobs must be greater than zero");
        }
        if self.marker.is_empty() {
            return invalid("marker must not be empty");
        }
        for (field, engine) in [("reference", &self.reference), ("candidate", &self.candidate)] {
            if engine.entry.as_os_str().is_empty() {
                return invalid(&format!("{field}.entry must not be empty"));
            }
            if engine.label.is_empty() {
                return invalid(&format!("{field}.label must not be empty"));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The configured root, or the first discovered one.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::ProjectRootNotFound`] if no candidate holds the marker.
    pub fn resolve_project_root(&self) -> Result<ProjectRoot> {
        match &self.project_root {
            Some(path) => ProjectRoot::at(path, &self.marker),
            None => ProjectRoot::discover(&self.marker),
        }
    }

    /// Both engines, ready to run.
    ///
    /// # Errors
    ///
    /// Returns an error if the project root cannot be resolved.
    pub fn engines(&self) -> Result<EnginePair> {
        Ok(EnginePair::new(
            self.resolve_project_root()?,
            self.reference.clone(),
            self.candidate.clone(),
            ProcessRunner::new(self.timeout()),
        ))
    }
}

/// An empty launcher string clears the launcher.
fn override_engine(engine: &mut EngineSpec, entry: Option<&PathBuf>, launcher: Option<&str>) {
    if let Some(entry) = entry {
        engine.entry.clone_from(entry);
    }
    if let Some(launcher) = launcher {
        engine.launcher = (!launcher.is_empty()).then(|| launcher.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{AgentTarget, Lens};
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["pm_coach", "repo"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn config_default() {
        let config = CoachConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert_eq!(config.marker, "pm_encoder.py");
        assert_eq!(config.mode, Mode::Serialize);
        assert_eq!(config.jobs, 1);
        assert_eq!(config.reference.launcher.as_deref(), Some("python3"));
        assert!(config.candidate.launcher.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_cli_modes() {
        let config = CoachConfig::from_cli(&cli(&["--lens", "onboarding"])).unwrap();
        assert_eq!(config.mode, Mode::Lens(Lens::Onboarding));

        let config = CoachConfig::from_cli(&cli(&["--artifacts"])).unwrap();
        assert_eq!(config.mode, Mode::Artifacts(AgentTarget::Claude));

        let config = CoachConfig::from_cli(&cli(&["--artifacts", "--agent", "gemini"])).unwrap();
        assert_eq!(config.mode, Mode::Artifacts(AgentTarget::Gemini));
    }

    #[test]
    fn config_from_cli_engine_overrides() {
        let config = CoachConfig::from_cli(&cli(&[
            "--reference-launcher",
            "",
            "--reference-entry",
            "bin/encoder",
            "--candidate-launcher",
            "node",
        ]))
        .unwrap();
        assert!(config.reference.launcher.is_none());
        assert_eq!(config.reference.entry, PathBuf::from("bin/encoder"));
        assert_eq!(config.candidate.launcher.as_deref(), Some("node"));
    }

    #[test]
    fn config_file_then_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coach.json");
        fs::write(
            &path,
            r#"{
                "timeout_secs": 30,
                "jobs": 8,
                "mode": { "kind": "artifacts", "value": "gemini" },
                "generate_vectors": true
            }"#,
        )
        .unwrap();

        let config = CoachConfig::from_cli(&cli(&[
            "--config",
            path.to_str().unwrap(),
            "--jobs",
            "2",
            "--artifacts",
        ]))
        .unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.jobs, 2);
        assert!(config.generate_vectors);
        // --artifacts without --agent keeps the configured agent.
        assert_eq!(config.mode, Mode::Artifacts(AgentTarget::Gemini));
        assert_eq!(config.reference, EngineSpec::reference());
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(CoachConfig::from_cli(&cli(&["--timeout-secs", "0"])).is_err());
        assert!(CoachConfig::from_cli(&cli(&["--jobs", "0"])).is_err());

        let mut config = CoachConfig::default();
        config.candidate.entry = PathBuf::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("candidate.entry"));
    }

    #[test]
    fn config_load_reports_parse_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = CoachConfig::load(&path).unwrap_err();
        assert!(matches!(err, CoachError::Config { .. }));
        assert!(err.is_environment());
    }

    #[test]
    fn explicit_project_root_is_validated() {
        let dir = TempDir::new().unwrap();
        let config = CoachConfig {
            project_root: Some(dir.path().to_path_buf()),
            ..CoachConfig::default()
        };
        assert!(matches!(
            config.resolve_project_root(),
            Err(CoachError::ProjectRootNotFound { .. })
        ));

        fs::write(dir.path().join("pm_encoder.py"), "").unwrap();
        let root = config.resolve_project_root().unwrap();
        assert_eq!(root.path(), dir.path());
    }
}
