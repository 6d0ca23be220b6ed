//! Command-line interface for `pm_coach`.
//!
//! # Examples
//!
//! ```bash
//! # Compare serialization of one checkout
//! pm_coach ~/src/requests
//!
//! # A list of checkouts, four at a time, keeping vectors for failures
//! pm_coach targets.txt -j 4 --generate-vectors -o coach_results
//!
//! # Byte-exact comparison of the Gemini instruction artifacts
//! pm_coach ~/src/flask --artifacts --agent gemini --snapshot
//! ```

use std::path::PathBuf;

use clap::Parser;

use crate::harness::{AgentTarget, Lens};
use crate::logging::LogFormat;

/// Differential testing of pm_encoder implementations.
///
/// Runs the reference and candidate engines against each target and
/// classifies every difference in their output.
#[derive(Parser, Debug, Clone)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "CLI flags are naturally bools"
)]
#[command(
    name = "pm_coach",
    author,
    version,
    about = "Differential testing: reference vs candidate pm_encoder",
    long_about = "Runs two pm_encoder implementations against the same checkouts and \
                  classifies every difference in their output."
)]
pub struct Cli {
    /// Target directory, or a file listing one directory per line
    pub target: String,

    /// Directory for results, summary and vectors
    #[arg(long, short = 'o', env = "PM_COACH_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Write a test vector for every failing target
    #[arg(long)]
    pub generate_vectors: bool,

    /// Compare output filtered through a lens
    #[arg(long, value_enum)]
    pub lens: Option<Lens>,

    /// Compare generated instruction artifacts instead of stdout
    #[arg(long, conflicts_with = "lens")]
    pub artifacts: bool,

    /// Which instruction file artifact mode generates
    #[arg(long, value_enum, requires = "artifacts")]
    pub agent: Option<AgentTarget>,

    /// Reference entry point, relative to the project root
    #[arg(long)]
    pub reference_entry: Option<PathBuf>,

    /// Interpreter for the reference entry point ("" for none)
    #[arg(long)]
    pub reference_launcher: Option<String>,

    /// Candidate entry point, relative to the project root
    #[arg(long)]
    pub candidate_entry: Option<PathBuf>,

    /// Interpreter for the candidate entry point ("" for none)
    #[arg(long)]
    pub candidate_launcher: Option<String>,

    /// Project root, skipping discovery
    #[arg(long, env = "PM_COACH_PROJECT_ROOT")]
    pub project_root: Option<PathBuf>,

    /// File that identifies the project root
    #[arg(long)]
    pub marker: Option<String>,

    /// Per-engine timeout in seconds
    #[arg(long, env = "PM_COACH_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Targets processed concurrently
    #[arg(long, short = 'j', env = "PM_COACH_JOBS")]
    pub jobs: Option<usize>,

    /// Run each target in a temporary copy
    #[arg(long)]
    pub snapshot: bool,

    /// JSON configuration file; flags override its values
    #[arg(long, env = "PM_COACH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the first diff lines of failing targets
    #[arg(long)]
    pub show_diffs: bool,

    /// Force color output off
    ///
    /// Respects the `NO_COLOR` environment variable
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,

    /// Enable verbose logging
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log line format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "PM_COACH_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Parse command line arguments.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create CLI from iterator (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if argument parsing fails.
    pub fn try_parse_from<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(iter)
    }

    /// Check if colors should be used.
    #[must_use]
    pub const fn use_color(&self) -> bool {
        !self.no_color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::try_parse_from(["pm_coach", "repo"]).unwrap();

        assert_eq!(cli.target, "repo");
        assert!(cli.output.is_none());
        assert!(cli.lens.is_none());
        assert!(!cli.artifacts);
        assert!(!cli.generate_vectors);
        assert!(!cli.snapshot);
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn cli_requires_target() {
        assert!(Cli::try_parse_from(["pm_coach"]).is_err());
    }

    #[test]
    fn cli_parses_lens() {
        let cli = Cli::try_parse_from(["pm_coach", "repo", "--lens", "security"]).unwrap();
        assert_eq!(cli.lens, Some(Lens::Security));

        assert!(Cli::try_parse_from(["pm_coach", "repo", "--lens", "bogus"]).is_err());
    }

    #[test]
    fn cli_parses_artifacts() {
        let cli =
            Cli::try_parse_from(["pm_coach", "repo", "--artifacts", "--agent", "gemini"]).unwrap();
        assert!(cli.artifacts);
        assert_eq!(cli.agent, Some(AgentTarget::Gemini));
    }

    #[test]
    fn cli_agent_requires_artifacts() {
        assert!(Cli::try_parse_from(["pm_coach", "repo", "--agent", "claude"]).is_err());
    }

    #[test]
    fn cli_lens_conflicts_with_artifacts() {
        let result = Cli::try_parse_from(["pm_coach", "repo", "--artifacts", "--lens", "debug"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_execution_options() {
        let cli = Cli::try_parse_from([
            "pm_coach",
            "targets.txt",
            "-j",
            "4",
            "--timeout-secs",
            "30",
            "-o",
            "out",
            "--snapshot",
            "--generate-vectors",
        ])
        .unwrap();
        assert_eq!(cli.jobs, Some(4));
        assert_eq!(cli.timeout_secs, Some(30));
        assert_eq!(cli.output, Some(PathBuf::from("out")));
        assert!(cli.snapshot);
        assert!(cli.generate_vectors);
    }

    #[test]
    fn cli_parses_engine_overrides() {
        let cli = Cli::try_parse_from([
            "pm_coach",
            "repo",
            "--reference-entry",
            "legacy/pm_encoder.py",
            "--candidate-launcher",
            "",
            "--project-root",
            "/opt/pm",
        ])
        .unwrap();
        assert_eq!(cli.reference_entry, Some(PathBuf::from("legacy/pm_encoder.py")));
        assert_eq!(cli.candidate_launcher.as_deref(), Some(""));
        assert_eq!(cli.project_root, Some(PathBuf::from("/opt/pm")));
    }

    #[test]
    fn cli_parses_verbose() {
        let cli = Cli::try_parse_from(["pm_coach", "repo", "-vv", "--log-format", "json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn cli_help_works() {
        let result = Cli::try_parse_from(["pm_coach", "--help"]);
        assert!(result.is_err());
    }
}
