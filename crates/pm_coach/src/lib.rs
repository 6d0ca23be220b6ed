#![forbid(unsafe_code)]

//! # pm_coach
//!
//! Differential testing of two pm_encoder implementations.
//!
//! Every target directory is serialized by a reference engine (A) and a
//! candidate engine (B). The two outputs are classified into exactly one
//! [`FailureType`], non-matching results can be persisted as replayable
//! [`TestVector`]s, and a whole target list is summarised as a parity
//! percentage.
//!
//! ## Modes
//!
//! - **serialize**: compare stdout of `<engine> .`
//! - **lens**: compare stdout of `<engine> . --lens <lens>`
//! - **artifacts**: compare the files written by
//!   `<engine> . --init-prompt --target <agent>` byte for byte
//!
//! ## Example
//!
//! ```rust,ignore
//! use pm_coach::prelude::*;
//!
//! let config = CoachConfig::default();
//! let harness = DifferentialRunner::new(config.engines()?, Mode::Serialize);
//! let report = Aggregator::new(&harness).jobs(4).run(&load_targets("repos.txt")?)?;
//! println!("parity {:.1}%", report.parity());
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod harness;
pub mod logging;
pub mod source;

pub use config::CoachConfig;
pub use error::{CoachError, Result};
pub use harness::{FailureType, TestVector};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::CoachConfig;
    pub use crate::error::{CoachError, Result};
    pub use crate::harness::{
        AgentTarget, Aggregator, ArtifactComparator, ArtifactResult, Capture, ConsoleReporter,
        DifferentialRunner, EnginePair, EngineSpec, FailureType, Harness, Lens, Mode,
        OutputClassifier, ProcessRunner, ProjectRoot, RunReport, RunResult, TargetOutcome,
        TestVector,
    };
    pub use crate::source::{
        LocalRepoSource, RepoMetadata, RepoSource, SnapshotRepoSource, load_targets,
    };
}
