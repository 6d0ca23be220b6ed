#![forbid(unsafe_code)]

//! `pm_coach` binary.
//!
//! Exit status: 0 when every target matched, 1 when any target failed,
//! 2 on a fatal environment or I/O error.

use std::process::ExitCode;

use anyhow::Context;
use tracing::{error, info};

use pm_coach::cli::Cli;
use pm_coach::config::CoachConfig;
use pm_coach::harness::{
    Aggregator, ArtifactComparator, ConsoleReporter, DifferentialRunner, Harness, Mode,
};
use pm_coach::logging;
use pm_coach::source::load_targets;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    if let Err(e) = logging::init(cli.verbose, cli.log_format) {
        eprintln!("warning: logging disabled: {e}");
    }

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %format!("{e:#}"), "Run aborted");
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every target matched.
fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = CoachConfig::from_cli(cli)?;
    let targets = load_targets(&cli.target)?;
    let engines = config.engines()?;
    info!(root = %engines.root().path().display(), targets = targets.len(), "Engines resolved");

    let harness: Box<dyn Harness> = match config.mode {
        Mode::Artifacts(agent) => Box::new(ArtifactComparator::new(engines, agent)),
        mode => Box::new(DifferentialRunner::new(engines, mode)),
    };

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("creating output directory {}", config.output_dir.display())
    })?;

    let mut console = ConsoleReporter::stdout(cli.use_color(), config.verbose_diffs);
    console
        .header(targets.len(), &config.mode, &config.output_dir)
        .context("writing console header")?;

    let mut aggregator = Aggregator::new(harness.as_ref())
        .jobs(config.jobs)
        .snapshot(config.snapshot);
    if config.generate_vectors {
        aggregator = aggregator.vectors_into(&config.output_dir);
    }

    let report = aggregator.run(&targets)?;
    let files = report.write(&config.output_dir)?;
    console
        .report(&report, &files)
        .context("writing console report")?;

    Ok(report.all_passed())
}
