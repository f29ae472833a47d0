//! Profile resolution and the top-level run flow shared by all binaries.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};

use crate::command::SystemRunner;
use crate::console::Console;
use crate::error::PipelineError;
use crate::indicator::IndicatorKind;
use crate::jobs::resolve_jobs;
use crate::logging::{self, LogConfig, SECTION, SUCCESS};
use crate::observability::{MetricsSnapshot, log_snapshot};
use crate::pipeline::{PipelineContext, StageRegistry, build_pipeline};
use crate::presets::{PRESET_NAMES, preset};
use crate::profile::Profile;
use crate::stages;
use crate::validation::validate_profile;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub jobs: Option<usize>,
    /// Overrides the profile's `ui.indicator`.
    pub indicator: Option<IndicatorKind>,
    pub dry_run: bool,
    pub report: Option<PathBuf>,
}

pub fn build_registry() -> StageRegistry {
    let mut registry = StageRegistry::new();
    stages::register_defaults(&mut registry);
    registry
}

/// Accepts a preset name or a path to a profile YAML file.
pub fn resolve_profile(reference: &str) -> Result<Profile> {
    if let Some(profile) = preset(reference) {
        return Ok(profile);
    }
    let path = Path::new(reference);
    if path.is_file() {
        return Profile::load(path);
    }
    bail!(
        "'{reference}' is neither a preset ({}) nor a profile file",
        PRESET_NAMES.join(", ")
    )
}

pub fn run_profile(profile: &Profile, options: &RunOptions) -> Result<MetricsSnapshot> {
    let registry = build_registry();
    let report = validate_profile(profile, &registry);
    for warning in &report.warnings {
        warn!(profile = %profile.name, "{warning}");
    }
    if !report.is_ok() {
        for error_msg in &report.errors {
            error!(profile = %profile.name, "{error_msg}");
        }
        bail!(
            "Profile '{}' failed validation with {} error(s)",
            profile.name,
            report.errors.len()
        );
    }

    let executor = build_pipeline(&registry, &profile.pipeline)?;
    if options.dry_run {
        info!(
            "Dry run: profile '{}' has {} stage(s)",
            profile.name,
            profile.pipeline.len()
        );
        for (idx, title) in executor.stage_titles().iter().enumerate() {
            info!("{}. {title}", idx + 1);
        }
        return Ok(MetricsSnapshot::default());
    }

    let jobs = resolve_jobs(options.jobs, profile.build.jobs);
    let indicator = options
        .indicator
        .unwrap_or(profile.ui.indicator)
        .build(&profile.ui.spinner);
    let runner = Arc::new(SystemRunner::new(profile.environment.shell.clone()));
    let mut ctx = PipelineContext::new(profile, jobs, runner, indicator, Console::stdout())?;

    info!(kind = SECTION, jobs, "Starting {} build process", profile.name);
    let outcome = executor.execute(&mut ctx);
    let snapshot = executor.metrics().snapshot();

    let written = options
        .report
        .as_deref()
        .map(|path| write_report(path, &snapshot))
        .transpose();
    outcome.map_err(|err| anyhow!(err).context(format!("{} build failed", profile.name)))?;
    written?;

    log_snapshot(&snapshot);
    info!(
        kind = SUCCESS,
        "{} build completed in {:.2} seconds.",
        profile.name,
        snapshot.total_duration_ms / 1_000.0
    );
    Ok(snapshot)
}

fn write_report(path: &Path, snapshot: &MetricsSnapshot) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    to_writer_pretty(file, snapshot)
        .with_context(|| format!("Failed to write report JSON: {}", path.display()))?;
    info!(report = %path.display(), "Run report written");
    Ok(())
}

/// Logs a failure and converts the outcome into the process exit status
/// (0 on success, 1 on any failure). Stage failures were already logged by
/// the executor.
pub fn exit_status<T>(result: Result<T>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            if err.downcast_ref::<PipelineError>().is_none() {
                error!("{err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Entry point of the argument-less binaries: run one preset with defaults.
pub fn run_preset_main(name: &str) -> ExitCode {
    let config = LogConfig {
        theme: preset(name).map(|p| p.ui.theme).unwrap_or_default(),
        ..LogConfig::default()
    };
    if let Err(err) = logging::init(&config) {
        eprintln!("warning: failed to initialise logging: {err}");
    }
    let result =
        resolve_profile(name).and_then(|profile| run_profile(&profile, &RunOptions::default()));
    let status = exit_status(result);
    logging::shutdown(&config);
    status
}
