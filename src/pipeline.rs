use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument};

use crate::command::{CommandResult, CommandRunner, CommandSpec, SearchPath};
use crate::console::Console;
use crate::error::PipelineError;
use crate::indicator::{BusyIndicator, IndicatorGuard};
use crate::logging::SECTION;
use crate::observability::MetricsCollector;
use crate::profile::{Profile, SourceSpec};

pub type StageParameters = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StageSpec {
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<StageParameters>,
}

impl StageSpec {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            params: None,
        }
    }

    pub fn with_params(stage: impl Into<String>, params: StageParameters) -> Self {
        Self {
            stage: stage.into(),
            params: Some(params),
        }
    }
}

/// Everything a stage may read or touch while it runs.
pub struct PipelineContext {
    pub source: SourceSpec,
    pub build_target: Option<String>,
    pub jobs: usize,
    /// Search path exported as `PATH` to every child process.
    pub search_path: SearchPath,
    pub local_bin: PathBuf,
    pub shell: String,
    pub elevate: String,
    pub runner: Arc<dyn CommandRunner>,
    pub indicator: Arc<dyn BusyIndicator>,
    pub console: Console,
}

impl PipelineContext {
    pub fn new(
        profile: &Profile,
        jobs: usize,
        runner: Arc<dyn CommandRunner>,
        indicator: Arc<dyn BusyIndicator>,
        console: Console,
    ) -> Result<Self> {
        Ok(Self {
            source: profile.source.clone(),
            build_target: profile.build.target.clone(),
            jobs,
            search_path: SearchPath::from_env(),
            local_bin: profile.environment.local_bin_dir()?,
            shell: profile.environment.shell.clone(),
            elevate: profile.environment.elevate.clone(),
            runner,
            indicator,
            console,
        })
    }

    pub fn with_search_path(mut self, search_path: SearchPath) -> Self {
        self.search_path = search_path;
        self
    }

    pub fn source_dir(&self) -> &Path {
        &self.source.directory
    }

    /// Resolves a stage's `dir` parameter against the source directory.
    pub fn working_dir(&self, relative: Option<&Path>) -> PathBuf {
        match relative {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.source.directory.join(dir),
            None => self.source.directory.clone(),
        }
    }

    /// Substitutes `{jobs}`, `{target}`, `{branch}`, `{url}`, `{directory}`
    /// and `{bin_dir}`. Unknown placeholders are left untouched.
    pub fn expand(&self, template: &str) -> String {
        let directory = self.source.directory.display().to_string();
        let bin_dir = self.local_bin.display().to_string();
        let jobs = self.jobs.to_string();
        let target = self.build_target.as_deref().unwrap_or_default();
        [
            ("{jobs}", jobs.as_str()),
            ("{target}", target),
            ("{branch}", self.source.branch.as_str()),
            ("{url}", self.source.url.as_str()),
            ("{directory}", directory.as_str()),
            ("{bin_dir}", bin_dir.as_str()),
        ]
        .iter()
        .fold(template.to_string(), |acc, (placeholder, value)| {
            acc.replace(placeholder, value)
        })
    }

    /// Runs `spec` through the elevation program, resolving the wrapped
    /// program first since `sudo` resets `PATH`.
    pub fn elevated(&self, spec: CommandSpec) -> CommandSpec {
        let inner: Vec<String> = if spec.shell {
            vec![self.shell.clone(), "-c".to_string(), spec.command_line()]
        } else {
            let located = match spec.cwd.as_deref() {
                Some(dir) => std::path::absolute(dir)
                    .ok()
                    .and_then(|dir| self.search_path.locate_in(&spec.program, &dir)),
                None => self.search_path.locate(&spec.program),
            };
            let program = located
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| spec.program.clone());
            std::iter::once(program).chain(spec.args.iter().cloned()).collect()
        };
        CommandSpec {
            program: self.elevate.clone(),
            args: inner,
            shell: false,
            ..spec
        }
    }

    /// Runs a command whose failure is fatal. Captured output is echoed to
    /// the console before the exit code is checked.
    pub fn execute(&self, spec: &CommandSpec) -> Result<CommandResult, PipelineError> {
        let line = spec.command_line();
        let cwd = spec
            .cwd
            .as_deref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        info!(cwd = %cwd, "Running: {line}");

        let result = self.runner.run(spec, &self.search_path)?;
        self.echo(&result.output)?;
        if !result.success() {
            return Err(PipelineError::CommandFailed {
                command: line,
                code: result.exit_code,
            });
        }
        Ok(result)
    }

    /// Writes captured output to the console verbatim.
    pub fn echo(&self, output: &str) -> Result<(), PipelineError> {
        self.console
            .write_block(output)
            .map_err(|err| PipelineError::io("failed to write command output", err))
    }

    /// Runs an inspection command. Neither echoed nor checked.
    pub fn inspect(&self, spec: &CommandSpec) -> Result<CommandResult, PipelineError> {
        debug!(command = %spec.command_line(), "Inspecting");
        self.runner.run(spec, &self.search_path)
    }
}

pub trait Stage: Send + Sync {
    /// Registry name of the stage kind.
    fn name(&self) -> &'static str;
    /// Human-readable label used for logs and the busy indicator.
    fn title(&self) -> String;
    fn shows_indicator(&self) -> bool {
        true
    }
    fn run(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError>;
}

type StageConstructor = Arc<dyn Fn(StageParameters) -> Result<Box<dyn Stage>> + Send + Sync>;

pub struct StageRegistry {
    factories: HashMap<String, StageConstructor>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(StageParameters) -> Result<Box<dyn Stage>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(constructor));
    }

    pub fn create(&self, name: &str, params: StageParameters) -> Result<Box<dyn Stage>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "Unknown stage '{}'. Available stages: {}",
                name,
                self.known_stages().join(", ")
            )
        })?;
        factory(params)
    }

    pub fn known_stages(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

pub struct PipelineExecutor {
    stages: Vec<Box<dyn Stage>>,
    metrics: MetricsCollector,
}

impl PipelineExecutor {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn stage_titles(&self) -> Vec<String> {
        self.stages.iter().map(|stage| stage.title()).collect()
    }

    /// Runs every stage in order and stops at the first failure.
    #[instrument(skip_all)]
    pub fn execute(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        self.metrics.reset();
        let total_start = Instant::now();
        let outcome = self.run_stages(ctx);
        self.metrics.record_total_duration(total_start.elapsed());
        outcome
    }

    fn run_stages(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        for stage in &self.stages {
            let title = stage.title();
            let span = tracing::span!(tracing::Level::DEBUG, "stage", stage = stage.name());
            let _span_guard = span.enter();
            info!(kind = SECTION, "{title}");

            let mut timer = self.metrics.start_stage(stage.name(), &title);
            let indicator = if stage.shows_indicator() {
                ctx.indicator.start(&title, &ctx.search_path)
            } else {
                IndicatorGuard::inactive()
            };
            let result = stage.run(ctx);
            indicator.stop();

            match result {
                Ok(()) => timer.succeed(),
                Err(err) => {
                    error!(stage = stage.name(), "{title} failed: {err}");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }
}

pub fn build_pipeline(
    stage_registry: &StageRegistry,
    stage_specs: &[StageSpec],
) -> Result<PipelineExecutor> {
    let mut stages = Vec::with_capacity(stage_specs.len());
    for spec in stage_specs {
        let params = spec.params.clone().unwrap_or_default();
        let stage = stage_registry.create(&spec.stage, params)?;
        stages.push(stage);
    }
    Ok(PipelineExecutor::new(stages))
}
