use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use serde_json::Value;

use crate::command::{CommandSpec, OutputMode};
use crate::error::PipelineError;
use crate::pipeline::{PipelineContext, Stage, StageParameters, StageRegistry};

pub mod prerequisite;
pub mod sync;

pub use prerequisite::{InstallerSpec, PrerequisiteStage, default_installers};
pub use sync::SyncStage;

pub fn register_defaults(registry: &mut StageRegistry) {
    registry.register("prerequisite", |params| {
        Ok(Box::new(PrerequisiteStage::from_params(params)?))
    });
    registry.register("sync", |params| Ok(Box::new(SyncStage::from_params(params)?)));
    registry.register("make", |params| Ok(Box::new(MakeStage::from_params(params)?)));
    registry.register("shell", |params| {
        Ok(Box::new(ShellStage::from_params(params)?))
    });
    registry.register("command", |params| {
        Ok(Box::new(CommandStage::from_params(params)?))
    });
}

/// Parameters shared by every command-running stage.
#[derive(Debug, Clone, Default)]
struct StageOptions {
    title: Option<String>,
    dir: Option<PathBuf>,
    output: OutputMode,
    elevated: bool,
}

impl StageOptions {
    fn take(params: &mut StageParameters) -> Result<Self> {
        Ok(Self {
            title: take_string(params, "title"),
            dir: take_string(params, "dir").map(PathBuf::from),
            output: take_output_mode(params)?,
            elevated: take_bool(params, "elevated")?.unwrap_or(false),
        })
    }

    fn finish(&self, ctx: &PipelineContext, spec: CommandSpec) -> CommandSpec {
        let spec = spec
            .current_dir(ctx.working_dir(self.dir.as_deref()))
            .output(self.output);
        if self.elevated {
            ctx.elevated(spec)
        } else {
            spec
        }
    }
}

/// `make [-j N] TARGET… VAR=VALUE…` in the source tree.
struct MakeStage {
    options: StageOptions,
    program: String,
    targets: Vec<String>,
    vars: BTreeMap<String, String>,
    jobs: bool,
}

impl MakeStage {
    fn from_params(mut params: StageParameters) -> Result<Self> {
        let options = StageOptions::take(&mut params)?;
        let program = take_string(&mut params, "program").unwrap_or_else(|| "make".to_string());
        let targets = take_string_list(&mut params, "targets")?.unwrap_or_default();
        let vars = take_string_map(&mut params, "vars")?.unwrap_or_default();
        let jobs = take_bool(&mut params, "jobs")?.unwrap_or(false);
        ensure_consumed("make", &params)?;
        Ok(Self {
            options,
            program,
            targets,
            vars,
            jobs,
        })
    }
}

impl Stage for MakeStage {
    fn name(&self) -> &'static str {
        "make"
    }

    fn title(&self) -> String {
        self.options.title.clone().unwrap_or_else(|| {
            std::iter::once(self.program.as_str())
                .chain(self.targets.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        })
    }

    fn shows_indicator(&self) -> bool {
        self.options.output == OutputMode::Captured
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let mut spec = CommandSpec::new(&self.program);
        if self.jobs {
            spec = spec.args(["-j".to_string(), ctx.jobs.to_string()]);
        }
        spec = spec.args(self.targets.iter().map(|target| ctx.expand(target)));
        spec = spec.args(
            self.vars
                .iter()
                .map(|(key, value)| format!("{key}={}", ctx.expand(value))),
        );
        let spec = self.options.finish(ctx, spec);
        ctx.execute(&spec)?;
        Ok(())
    }
}

/// Script run through the profile's shell, so `source` and friends work.
struct ShellStage {
    options: StageOptions,
    script: String,
}

impl ShellStage {
    fn from_params(mut params: StageParameters) -> Result<Self> {
        let options = StageOptions::take(&mut params)?;
        let script = take_string(&mut params, "script")
            .filter(|script| !script.trim().is_empty())
            .ok_or_else(|| anyhow!("shell stage requires a non-empty 'script' parameter"))?;
        ensure_consumed("shell", &params)?;
        Ok(Self { options, script })
    }
}

impl Stage for ShellStage {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn title(&self) -> String {
        self.options
            .title
            .clone()
            .unwrap_or_else(|| format!("Running script: {}", self.script))
    }

    fn shows_indicator(&self) -> bool {
        self.options.output == OutputMode::Captured
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let spec = self
            .options
            .finish(ctx, CommandSpec::script(ctx.expand(&self.script)));
        ctx.execute(&spec)?;
        Ok(())
    }
}

struct CommandStage {
    options: StageOptions,
    argv: Vec<String>,
}

impl CommandStage {
    fn from_params(mut params: StageParameters) -> Result<Self> {
        let options = StageOptions::take(&mut params)?;
        let argv = take_string_list(&mut params, "argv")?
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| anyhow!("command stage requires a non-empty 'argv' parameter"))?;
        ensure_consumed("command", &params)?;
        Ok(Self { options, argv })
    }
}

impl Stage for CommandStage {
    fn name(&self) -> &'static str {
        "command"
    }

    fn title(&self) -> String {
        self.options
            .title
            .clone()
            .unwrap_or_else(|| self.argv.join(" "))
    }

    fn shows_indicator(&self) -> bool {
        self.options.output == OutputMode::Captured
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let mut argv = self.argv.iter().map(|arg| ctx.expand(arg));
        let program = argv.next().unwrap_or_default();
        let spec = self
            .options
            .finish(ctx, CommandSpec::new(program).args(argv));
        ctx.execute(&spec)?;
        Ok(())
    }
}

fn take_string(params: &mut StageParameters, key: &str) -> Option<String> {
    params.remove(key).and_then(|value| match value {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    })
}

fn take_bool(params: &mut StageParameters, key: &str) -> Result<Option<bool>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(flag)),
        Some(Value::String(s)) => match s.to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            _ => bail!("'{key}' must be a boolean, got '{s}'"),
        },
        Some(other) => bail!("'{key}' must be a boolean, got {other}"),
    }
}

/// Accepts a list of scalars or a single whitespace-separated string.
fn take_string_list(params: &mut StageParameters, key: &str) -> Result<Option<Vec<String>>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.split_whitespace().map(str::to_string).collect())),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| {
                scalar_to_string(item).ok_or_else(|| anyhow!("'{key}' entries must be scalars"))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(other) => bail!("'{key}' must be a list, got {other}"),
    }
}

fn take_string_map(
    params: &mut StageParameters,
    key: &str,
) -> Result<Option<BTreeMap<String, String>>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(entries)) => entries
            .into_iter()
            .map(|(name, value)| {
                scalar_to_string(value)
                    .map(|value| (name.clone(), value))
                    .ok_or_else(|| anyhow!("'{key}.{name}' must be a scalar"))
            })
            .collect::<Result<BTreeMap<_, _>>>()
            .map(Some),
        Some(other) => bail!("'{key}' must be a mapping, got {other}"),
    }
}

fn take_output_mode(params: &mut StageParameters) -> Result<OutputMode> {
    match params.remove("output") {
        None | Some(Value::Null) => Ok(OutputMode::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|err| anyhow!("'output' must be 'captured' or 'streamed': {err}")),
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn ensure_consumed(stage: &str, params: &StageParameters) -> Result<()> {
    if params.is_empty() {
        return Ok(());
    }
    let mut unknown: Vec<_> = params.keys().map(String::as_str).collect();
    unknown.sort_unstable();
    bail!(
        "{stage} stage does not accept parameter(s): {}",
        unknown.join(", ")
    )
}
