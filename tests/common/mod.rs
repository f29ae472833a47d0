#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use srcforge::command::{CommandResult, CommandRunner, CommandSpec, SearchPath};
use srcforge::console::{Console, SharedBuffer};
use srcforge::error::PipelineError;
use srcforge::indicator::{BusyIndicator, IndicatorGuard};
use srcforge::pipeline::PipelineContext;
use srcforge::presets::preset;
use srcforge::profile::Profile;

type Effect = Box<dyn Fn(&CommandSpec) + Send + Sync>;

struct Rule {
    pattern: String,
    exit_code: i32,
    output: String,
    effect: Option<Effect>,
}

/// Records every command and answers from a list of substring rules.
/// Commands matching no rule succeed with no output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, pattern: &str, exit_code: i32, output: &str) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            exit_code,
            output: output.to_string(),
            effect: None,
        });
        self
    }

    /// Succeeds and runs `effect`, e.g. to drop a freshly "installed" tool.
    pub fn on(
        mut self,
        pattern: &str,
        effect: impl Fn(&CommandSpec) + Send + Sync + 'static,
    ) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            exit_code: 0,
            output: String::new(),
            effect: Some(Box::new(effect)),
        });
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(CommandSpec::command_line)
            .collect()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        spec: &CommandSpec,
        _search_path: &SearchPath,
    ) -> Result<CommandResult, PipelineError> {
        self.calls.lock().unwrap().push(spec.clone());
        let line = spec.command_line();
        let Some(rule) = self.rules.iter().find(|rule| line.contains(&rule.pattern)) else {
            return Ok(CommandResult {
                exit_code: 0,
                output: String::new(),
            });
        };
        if let Some(effect) = &rule.effect {
            effect(spec);
        }
        Ok(CommandResult {
            exit_code: rule.exit_code,
            output: rule.output.clone(),
        })
    }
}

/// Indicator that logs `start <title>` and `stop <title>` events.
#[derive(Default)]
pub struct RecordingIndicator {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingIndicator {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl BusyIndicator for RecordingIndicator {
    fn start(&self, title: &str, _search_path: &SearchPath) -> IndicatorGuard {
        self.events.lock().unwrap().push(format!("start {title}"));
        let events = self.events.clone();
        let title = title.to_string();
        IndicatorGuard::from_fn(move || events.lock().unwrap().push(format!("stop {title}")))
    }
}

pub struct Harness {
    pub runner: Arc<ScriptedRunner>,
    pub indicator: Arc<RecordingIndicator>,
    pub output: SharedBuffer,
    pub ctx: PipelineContext,
}

/// Context over `profile` with a fixed job count and an isolated search path.
pub fn harness(profile: &Profile, runner: ScriptedRunner, search_dirs: Vec<PathBuf>) -> Harness {
    let runner = Arc::new(runner);
    let indicator = Arc::new(RecordingIndicator::default());
    let output = SharedBuffer::new();
    let ctx = PipelineContext::new(
        profile,
        4,
        runner.clone(),
        indicator.clone(),
        Console::from_writer(output.clone()),
    )
    .unwrap()
    .with_search_path(SearchPath::new(search_dirs));
    Harness {
        runner,
        indicator,
        output,
        ctx,
    }
}

/// Built-in preset relocated under `root`.
pub fn preset_in(name: &str, root: &Path) -> Profile {
    let mut profile = preset(name).unwrap();
    profile.source.directory = root.join("src");
    profile.environment.local_bin = Some(root.join("local-bin"));
    profile
}

#[cfg(unix)]
pub fn install_fake_tool(dir: &Path, name: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}
