use std::fs;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ensure_consumed, take_string};
use crate::command::CommandSpec;
use crate::error::PipelineError;
use crate::pipeline::{PipelineContext, Stage, StageParameters};

const REPO_LAUNCHER_URL: &str = "https://storage.googleapis.com/git-repo-downloads/repo";

/// One way of installing a missing tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstallerSpec {
    /// Program that must be on the search path for this installer to be picked.
    pub requires: String,
    /// Install command; `{tool}` and the pipeline placeholders are expanded.
    pub argv: Vec<String>,
    #[serde(default)]
    pub elevated: bool,
}

impl InstallerSpec {
    fn new(requires: &str, argv: &[&str], elevated: bool) -> Self {
        Self {
            requires: requires.to_string(),
            argv: argv.iter().map(|arg| (*arg).to_string()).collect(),
            elevated,
        }
    }
}

/// Installers tried, in order, when `tool` is missing.
pub fn default_installers(tool: &str) -> Vec<InstallerSpec> {
    match tool {
        "repo" => {
            let download = format!(
                "mkdir -p '{{bin_dir}}' && curl -fsSL {REPO_LAUNCHER_URL} -o '{{bin_dir}}/repo' && chmod 0755 '{{bin_dir}}/repo'"
            );
            vec![
                InstallerSpec::new("curl", &["sh", "-c", &download], false),
                InstallerSpec::new("apt-get", &["apt-get", "install", "-y", "repo"], true),
                InstallerSpec::new("dnf", &["dnf", "install", "-y", "repo"], true),
                InstallerSpec::new("pacman", &["pacman", "-S", "--noconfirm", "repo"], true),
                InstallerSpec::new("brew", &["brew", "install", "repo"], false),
            ]
        }
        "gum" => vec![
            InstallerSpec::new("brew", &["brew", "install", "gum"], false),
            InstallerSpec::new("pacman", &["pacman", "-S", "--noconfirm", "gum"], true),
            InstallerSpec::new(
                "go",
                &[
                    "sh",
                    "-c",
                    "GOBIN='{bin_dir}' go install github.com/charmbracelet/gum@latest",
                ],
                false,
            ),
        ],
        _ => vec![
            InstallerSpec::new("apt-get", &["apt-get", "install", "-y", "{tool}"], true),
            InstallerSpec::new("dnf", &["dnf", "install", "-y", "{tool}"], true),
            InstallerSpec::new("pacman", &["pacman", "-S", "--noconfirm", "{tool}"], true),
            InstallerSpec::new("brew", &["brew", "install", "{tool}"], false),
        ],
    }
}

/// Makes sure a helper tool is on the search path, installing it if needed.
pub struct PrerequisiteStage {
    tool: String,
    title: Option<String>,
    installers: Vec<InstallerSpec>,
}

impl PrerequisiteStage {
    pub fn new(tool: impl Into<String>, installers: Vec<InstallerSpec>) -> Self {
        Self {
            tool: tool.into(),
            title: None,
            installers,
        }
    }

    pub fn from_params(mut params: StageParameters) -> Result<Self> {
        let tool = take_string(&mut params, "tool")
            .filter(|tool| !tool.trim().is_empty())
            .ok_or_else(|| anyhow!("prerequisite stage requires a 'tool' parameter"))?;
        let title = take_string(&mut params, "title");
        let installers = match params.remove("installers") {
            Some(value) => serde_json::from_value(value)
                .context("'installers' must be a list of {requires, argv, elevated}")?,
            None => default_installers(&tool),
        };
        ensure_consumed("prerequisite", &params)?;
        Ok(Self {
            tool,
            title,
            installers,
        })
    }

    fn install(
        &self,
        ctx: &PipelineContext,
        installer: &InstallerSpec,
    ) -> Result<(), PipelineError> {
        fs::create_dir_all(&ctx.local_bin).map_err(|err| {
            PipelineError::io(
                format!("failed to create {}", ctx.local_bin.display()),
                err,
            )
        })?;

        let mut argv = installer
            .argv
            .iter()
            .map(|arg| ctx.expand(&arg.replace("{tool}", &self.tool)));
        let program = argv.next().unwrap_or_else(|| installer.requires.clone());
        let spec = CommandSpec::new(program).args(argv);
        let spec = if installer.elevated {
            ctx.elevated(spec)
        } else {
            spec
        };
        ctx.execute(&spec)?;
        Ok(())
    }
}

impl Stage for PrerequisiteStage {
    fn name(&self) -> &'static str {
        "prerequisite"
    }

    fn title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("Checking for {}", self.tool))
    }

    fn shows_indicator(&self) -> bool {
        false
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let tool = self.tool.as_str();
        if let Some(path) = ctx.search_path.locate(tool) {
            info!(path = %path.display(), "{tool} already installed");
            return Ok(());
        }

        let local_bin = ctx.local_bin.clone();
        if ctx.search_path.prepend(&local_bin) {
            info!("Added {} to PATH for this run", local_bin.display());
            if let Some(path) = ctx.search_path.locate(tool) {
                info!(path = %path.display(), "{tool} found in local bin directory");
                return Ok(());
            }
        }

        let Some(installer) = self
            .installers
            .iter()
            .find(|installer| ctx.search_path.locate(&installer.requires).is_some())
        else {
            let tried = self
                .installers
                .iter()
                .map(|installer| installer.requires.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(PipelineError::MissingPrerequisite {
                tool: tool.to_string(),
                hint: format!(
                    "no supported installer found (looked for: {}). Install {tool} manually and make sure it is on PATH",
                    if tried.is_empty() { "none configured" } else { tried.as_str() }
                ),
            });
        };

        info!(installer = %installer.requires, "Installing {tool}...");
        self.install(ctx, installer)?;

        match ctx.search_path.locate(tool) {
            Some(path) => {
                info!(path = %path.display(), "{tool} installed");
                Ok(())
            }
            None => Err(PipelineError::MissingPrerequisite {
                tool: tool.to_string(),
                hint: format!(
                    "installation via {} finished but {tool} is still not on PATH",
                    installer.requires
                ),
            }),
        }
    }
}
