use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::indicator::IndicatorKind;
use crate::logging::Theme;
use crate::pipeline::StageSpec;

/// One pipeline variant: where the source comes from, how it is built,
/// and which stages run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    pub version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: SourceSpec,
    #[serde(default)]
    pub build: BuildSpec,
    #[serde(default)]
    pub environment: EnvironmentSpec,
    #[serde(default)]
    pub ui: UiSpec,
    pub pipeline: Vec<StageSpec>,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse profile YAML: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncTool {
    Repo,
    Git,
}

impl SyncTool {
    pub fn program(self) -> &'static str {
        match self {
            SyncTool::Repo => "repo",
            SyncTool::Git => "git",
        }
    }

    pub fn default_marker(self) -> &'static str {
        match self {
            SyncTool::Repo => ".repo",
            SyncTool::Git => ".git",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceSpec {
    pub tool: SyncTool,
    pub url: String,
    /// Branch, tag, or manifest revision.
    pub branch: String,
    pub directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<PathBuf>,
    /// Shallow clone depth. Shallow trees stay shallow on update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

impl SourceSpec {
    pub fn marker_path(&self) -> PathBuf {
        match &self.marker {
            Some(marker) => self.directory.join(marker),
            None => self.directory.join(self.tool.default_marker()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BuildSpec {
    /// Android lunch target, e.g. `aosp_cf_x86_64-userdebug`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvironmentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_bin: Option<PathBuf>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_elevate")]
    pub elevate: String,
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        Self {
            local_bin: None,
            shell: default_shell(),
            elevate: default_elevate(),
        }
    }
}

impl EnvironmentSpec {
    /// Directory for user-installed helper tools, `~/.local/bin` unless set.
    pub fn local_bin_dir(&self) -> Result<PathBuf> {
        resolve_local_bin(self.local_bin.as_deref(), dirs::home_dir())
    }
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_elevate() -> String {
    "sudo".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UiSpec {
    #[serde(default)]
    pub indicator: IndicatorKind,
    #[serde(default = "default_spinner")]
    pub spinner: String,
    #[serde(default)]
    pub theme: Theme,
}

impl Default for UiSpec {
    fn default() -> Self {
        Self {
            indicator: IndicatorKind::default(),
            spinner: default_spinner(),
            theme: Theme::default(),
        }
    }
}

fn default_spinner() -> String {
    "dots".to_string()
}

fn resolve_local_bin(local_bin: Option<&Path>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = local_bin.filter(|dir| !dir.starts_with("~")) {
        return Ok(dir.to_path_buf());
    }
    let home = home.context(
        "Cannot determine the home directory; set environment.local_bin to an absolute path",
    )?;
    Ok(match local_bin {
        Some(dir) => match dir.strip_prefix("~") {
            Ok(rest) => home.join(rest),
            Err(_) => dir.to_path_buf(),
        },
        None => home.join(".local").join("bin"),
    })
}
