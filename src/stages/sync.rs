use std::fs;

use anyhow::Result;
use tracing::info;

use super::{ensure_consumed, take_string};
use crate::command::CommandSpec;
use crate::error::PipelineError;
use crate::pipeline::{PipelineContext, Stage, StageParameters};
use crate::profile::SyncTool;

/// Which path the sync stage took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The marker was missing; the tree was initialized and fetched.
    Initialized,
    /// The tree existed and was brought up to date.
    Updated,
    /// The tree existed and already matched the remote.
    UpToDate,
}

/// Fetches or updates the profile's source tree.
///
/// The marker (`.repo`, `.git`, or the profile's own) decides between the
/// init path and the update path; init never runs on an initialized tree.
#[derive(Debug, Default)]
pub struct SyncStage {
    title: Option<String>,
}

impl SyncStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_params(mut params: StageParameters) -> Result<Self> {
        let title = take_string(&mut params, "title");
        ensure_consumed("sync", &params)?;
        Ok(Self { title })
    }

    pub fn sync(&self, ctx: &PipelineContext) -> Result<SyncOutcome, PipelineError> {
        let dir = ctx.source_dir();
        fs::create_dir_all(dir)
            .map_err(|err| PipelineError::io(format!("failed to create {}", dir.display()), err))?;

        let initialized = ctx.source.marker_path().exists();
        let outcome = match (ctx.source.tool, initialized) {
            (SyncTool::Repo, false) => repo_init(ctx)?,
            (SyncTool::Repo, true) => {
                info!("Repo already initialized. Syncing...");
                repo_sync(ctx)?;
                SyncOutcome::Updated
            }
            (SyncTool::Git, false) => git_clone(ctx)?,
            (SyncTool::Git, true) => git_update(ctx)?,
        };
        Ok(outcome)
    }
}

impl Stage for SyncStage {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| "Syncing source tree".to_string())
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let outcome = self.sync(ctx)?;
        let directory = ctx.source_dir().display().to_string();
        match outcome {
            SyncOutcome::Initialized => info!(%directory, "Source tree initialized"),
            SyncOutcome::Updated => info!(%directory, "Source tree updated"),
            SyncOutcome::UpToDate => info!(%directory, "Source tree already up to date"),
        }
        Ok(())
    }
}

fn in_source(ctx: &PipelineContext, spec: CommandSpec) -> CommandSpec {
    spec.current_dir(ctx.source_dir())
}

fn repo_init(ctx: &PipelineContext) -> Result<SyncOutcome, PipelineError> {
    let source = &ctx.source;
    let mut init = CommandSpec::new("repo").args([
        "init",
        "-u",
        source.url.as_str(),
        "-b",
        source.branch.as_str(),
    ]);
    if let Some(depth) = source.depth {
        init = init.arg(format!("--depth={depth}"));
    }
    ctx.execute(&in_source(ctx, init))?;
    repo_sync(ctx)?;
    Ok(SyncOutcome::Initialized)
}

fn repo_sync(ctx: &PipelineContext) -> Result<(), PipelineError> {
    let sync = CommandSpec::new("repo")
        .args(["sync", "-j"])
        .arg(ctx.jobs.to_string());
    ctx.execute(&in_source(ctx, sync))?;
    Ok(())
}

fn git_clone(ctx: &PipelineContext) -> Result<SyncOutcome, PipelineError> {
    let source = &ctx.source;
    let mut clone = CommandSpec::new("git").arg("clone");
    if let Some(depth) = source.depth {
        clone = clone.args(["--depth".to_string(), depth.to_string()]);
    }
    clone = clone.args(["--branch", source.branch.as_str(), source.url.as_str(), "."]);
    ctx.execute(&in_source(ctx, clone))?;
    Ok(SyncOutcome::Initialized)
}

fn git_update(ctx: &PipelineContext) -> Result<SyncOutcome, PipelineError> {
    let source = &ctx.source;
    let head = read_line(ctx, CommandSpec::new("git").args(["rev-parse", "HEAD"]))?;
    let listing = read_line(
        ctx,
        CommandSpec::new("git").args(["ls-remote", "origin", source.branch.as_str()]),
    )?;

    if parse_remote_ref(&listing).is_some_and(|remote| remote == head) {
        info!(commit = %short(&head), "Already at the tip of {}", source.branch);
        return Ok(SyncOutcome::UpToDate);
    }

    let mut fetch = CommandSpec::new("git").arg("fetch");
    if let Some(depth) = source.depth {
        fetch = fetch.args(["--depth".to_string(), depth.to_string()]);
    }
    fetch = fetch.args(["origin", source.branch.as_str()]);
    ctx.execute(&in_source(ctx, fetch))?;
    ctx.execute(&in_source(
        ctx,
        CommandSpec::new("git").args(["reset", "--hard", "FETCH_HEAD"]),
    ))?;
    Ok(SyncOutcome::Updated)
}

/// Runs an inspection command in the source tree and returns its trimmed
/// output; failure is fatal like any other command.
fn read_line(ctx: &PipelineContext, spec: CommandSpec) -> Result<String, PipelineError> {
    let spec = in_source(ctx, spec);
    let result = ctx.inspect(&spec)?;
    if !result.success() {
        ctx.echo(&result.output)?;
        return Err(PipelineError::CommandFailed {
            command: spec.command_line(),
            code: result.exit_code,
        });
    }
    Ok(result.output.trim().to_string())
}

/// Picks the commit a `git ls-remote` listing points at, preferring the
/// peeled (`^{}`) entry of an annotated tag.
fn parse_remote_ref(listing: &str) -> Option<String> {
    let entries: Vec<(&str, &str)> = listing
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .collect();
    entries
        .iter()
        .find(|(_, name)| name.ends_with("^{}"))
        .or_else(|| entries.first())
        .map(|(sha, _)| sha.trim().to_string())
}

fn short(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}
