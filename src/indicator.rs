//! Cosmetic busy indicator shown while a stage runs.
//!
//! The indicator is a separate child process (`gum spin`) leading its own
//! process group. It carries no data; when its stage ends the whole group
//! is terminated and the leader reaped, whatever the stage's outcome.

use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::SearchPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum IndicatorKind {
    #[default]
    Gum,
    None,
}

impl IndicatorKind {
    pub fn build(self, spinner: &str) -> Arc<dyn BusyIndicator> {
        match self {
            IndicatorKind::Gum => Arc::new(GumSpinner::new("gum", spinner)),
            IndicatorKind::None => Arc::new(NoIndicator),
        }
    }
}

pub trait BusyIndicator: Send + Sync {
    fn start(&self, title: &str, search_path: &SearchPath) -> IndicatorGuard;
}

enum Running {
    Process(Child),
    Callback(Box<dyn FnOnce() + Send>),
}

/// Time the indicator gets to exit on SIGTERM before the group is killed.
const STOP_GRACE: Duration = Duration::from_millis(500);
const STOP_POLL: Duration = Duration::from_millis(10);

/// Keeps an indicator alive; stopping or dropping it ends the indicator.
#[must_use = "dropping the guard stops the indicator immediately"]
pub struct IndicatorGuard {
    running: Option<Running>,
}

impl IndicatorGuard {
    pub fn inactive() -> Self {
        Self { running: None }
    }

    /// Guard over a spawned indicator. On unix the child should have been
    /// spawned with `process_group(0)` so its own children are stopped too.
    pub fn from_child(child: Child) -> Self {
        Self {
            running: Some(Running::Process(child)),
        }
    }

    /// Guard that runs `on_stop` instead of killing a process.
    pub fn from_fn(on_stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            running: Some(Running::Callback(Box::new(on_stop))),
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }

    pub fn stop(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        match self.running.take() {
            Some(Running::Process(mut child)) => stop_process(&mut child),
            Some(Running::Callback(on_stop)) => on_stop(),
            None => {}
        }
    }
}

impl Drop for IndicatorGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(unix)]
fn stop_process(child: &mut Child) {
    let group = child.id() as libc::pid_t;
    if !signal_group(group, libc::SIGTERM) {
        // Not a group leader; only the child itself can be stopped.
        let _ = child.kill();
        let _ = child.wait();
        return;
    }
    let deadline = Instant::now() + STOP_GRACE;
    loop {
        match child.try_wait() {
            Ok(None) if Instant::now() < deadline => thread::sleep(STOP_POLL),
            Ok(None) => {
                signal_group(group, libc::SIGKILL);
                let _ = child.wait();
                break;
            }
            Ok(Some(_)) | Err(_) => break,
        }
    }
    // Sweep members that outlived the leader.
    signal_group(group, libc::SIGKILL);
}

#[cfg(not(unix))]
fn stop_process(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn signal_group(group: libc::pid_t, signal: libc::c_int) -> bool {
    // SAFETY: killpg only delivers a signal; an unknown group yields ESRCH.
    unsafe { libc::killpg(group, signal) == 0 }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndicator;

impl BusyIndicator for NoIndicator {
    fn start(&self, _title: &str, _search_path: &SearchPath) -> IndicatorGuard {
        IndicatorGuard::inactive()
    }
}

/// `gum spin` wrapped around a sleeper that outlives any stage.
#[derive(Debug, Clone)]
pub struct GumSpinner {
    program: String,
    spinner: String,
}

impl GumSpinner {
    pub fn new(program: impl Into<String>, spinner: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            spinner: spinner.into(),
        }
    }
}

impl BusyIndicator for GumSpinner {
    fn start(&self, title: &str, search_path: &SearchPath) -> IndicatorGuard {
        let Some(program) = search_path.locate(&self.program) else {
            debug!(program = %self.program, "Indicator program not found; running without spinner");
            return IndicatorGuard::inactive();
        };
        let mut command = Command::new(program);
        command
            .args(["spin", "--spinner", &self.spinner, "--title", title, "--"])
            .args(["sleep", "infinity"])
            .stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let spawned = command.spawn();
        match spawned {
            Ok(child) => IndicatorGuard::from_child(child),
            Err(err) => {
                warn!(program = %self.program, "Failed to start busy indicator: {err}");
                IndicatorGuard::inactive()
            }
        }
    }
}
