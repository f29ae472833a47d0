use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageMetrics {
    pub kind: String,
    pub title: String,
    pub status: StageStatus,
    pub duration_ms: f64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    /// Stages in execution order. Stages after a failure never appear.
    pub stages: Vec<StageMetrics>,
    pub total_duration_ms: f64,
}

impl MetricsSnapshot {
    pub fn failed_stage(&self) -> Option<&StageMetrics> {
        self.stages
            .iter()
            .find(|stage| stage.status == StageStatus::Failed)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_stage(&self, kind: &str, title: &str) -> StageTimer {
        StageTimer {
            kind: kind.to_string(),
            title: title.to_string(),
            status: StageStatus::Failed,
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

/// Records a stage's duration when dropped. A timer that is never marked
/// successful records the stage as failed.
pub struct StageTimer {
    kind: String,
    title: String,
    status: StageStatus,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl StageTimer {
    pub fn succeed(&mut self) {
        self.status = StageStatus::Succeeded;
    }

    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            guard.stages.push(StageMetrics {
                kind: self.kind.clone(),
                title: self.title.clone(),
                status: self.status,
                duration_ms,
            });
        }
        debug!(
            stage = self.kind.as_str(),
            duration_ms,
            "Stage duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_seconds = %format!("{:.2}", snapshot.total_duration_ms / 1_000.0),
        stage_count = snapshot.stages.len(),
        "Pipeline timing summary"
    );
    for stage in &snapshot.stages {
        info!(
            stage = stage.kind.as_str(),
            status = ?stage.status,
            seconds = %format!("{:.2}", stage.duration_ms / 1_000.0),
            "{}",
            stage.title
        );
    }
}
