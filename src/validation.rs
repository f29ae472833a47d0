use serde::Serialize;

use crate::pipeline::{StageRegistry, StageSpec};
use crate::profile::{Profile, SyncTool};

/// Stage kinds that operate on an already-synced source tree.
const TREE_STAGES: &[&str] = &["make", "shell", "command"];

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_profile(profile: &Profile, registry: &StageRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();

    if profile.version != 1 {
        report
            .errors
            .push(format!("Unsupported profile version: {}", profile.version));
    }
    if profile.name.trim().is_empty() {
        report.errors.push("Profile name cannot be empty".into());
    }

    let source = &profile.source;
    if source.url.trim().is_empty() {
        report.errors.push("Source URL cannot be empty".into());
    }
    if source.branch.trim().is_empty() {
        report
            .errors
            .push("Source branch/revision cannot be empty".into());
    }
    if source.directory.as_os_str().is_empty() {
        report
            .errors
            .push("Source directory cannot be empty".into());
    }
    if source.depth == Some(0) {
        report
            .errors
            .push("Source depth must be at least 1 when set".into());
    }
    if profile.build.jobs == Some(0) {
        report.errors.push("Build jobs must be at least 1 when set".into());
    }

    if profile.pipeline.is_empty() {
        report
            .errors
            .push("Pipeline must contain at least one stage".into());
    }

    for (idx, stage) in profile.pipeline.iter().enumerate() {
        report.merge(validate_stage_order(idx, stage, &profile.pipeline));
        report.merge(validate_stage(idx, stage, registry));
        report.merge(validate_placeholders(idx, stage, profile));
    }

    report.merge(validate_tool_coverage(profile));

    report
}

fn validate_stage(idx: usize, stage: &StageSpec, registry: &StageRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();
    let params = stage.params.clone().unwrap_or_default();
    if let Err(err) = registry.create(&stage.stage, params) {
        report.errors.push(format!(
            "Stage {} ('{}'): {:#}",
            idx + 1,
            stage.stage,
            err.context("Failed to instantiate stage")
        ));
    }
    report
}

fn validate_stage_order(idx: usize, stage: &StageSpec, pipeline: &[StageSpec]) -> ValidationReport {
    let mut report = ValidationReport::default();
    if stage.stage == "sync" {
        if pipeline[..idx].iter().any(|prev| prev.stage == "sync") {
            report
                .errors
                .push(format!("Stage {}: pipeline can only sync once", idx + 1));
        }
        if pipeline[..idx]
            .iter()
            .any(|prev| TREE_STAGES.contains(&prev.stage.as_str()))
        {
            report.errors.push(format!(
                "Stage {}: sync must come before build stages",
                idx + 1
            ));
        }
    }
    if idx == 0 && TREE_STAGES.contains(&stage.stage.as_str()) {
        let has_sync = pipeline.iter().any(|spec| spec.stage == "sync");
        if !has_sync {
            report.warnings.push(
                "Pipeline has no sync stage; the source directory must already be populated"
                    .into(),
            );
        }
    }
    report
}

fn validate_placeholders(idx: usize, stage: &StageSpec, profile: &Profile) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mentions_target = stage
        .params
        .as_ref()
        .map(|params| serde_json::Value::Object(params.clone()).to_string())
        .is_some_and(|rendered| rendered.contains("{target}"));
    if mentions_target && profile.build.target.is_none() {
        report.errors.push(format!(
            "Stage {} ('{}') uses {{target}} but build.target is not set",
            idx + 1,
            stage.stage
        ));
    }
    report
}

fn validate_tool_coverage(profile: &Profile) -> ValidationReport {
    let mut report = ValidationReport::default();
    let syncs = profile.pipeline.iter().any(|spec| spec.stage == "sync");
    if syncs && profile.source.tool == SyncTool::Repo {
        let checked = profile.pipeline.iter().any(|spec| {
            spec.stage == "prerequisite"
                && spec
                    .params
                    .as_ref()
                    .and_then(|params| params.get("tool"))
                    .and_then(serde_json::Value::as_str)
                    == Some("repo")
        });
        if !checked {
            report.warnings.push(
                "Source uses repo but no prerequisite stage checks for it".into(),
            );
        }
    }
    report
}
