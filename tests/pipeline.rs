mod common;

use std::fs;
use std::io::{self, Write};
use std::sync::Arc;

use common::{RecordingIndicator, ScriptedRunner, harness, install_fake_tool, preset_in};
use serde_json::json;
use srcforge::app::build_registry;
use srcforge::command::CommandSpec;
use srcforge::console::Console;
use srcforge::error::PipelineError;
use srcforge::observability::StageStatus;
use srcforge::pipeline::{PipelineContext, StageSpec, build_pipeline};
use tempfile::tempdir;

fn command_stage(argv: &[&str]) -> StageSpec {
    let serde_json::Value::Object(params) = json!({ "argv": argv }) else {
        unreachable!()
    };
    StageSpec::with_params("command", params)
}

#[test]
fn kernel_pipeline_runs_every_stage_in_order() {
    let temp = tempdir().unwrap();
    let bin = temp.path().join("bin");
    install_fake_tool(&bin, "git");
    let make = install_fake_tool(&bin, "make");
    let profile = preset_in("kernel", temp.path());

    let mut h = harness(&profile, ScriptedRunner::new(), vec![bin]);
    let executor = build_pipeline(&build_registry(), &profile.pipeline).unwrap();
    executor.execute(&mut h.ctx).unwrap();

    let calls = h.runner.calls();
    let lines: Vec<String> = calls.iter().map(|spec| spec.command_line()).collect();
    assert_eq!(lines.len(), 4, "unexpected commands: {lines:?}");
    assert!(lines[0].starts_with("git clone --branch master "));
    assert_eq!(lines[1], "make clean defconfig FORCE_UNSAFE_CONFIGURE=1");
    assert_eq!(lines[2], "make -j 4");

    let install = &calls[3];
    assert_eq!(install.program, "sudo");
    assert_eq!(install.args[0], make.display().to_string());
    assert_eq!(&install.args[1..], ["modules_install", "INSTALL_MOD_STRIP=1"]);

    for spec in &calls[1..] {
        assert_eq!(spec.cwd.as_deref(), Some(profile.source.directory.as_path()));
    }

    let snapshot = executor.metrics().snapshot();
    assert_eq!(snapshot.stages.len(), 6);
    assert!(snapshot.failed_stage().is_none());
}

#[test]
fn failed_configure_echoes_output_and_skips_build() {
    let temp = tempdir().unwrap();
    let bin = temp.path().join("bin");
    install_fake_tool(&bin, "git");
    install_fake_tool(&bin, "make");
    let profile = preset_in("kernel", temp.path());
    let runner = ScriptedRunner::new().respond("defconfig", 2, "*** Configuration file error\n");

    let mut h = harness(&profile, runner, vec![bin]);
    let executor = build_pipeline(&build_registry(), &profile.pipeline).unwrap();
    let err = executor.execute(&mut h.ctx).unwrap_err();

    assert!(matches!(err, PipelineError::CommandFailed { code: 2, .. }));
    assert!(h.output.contents().contains("*** Configuration file error"));
    assert!(!h.runner.ran("-j"));
    assert!(!h.runner.ran("modules_install"));

    let events = h.indicator.events();
    assert_eq!(events.last().map(String::as_str), Some("stop Configuring kernel..."));

    let snapshot = executor.metrics().snapshot();
    assert_eq!(snapshot.stages.len(), 4);
    let failed = snapshot.failed_stage().unwrap();
    assert_eq!(failed.kind, "make");
    assert_eq!(failed.status, StageStatus::Failed);
}

#[test]
fn pipeline_halts_at_first_failing_stage() {
    let temp = tempdir().unwrap();
    let mut profile = preset_in("kernel", temp.path());
    profile.pipeline = vec![
        command_stage(&["step-one"]),
        command_stage(&["step-two"]),
        command_stage(&["step-three"]),
    ];
    let runner = ScriptedRunner::new().respond("step-two", 1, "");

    let mut h = harness(&profile, runner, Vec::new());
    let executor = build_pipeline(&build_registry(), &profile.pipeline).unwrap();
    let err = executor.execute(&mut h.ctx).unwrap_err();

    assert_eq!(err.exit_code(), Some(1));
    assert_eq!(h.runner.lines(), vec!["step-one", "step-two"]);
    assert_eq!(
        h.indicator.events(),
        vec!["start step-one", "stop step-one", "start step-two", "stop step-two"]
    );
}

struct ClosedStdout;

impl Write for ClosedStdout {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn unwritable_console_fails_the_command() {
    let temp = tempdir().unwrap();
    let profile = preset_in("kernel", temp.path());
    let runner = Arc::new(ScriptedRunner::new().respond("configure", 0, "checking for cc... yes\n"));
    let ctx = PipelineContext::new(
        &profile,
        1,
        runner.clone(),
        Arc::new(RecordingIndicator::default()),
        Console::from_writer(ClosedStdout),
    )
    .unwrap();

    let err = ctx.execute(&CommandSpec::new("./configure")).unwrap_err();
    assert!(
        matches!(&err, PipelineError::Io { source, .. } if source.kind() == io::ErrorKind::BrokenPipe),
        "{err:?}"
    );
    assert!(runner.ran("./configure"));

    ctx.execute(&CommandSpec::new("true")).unwrap();
}

#[test]
fn android_build_runs_as_one_shell_script() {
    let temp = tempdir().unwrap();
    let mut profile = preset_in("android", temp.path());
    profile.pipeline.retain(|spec| spec.stage == "shell");
    fs::create_dir_all(&profile.source.directory).unwrap();

    let mut h = harness(&profile, ScriptedRunner::new(), Vec::new());
    let executor = build_pipeline(&build_registry(), &profile.pipeline).unwrap();
    executor.execute(&mut h.ctx).unwrap();

    let calls = h.runner.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].shell);
    assert_eq!(
        calls[0].command_line(),
        "source build/envsetup.sh && lunch aosp_cf_x86_64-userdebug && make -j4"
    );
}

#[test]
fn streamed_stages_show_no_indicator() {
    let temp = tempdir().unwrap();
    let mut profile = preset_in("kernel", temp.path());
    let serde_json::Value::Object(params) = json!({"argv": ["make"], "output": "streamed"}) else {
        unreachable!()
    };
    profile.pipeline = vec![StageSpec::with_params("command", params)];

    let mut h = harness(&profile, ScriptedRunner::new(), Vec::new());
    let executor = build_pipeline(&build_registry(), &profile.pipeline).unwrap();
    executor.execute(&mut h.ctx).unwrap();

    assert!(h.indicator.events().is_empty());
    assert_eq!(h.runner.lines(), vec!["make"]);
}
