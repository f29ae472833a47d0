mod common;

use common::{ScriptedRunner, harness, install_fake_tool, preset_in};
use srcforge::app::build_registry;
use srcforge::error::PipelineError;
use srcforge::pipeline::{Stage, build_pipeline};
use srcforge::stages::{InstallerSpec, PrerequisiteStage, default_installers};
use tempfile::tempdir;

#[test]
fn present_tool_installs_nothing() {
    let temp = tempdir().unwrap();
    let bin = temp.path().join("bin");
    install_fake_tool(&bin, "repo");
    let profile = preset_in("android", temp.path());

    let mut h = harness(&profile, ScriptedRunner::new(), vec![bin.clone()]);
    let stage = PrerequisiteStage::new("repo", default_installers("repo"));
    stage.run(&mut h.ctx).unwrap();

    assert!(h.runner.calls().is_empty());
    assert_eq!(h.ctx.search_path.dirs(), [bin]);
}

#[test]
fn tool_in_local_bin_is_found_after_extending_path() {
    let temp = tempdir().unwrap();
    let profile = preset_in("android", temp.path());
    let local_bin = profile.environment.local_bin_dir().unwrap();
    install_fake_tool(&local_bin, "repo");

    let mut h = harness(&profile, ScriptedRunner::new(), vec![temp.path().join("bin")]);
    PrerequisiteStage::new("repo", default_installers("repo"))
        .run(&mut h.ctx)
        .unwrap();

    assert!(h.runner.calls().is_empty());
    assert_eq!(h.ctx.search_path.dirs()[0], local_bin);
}

#[test]
fn missing_repo_is_downloaded_into_local_bin() {
    let temp = tempdir().unwrap();
    let bin = temp.path().join("bin");
    install_fake_tool(&bin, "curl");
    let profile = preset_in("android", temp.path());
    let local_bin = profile.environment.local_bin_dir().unwrap();
    let target = local_bin.clone();
    let runner = ScriptedRunner::new().on("curl -fsSL", move |_| {
        install_fake_tool(&target, "repo");
    });

    let mut h = harness(&profile, runner, vec![bin]);
    PrerequisiteStage::new("repo", default_installers("repo"))
        .run(&mut h.ctx)
        .unwrap();

    let calls = h.runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "sh");
    assert!(calls[0].args[1].contains(&format!("{}/repo", local_bin.display())));
    assert!(h.ctx.search_path.locate("repo").is_some());
}

#[test]
fn package_manager_installs_run_elevated() {
    let temp = tempdir().unwrap();
    let bin = temp.path().join("bin");
    let apt = install_fake_tool(&bin, "apt-get");
    let profile = preset_in("kernel", temp.path());
    let target = bin.clone();
    let runner = ScriptedRunner::new().on("install -y ccache", move |_| {
        install_fake_tool(&target, "ccache");
    });

    let mut h = harness(&profile, runner, vec![bin]);
    PrerequisiteStage::new("ccache", default_installers("ccache"))
        .run(&mut h.ctx)
        .unwrap();

    let calls = h.runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "sudo");
    assert_eq!(
        calls[0].args,
        vec![apt.display().to_string(), "install".into(), "-y".into(), "ccache".into()]
    );
}

#[test]
fn no_installer_fails_before_any_build_command() {
    let temp = tempdir().unwrap();
    let profile = preset_in("kernel", temp.path());

    let mut h = harness(&profile, ScriptedRunner::new(), vec![temp.path().join("empty")]);
    let executor = build_pipeline(&build_registry(), &profile.pipeline).unwrap();
    let err = executor.execute(&mut h.ctx).unwrap_err();

    match err {
        PipelineError::MissingPrerequisite { tool, hint } => {
            assert_eq!(tool, "git");
            assert!(hint.contains("apt-get"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.runner.calls().is_empty());
    assert!(!profile.source.directory.exists());
}

#[test]
fn installer_that_leaves_tool_missing_is_an_error() {
    let temp = tempdir().unwrap();
    let bin = temp.path().join("bin");
    install_fake_tool(&bin, "brew");
    let profile = preset_in("kernel", temp.path());
    let installers = vec![InstallerSpec {
        requires: "brew".into(),
        argv: vec!["brew".into(), "install".into(), "{tool}".into()],
        elevated: false,
    }];

    let mut h = harness(&profile, ScriptedRunner::new(), vec![bin]);
    let err = PrerequisiteStage::new("gum", installers)
        .run(&mut h.ctx)
        .unwrap_err();

    assert!(matches!(err, PipelineError::MissingPrerequisite { ref tool, .. } if tool == "gum"));
    assert_eq!(h.runner.lines(), vec!["brew install gum"]);
}

#[test]
fn failing_installer_reports_its_exit_code() {
    let temp = tempdir().unwrap();
    let bin = temp.path().join("bin");
    install_fake_tool(&bin, "brew");
    let profile = preset_in("kernel", temp.path());
    let runner = ScriptedRunner::new().respond("brew install", 100, "Error: no bottle\n");

    let mut h = harness(&profile, runner, vec![bin]);
    let err = PrerequisiteStage::new("gum", default_installers("gum"))
        .run(&mut h.ctx)
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(100));
    assert!(h.output.contents().contains("no bottle"));
}
