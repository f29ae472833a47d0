mod common;

use std::fs;

use common::{ScriptedRunner, harness, preset_in};
use srcforge::error::PipelineError;
use srcforge::stages::SyncStage;
use srcforge::stages::sync::SyncOutcome;
use tempfile::tempdir;

const HEAD: &str = "4f2c1d0e9b8a7c6d5e4f3a2b1c0d9e8f7a6b5c4d";
const REMOTE: &str = "9a8b7c6d5e4f3a2b1c0d4f2c1d0e9b8a7c6d5e4f";

#[test]
fn fresh_repo_tree_is_initialized_then_synced() {
    let temp = tempdir().unwrap();
    let profile = preset_in("android", temp.path());

    let h = harness(&profile, ScriptedRunner::new(), Vec::new());
    let outcome = SyncStage::new().sync(&h.ctx).unwrap();

    assert_eq!(outcome, SyncOutcome::Initialized);
    assert!(profile.source.directory.is_dir());
    assert_eq!(
        h.runner.lines(),
        vec![
            "repo init -u https://android.googlesource.com/platform/manifest -b android-15.0.0_r22",
            "repo sync -j 4",
        ]
    );
    for spec in h.runner.calls() {
        assert_eq!(spec.cwd.as_deref(), Some(profile.source.directory.as_path()));
    }
}

#[test]
fn initialized_repo_tree_only_syncs() {
    let temp = tempdir().unwrap();
    let profile = preset_in("android", temp.path());
    fs::create_dir_all(profile.source.directory.join(".repo")).unwrap();

    let h = harness(&profile, ScriptedRunner::new(), Vec::new());
    let outcome = SyncStage::new().sync(&h.ctx).unwrap();

    assert_eq!(outcome, SyncOutcome::Updated);
    assert_eq!(h.runner.lines(), vec!["repo sync -j 4"]);
    assert!(!h.runner.ran("repo init"));
}

#[test]
fn shallow_repo_init_keeps_depth() {
    let temp = tempdir().unwrap();
    let mut profile = preset_in("android", temp.path());
    profile.source.depth = Some(1);

    let h = harness(&profile, ScriptedRunner::new(), Vec::new());
    SyncStage::new().sync(&h.ctx).unwrap();

    assert!(h.runner.lines()[0].ends_with("-b android-15.0.0_r22 --depth=1"));
}

#[test]
fn fresh_git_tree_is_cloned_shallow() {
    let temp = tempdir().unwrap();
    let profile = preset_in("kernel-shallow", temp.path());

    let h = harness(&profile, ScriptedRunner::new(), Vec::new());
    let outcome = SyncStage::new().sync(&h.ctx).unwrap();

    assert_eq!(outcome, SyncOutcome::Initialized);
    assert_eq!(
        h.runner.lines(),
        vec![format!(
            "git clone --depth 1 --branch master {} .",
            profile.source.url
        )]
    );
}

#[test]
fn existing_git_tree_fetches_and_resets_when_behind() {
    let temp = tempdir().unwrap();
    let profile = preset_in("kernel", temp.path());
    fs::create_dir_all(profile.source.directory.join(".git")).unwrap();
    let runner = ScriptedRunner::new()
        .respond("rev-parse HEAD", 0, &format!("{HEAD}\n"))
        .respond("ls-remote", 0, &format!("{REMOTE}\trefs/heads/master\n"));

    let h = harness(&profile, runner, Vec::new());
    let outcome = SyncStage::new().sync(&h.ctx).unwrap();

    assert_eq!(outcome, SyncOutcome::Updated);
    assert_eq!(
        h.runner.lines(),
        vec![
            "git rev-parse HEAD",
            "git ls-remote origin master",
            "git fetch origin master",
            "git reset --hard FETCH_HEAD",
        ]
    );
    assert!(!h.runner.ran("clone"));
}

#[test]
fn existing_git_tree_at_remote_tip_is_left_alone() {
    let temp = tempdir().unwrap();
    let profile = preset_in("kernel", temp.path());
    fs::create_dir_all(profile.source.directory.join(".git")).unwrap();
    let runner = ScriptedRunner::new()
        .respond("rev-parse HEAD", 0, &format!("{HEAD}\n"))
        .respond("ls-remote", 0, &format!("{HEAD}\trefs/heads/master\n"));

    let h = harness(&profile, runner, Vec::new());
    let outcome = SyncStage::new().sync(&h.ctx).unwrap();

    assert_eq!(outcome, SyncOutcome::UpToDate);
    assert!(!h.runner.ran("fetch"));
    assert!(!h.runner.ran("reset"));
}

#[test]
fn unreadable_remote_fails_the_sync() {
    let temp = tempdir().unwrap();
    let profile = preset_in("kernel", temp.path());
    fs::create_dir_all(profile.source.directory.join(".git")).unwrap();
    let runner = ScriptedRunner::new()
        .respond("rev-parse HEAD", 0, &format!("{HEAD}\n"))
        .respond("ls-remote", 128, "fatal: could not read from remote repository\n");

    let h = harness(&profile, runner, Vec::new());
    let err = SyncStage::new().sync(&h.ctx).unwrap_err();

    assert!(matches!(err, PipelineError::CommandFailed { code: 128, .. }));
    assert!(h.output.contents().contains("could not read from remote"));
    assert!(!h.runner.ran("fetch"));
}
