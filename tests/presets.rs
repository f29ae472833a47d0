use std::fs;
use std::path::Path;

use srcforge::indicator::IndicatorKind;
use srcforge::presets::{generate_preset, preset};
use srcforge::profile::{Profile, SyncTool};
use tempfile::tempdir;

#[test]
fn generate_kernel_preset_writes_loadable_yaml() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("profiles/kernel.yaml");
    let generated = generate_preset("kernel", &path).expect("preset generation");
    assert!(generated.exists());

    let contents = fs::read_to_string(&generated).expect("read preset");
    assert!(contents.contains("stage: sync"));
    assert!(contents.contains("FORCE_UNSAFE_CONFIGURE"));

    let loaded = Profile::load(&generated).expect("load generated preset");
    assert_eq!(loaded.name, "kernel");
    assert_eq!(loaded.pipeline, preset("kernel").unwrap().pipeline);
}

#[test]
fn unknown_preset_lists_available_names() {
    let temp = tempdir().unwrap();
    let err = generate_preset("freebsd", &temp.path().join("x.yaml")).unwrap_err();
    assert!(err.to_string().contains("android-arm64"));
    assert!(!temp.path().join("x.yaml").exists());
}

#[test]
fn presets_reproduce_the_script_variants() {
    let android = preset("android").unwrap();
    assert_eq!(android.source.tool, SyncTool::Repo);
    assert_eq!(android.source.branch, "android-15.0.0_r22");
    assert_eq!(android.build.target.as_deref(), Some("aosp_cf_x86_64-userdebug"));
    assert_eq!(android.ui.indicator, IndicatorKind::None);

    let arm = preset("android-arm64").unwrap();
    assert_eq!(arm.build.target.as_deref(), Some("aosp_cf_arm64_phone-userdebug"));

    let kernel = preset("kernel").unwrap();
    assert_eq!(kernel.source.directory, Path::new("linux-kernel/linux-kernel"));
    assert_eq!(kernel.source.depth, None);
    assert_eq!(kernel.ui.indicator, IndicatorKind::Gum);

    let shallow = preset("kernel-shallow").unwrap();
    assert_eq!(shallow.source.directory, Path::new("linux-kernel"));
    assert_eq!(shallow.source.depth, Some(1));
}
