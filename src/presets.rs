use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};

use crate::indicator::IndicatorKind;
use crate::pipeline::StageSpec;
use crate::profile::{BuildSpec, EnvironmentSpec, Profile, SourceSpec, SyncTool, UiSpec};

const ANDROID_MANIFEST: &str = "https://android.googlesource.com/platform/manifest";
const ANDROID_RELEASE: &str = "android-15.0.0_r22";
const KERNEL_REPO: &str = "https://git.kernel.org/pub/scm/linux/kernel/git/torvalds/linux.git";

pub const PRESET_NAMES: &[&str] = &["android", "android-arm64", "kernel", "kernel-shallow"];

pub fn preset(name: &str) -> Option<Profile> {
    match name {
        "android" => Some(android_preset(
            "android",
            "aosp_cf_x86_64-userdebug",
            "AOSP Cuttlefish x86_64 build",
        )),
        "android-arm64" => Some(android_preset(
            "android-arm64",
            "aosp_cf_arm64_phone-userdebug",
            "AOSP Cuttlefish arm64 build",
        )),
        "kernel" => Some(kernel_preset(
            "kernel",
            PathBuf::from("linux-kernel/linux-kernel"),
            None,
        )),
        "kernel-shallow" => Some(kernel_preset(
            "kernel-shallow",
            PathBuf::from("linux-kernel"),
            Some(1),
        )),
        _ => None,
    }
}

pub fn generate_preset(name: &str, destination: &Path) -> Result<PathBuf> {
    let Some(profile) = preset(name) else {
        bail!(
            "Unknown preset '{name}'. Available presets: {}",
            PRESET_NAMES.join(", ")
        );
    };

    let rendered = profile.to_yaml()?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write preset profile: {}", destination.display()))?;

    Ok(destination.to_path_buf())
}

fn android_preset(name: &str, lunch_target: &str, description: &str) -> Profile {
    Profile {
        version: 1,
        name: name.into(),
        description: Some(description.into()),
        source: SourceSpec {
            tool: SyncTool::Repo,
            url: ANDROID_MANIFEST.into(),
            branch: ANDROID_RELEASE.into(),
            directory: PathBuf::from("android_source"),
            marker: None,
            depth: None,
        },
        build: BuildSpec {
            target: Some(lunch_target.into()),
            jobs: None,
        },
        environment: EnvironmentSpec::default(),
        ui: UiSpec {
            indicator: IndicatorKind::None,
            ..UiSpec::default()
        },
        pipeline: vec![
            stage("prerequisite", json!({"tool": "repo", "title": "Installing repo"})),
            stage("sync", json!({"title": "Downloading Android source"})),
            stage(
                "shell",
                json!({
                    "title": "Building Android",
                    "script": "source build/envsetup.sh && lunch {target} && make -j{jobs}",
                }),
            ),
        ],
    }
}

fn kernel_preset(name: &str, directory: PathBuf, depth: Option<u32>) -> Profile {
    let description = match depth {
        Some(depth) => format!("Linux kernel build from a depth-{depth} clone"),
        None => "Linux kernel build and module install".to_string(),
    };
    Profile {
        version: 1,
        name: name.into(),
        description: Some(description),
        source: SourceSpec {
            tool: SyncTool::Git,
            url: KERNEL_REPO.into(),
            branch: "master".into(),
            directory,
            marker: None,
            depth,
        },
        build: BuildSpec::default(),
        environment: EnvironmentSpec::default(),
        ui: UiSpec::default(),
        pipeline: vec![
            stage("prerequisite", json!({"tool": "git"})),
            stage("prerequisite", json!({"tool": "make"})),
            stage("sync", json!({"title": "Fetching kernel source"})),
            stage(
                "make",
                json!({
                    "title": "Configuring kernel...",
                    "targets": ["clean", "defconfig"],
                    "vars": {"FORCE_UNSAFE_CONFIGURE": "1"},
                }),
            ),
            stage(
                "make",
                json!({"title": "Building kernel and modules...", "jobs": true}),
            ),
            stage(
                "make",
                json!({
                    "title": "Installing modules...",
                    "targets": ["modules_install"],
                    "vars": {"INSTALL_MOD_STRIP": "1"},
                    "elevated": true,
                }),
            ),
        ],
    }
}

fn stage(name: &str, params: Value) -> StageSpec {
    match params {
        Value::Object(map) => StageSpec::with_params(name, map),
        _ => StageSpec::new(name),
    }
}
