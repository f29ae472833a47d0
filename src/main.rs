use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use srcforge::app::{RunOptions, build_registry, exit_status, resolve_profile, run_profile};
use srcforge::indicator::IndicatorKind;
use srcforge::logging::{self, LogConfig, LogFormat};
use srcforge::presets::{PRESET_NAMES, generate_preset, preset};
use srcforge::profile::Profile;
use srcforge::validation::validate_profile;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // The profile is resolved before logging starts so its theme applies.
    let loaded = cli
        .command
        .profile_reference()
        .map(resolve_profile)
        .transpose();
    let theme = loaded
        .as_ref()
        .ok()
        .and_then(Option::as_ref)
        .map(|profile| profile.ui.theme.clone())
        .unwrap_or_default();
    let config = LogConfig {
        format: cli.log_format,
        theme,
        otlp_endpoint: cli.command.otlp_endpoint(),
    };
    if let Err(err) = logging::init(&config) {
        eprintln!("warning: failed to initialise logging: {err}");
    }

    let result = loaded.and_then(|profile| dispatch(cli.command, profile));
    let status = exit_status(result);
    logging::shutdown(&config);
    status
}

fn dispatch(command: Commands, profile: Option<Profile>) -> Result<()> {
    match command {
        Commands::Run {
            jobs,
            no_indicator,
            dry_run,
            report,
            ..
        } => {
            let options = RunOptions {
                jobs,
                indicator: no_indicator.then_some(IndicatorKind::None),
                dry_run,
                report,
            };
            run_profile(&required(profile)?, &options).map(|_| ())
        }
        Commands::Validate { .. } => validate_cmd(&required(profile)?),
        Commands::ListStages => {
            list_stages();
            Ok(())
        }
        Commands::ListProfiles => {
            list_profiles();
            Ok(())
        }
        Commands::Profile {
            action: ProfileCommands::New { preset, output },
        } => {
            let destination =
                output.unwrap_or_else(|| PathBuf::from(format!("profiles/{preset}.yaml")));
            let generated = generate_preset(&preset, &destination)?;
            info!(
                preset = %preset,
                path = %generated.display(),
                "Preset profile generated"
            );
            Ok(())
        }
        Commands::Profile {
            action: ProfileCommands::Show { .. },
        } => {
            print!("{}", required(profile)?.to_yaml()?);
            Ok(())
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "srcforge", &mut io::stdout());
            Ok(())
        }
    }
}

fn required(profile: Option<Profile>) -> Result<Profile> {
    profile.ok_or_else(|| anyhow!("No profile was given"))
}

fn validate_cmd(profile: &Profile) -> Result<()> {
    let registry = build_registry();
    let report = validate_profile(profile, &registry);

    for warning in &report.warnings {
        warn!(profile = %profile.name, "{warning}");
    }

    if report.is_ok() {
        info!(profile = %profile.name, "Profile validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(profile = %profile.name, "{error_msg}");
        }
        bail!(
            "Profile validation failed with {} error(s)",
            report.errors.len()
        )
    }
}

fn list_stages() {
    let registry = build_registry();
    println!("Available stages:");
    for name in registry.known_stages() {
        println!("- {name}");
    }
}

fn list_profiles() {
    println!("Built-in profiles:");
    for name in PRESET_NAMES {
        let description = preset(name)
            .and_then(|profile| profile.description)
            .unwrap_or_default();
        println!("- {name:<16} {description}");
    }
}

#[derive(Parser)]
#[command(
    name = "srcforge",
    version,
    about = "Fetch, configure and build large external source trees"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[arg(long = "log-format", global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in preset or a profile YAML file.
    Run {
        profile: String,
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
        #[arg(long = "no-indicator")]
        no_indicator: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long = "otlp-endpoint")]
        otlp_endpoint: Option<String>,
    },
    Validate {
        profile: String,
    },
    ListStages,
    ListProfiles,
    Profile {
        #[command(subcommand)]
        action: ProfileCommands,
    },
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    New {
        #[arg(long)]
        preset: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Show {
        profile: String,
    },
}

impl Commands {
    fn profile_reference(&self) -> Option<&str> {
        match self {
            Commands::Run { profile, .. }
            | Commands::Validate { profile }
            | Commands::Profile {
                action: ProfileCommands::Show { profile },
            } => Some(profile.as_str()),
            _ => None,
        }
    }

    fn otlp_endpoint(&self) -> Option<String> {
        match self {
            Commands::Run { otlp_endpoint, .. } => otlp_endpoint.clone(),
            _ => None,
        }
    }
}
