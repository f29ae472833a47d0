use std::num::NonZeroUsize;

/// Environment variable that overrides the detected core count.
pub const JOBS_ENV: &str = "SRCFORGE_JOBS";

/// Worker count handed to the external build tool.
///
/// Precedence: explicit override (CLI), profile setting, `SRCFORGE_JOBS`,
/// then the number of cores reported by the OS.
pub fn resolve_jobs(cli_override: Option<usize>, profile_setting: Option<usize>) -> usize {
    let env_value = std::env::var(JOBS_ENV).ok();
    resolve_with_env(cli_override, profile_setting, env_value.as_deref())
}

fn resolve_with_env(
    cli_override: Option<usize>,
    profile_setting: Option<usize>,
    env_value: Option<&str>,
) -> usize {
    cli_override
        .filter(|jobs| *jobs > 0)
        .or(profile_setting.filter(|jobs| *jobs > 0))
        .or_else(|| env_value.and_then(parse_jobs))
        .unwrap_or_else(detect_cores)
}

pub fn detect_cores() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

fn parse_jobs(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|jobs| *jobs > 0)
}
