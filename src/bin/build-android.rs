use std::process::ExitCode;

fn main() -> ExitCode {
    srcforge::app::run_preset_main("android")
}
