use std::process::ExitCode;

fn main() -> ExitCode {
    plugboard_cli::run()
}
