use std::process::ExitCode;

fn main() -> ExitCode {
    dwslack_cli::run()
}
