use std::process::ExitCode;

fn main() -> ExitCode {
    cashpoint_cli::run()
}
