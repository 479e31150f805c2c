use std::process::ExitCode;

fn main() -> ExitCode {
    routewise_cli::run()
}
