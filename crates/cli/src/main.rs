use std::process::ExitCode;

fn main() -> ExitCode {
    flowops_cli::run()
}
