use std::process::ExitCode;

fn main() -> ExitCode {
    vmthreads::cli::run_cli()
}
