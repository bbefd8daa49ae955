use std::process::ExitCode;

fn main() -> ExitCode {
    activops_lib::run()
}
