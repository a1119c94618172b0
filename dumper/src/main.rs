use std::process::ExitCode;

fn main() -> ExitCode {
    match esdump::run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("esdump: {err:#}");
            ExitCode::FAILURE
        }
    }
}
