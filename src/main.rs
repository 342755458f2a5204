/// Main entry point for a PowerMatcher node
///
/// This serves as a thin wrapper that delegates to the interfaces layer.
/// The actual application logic is implemented in `interfaces::cli`.

use powermatcher::interfaces::cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    match cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("powermatcher: {}", e);
            ExitCode::FAILURE
        }
    }
}
