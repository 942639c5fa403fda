//! fling utility - main entrypoint
// (c) 2025 Ross Younger

fn main() -> std::process::ExitCode {
    match fling::cli() {
        Ok(true) => std::process::ExitCode::SUCCESS,
        Ok(false) => std::process::ExitCode::FAILURE,
        Err(e) => {
            if fling::util::tracing_is_initialised() {
                tracing::error!("{e:#}");
            } else {
                eprintln!("Error: {e:#}");
            }
            std::process::ExitCode::FAILURE
        }
    }
}
