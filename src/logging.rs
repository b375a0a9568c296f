//! Logging initialization

use env_logger::{Builder, Target};
use log::LevelFilter;

/// Initialize logging for the CLI.
pub fn init_cli_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };

    Builder::from_default_env()
        .target(Target::Stderr)
        .filter_level(level)
        .format_timestamp_secs()
        .format_module_path(false)
        .init();

    #[cfg(debug_assertions)]
    log_panics::init();

    log::debug!("sketchforge logging initialized with level: {:?}", level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_selection() {
        let level = match (true, 0) {
            (true, _) => LevelFilter::Error,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        };
        assert_eq!(level, LevelFilter::Error);

        let level = match (false, 2) {
            (true, _) => LevelFilter::Error,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        };
        assert_eq!(level, LevelFilter::Trace);
    }
}
