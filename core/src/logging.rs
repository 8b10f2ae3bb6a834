//! Logger initialization for the command line host.
//!
//! The library itself only emits through the `log` facade: `debug!` when a run
//! starts, `warn!` when a covariance had to be repaired and `info!` when a run
//! completes. Binaries call [init_logger] once to route those records.

use std::error::Error;
use std::path::PathBuf;

/// Initialize the logger with the specified configuration.
///
/// `log_level` applies to this crate; dependencies only report warnings and errors.
/// A `RUST_LOG` variable, when set, is applied on top.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or logger initialization fails.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&filter_directives(parse_level(log_level)));
    builder.parse_default_env();
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Directive string for `level` on this crate, capped at `warn` for everything else.
pub fn filter_directives(level: log::LevelFilter) -> String {
    let others = level.min(log::LevelFilter::Warn);
    format!("{},{}={}", others, env!("CARGO_CRATE_NAME"), level).to_lowercase()
}

/// Parse a level name, falling back to `info` for anything unrecognized.
pub fn parse_level(log_level: &str) -> log::LevelFilter {
    log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    })
}
