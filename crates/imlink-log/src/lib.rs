// ABOUTME: Tracing subscriber setup for imlink binaries.
// ABOUTME: init() logs to stderr, init_file() to a per-app log file, init_for() filters by crate.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

/// Logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Directory holding `app_name`'s log file: `<config dir>/imlink/{app_name}`.
pub fn log_dir(app_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("imlink").join(app_name))
}

/// Appending file log for interactive sessions, keeping stderr clean.
/// Default: WARN level, RUST_LOG override. Setup failures are reported on stderr
/// and logging stays off.
pub fn init_file(app_name: &str) {
    if let Err(e) = init_file_inner(app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
    }
}

fn init_file_inner(app_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dir = log_dir(app_name).ok_or("could not determine config directory")?;
    std::fs::create_dir_all(&dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{app_name}.log")))?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_ansi(false)
        .init();

    Ok(())
}

/// Stderr logging at INFO for `crate_name` and WARN for everything else.
pub fn init_for(crate_name: &str) {
    let filter = EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into())
        .add_directive(
            format!("{crate_name}=info")
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        );

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
