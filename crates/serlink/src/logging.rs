//! stderr logging for the CLI.
//!
//! `--log-level` applies to the serlink crates. Events from dependencies are
//! capped at `warn` so `debug` shows link traffic rather than library noise.
//! `--log-filter` appends raw `target=level` directives on top, for example
//! `serlink_frame=trace` to watch the decoder resynchronize.

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Log targets that follow `--log-level`.
const LINK_TARGETS: [&str; 4] = ["serlink", "serlink_transport", "serlink_frame", "serlink_rpc"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Level applied to targets outside the serlink crates.
    fn for_dependencies(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            _ => LevelFilter::WARN,
        }
    }
}

/// Directive string handed to [`EnvFilter`].
fn directives(level: LogLevel, extra: Option<&str>) -> String {
    let level_name = level.as_filter().to_string().to_lowercase();
    let mut directives = vec![level.for_dependencies().to_string().to_lowercase()];
    directives.extend(LINK_TARGETS.iter().map(|target| format!("{target}={level_name}")));
    if let Some(extra) = extra.map(str::trim).filter(|extra| !extra.is_empty()) {
        directives.push(extra.to_string());
    }
    directives.join(",")
}

/// Install the stderr subscriber. Thread names are included since the pump
/// and dispatch threads log independently of the caller.
pub fn init_logging(format: LogFormat, level: LogLevel, extra: Option<&str>) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.for_dependencies().into())
        .parse_lossy(directives(level, extra));

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
