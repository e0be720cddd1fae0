use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Full filter directive, e.g. `modelcomm_channel=trace,modelcomm_transport=debug`.
/// Takes precedence over `--log-level`.
pub const LOG_FILTER_ENV: &str = "MODELCOMM_LOG";

/// Targets that `--log-level` applies to. Everything else logs at `warn`.
const MODELCOMM_TARGETS: &[&str] = &[
    "modelcomm",
    "modelcomm_channel",
    "modelcomm_transport",
    "modelcomm_frame",
    "modelcomm_schema",
];

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
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Directives used when `MODELCOMM_LOG` is unset.
pub fn default_directives(level: LogLevel) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        MODELCOMM_TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.as_str())),
    );
    directives.join(",")
}

fn filter(level: LogLevel, from_env: Option<String>) -> EnvFilter {
    let fallback = || EnvFilter::new(default_directives(level));
    match from_env {
        Some(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .unwrap_or_else(|err| {
                eprintln!("ignoring invalid {LOG_FILTER_ENV} ({err})");
                fallback()
            }),
        _ => fallback(),
    }
}

/// Install the stderr subscriber. A second call is ignored.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(level, std::env::var(LOG_FILTER_ENV).ok()))
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
