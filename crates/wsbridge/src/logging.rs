use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Filter for `--log-level`, unless `directives` (from `RUST_LOG`) parse.
///
/// The WebSocket stack is capped at `warn` so `--log-level debug` shows our
/// traffic, not every frame.
pub fn build_filter(level: LogLevel, directives: Option<&str>) -> EnvFilter {
    if let Some(filter) = directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
    {
        return filter;
    }

    let mut directive = level.directive().to_string();
    if level > LogLevel::Warn {
        directive.push_str(",tungstenite=warn,tokio_tungstenite=warn");
    }
    EnvFilter::new(directive)
}

/// Logs go to stderr; stdout carries records only.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(level, env.as_deref()))
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
