use std::io::IsTerminal;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Whether stdout is attached to a terminal. Used as the color default.
pub fn stdout_is_terminal() -> bool {
    std::io::stdout().is_terminal()
}

/// Installs the global tracing subscriber. `RUST_LOG` directives, when set,
/// are applied on top of `level`.
pub fn init_tracing(level: LevelFilter, format: LogFormat, color: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => {
            registry
                .with(
                    fmt::layer()
                        .with_ansi(color)
                        .with_writer(std::io::stdout),
                )
                .try_init()?
        }
        LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_writer(std::io::stdout),
                )
                .try_init()?
        }
    }

    Ok(())
}
