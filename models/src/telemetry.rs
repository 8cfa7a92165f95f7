//! Logging setup shared by the simulator binary and tests that want to see simulation traces.
//!
//! Everything is driven from the environment:
//! * `TRACING_FILTER_DIRECTIVE` - an `EnvFilter` directive, `info` when unset.
//! * `LOGGING_FORMATTER` - one of `full`, `compact`, `pretty` or `json`.
//! * `LOGGING_ANSI_ENABLED` - `true` to colorize output.
use serde::Deserialize;
use snafu::ResultExt;
use tracing::Subscriber;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, EnvFilter, Registry};

use std::env;

const DEFAULT_TRACING_FILTER_DIRECTIVE: LevelFilter = LevelFilter::INFO;

const TRACING_FILTER_DIRECTIVE_ENV_VAR: &str = "TRACING_FILTER_DIRECTIVE";
const LOGGING_FORMATTER_ENV_VAR: &str = "LOGGING_FORMATTER";
const LOGGING_ANSI_ENABLED_ENV_VAR: &str = "LOGGING_ANSI_ENABLED";

pub type Result<T> = std::result::Result<T, error::TelemetryConfigError>;

/// How each tracing event is rendered.
///
/// See https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/format/index.html
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    Full,
    Compact,
    #[default]
    Pretty,
    /// Newline-delimited JSON, for log collectors.
    Json,
}

/// Logging settings read from the environment.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct TelemetryConfig {
    pub message_format: MessageFormat,
    pub ansi_enabled: bool,
}

impl TelemetryConfig {
    pub fn from_environment() -> Result<Self> {
        let message_format = match env::var(LOGGING_FORMATTER_ENV_VAR) {
            Ok(value) => serde_plain::from_str::<MessageFormat>(&value)
                .context(error::LogFormatterEnvSnafu { env_value: value })?,
            Err(_) => MessageFormat::default(),
        };
        let ansi_enabled = match env::var(LOGGING_ANSI_ENABLED_ENV_VAR) {
            Ok(value) => value
                .to_lowercase()
                .parse::<bool>()
                .context(error::LogAnsiEnvSnafu { env_value: value })?,
            Err(_) => false,
        };

        Ok(TelemetryConfig {
            message_format,
            ansi_enabled,
        })
    }

    /// Builds the subscriber described by this config on top of the given filter.
    pub fn subscriber(&self, env_filter: EnvFilter) -> Box<dyn Subscriber + Send + Sync> {
        let registry = Registry::default().with(env_filter);
        let layer = fmt::layer().with_ansi(self.ansi_enabled);
        // Each formatter produces a distinct layer type, so each arm boxes its own subscriber.
        match self.message_format {
            MessageFormat::Full => Box::new(registry.with(layer)),
            MessageFormat::Compact => Box::new(registry.with(layer.compact())),
            MessageFormat::Pretty => Box::new(registry.with(layer.pretty())),
            MessageFormat::Json => Box::new(registry.with(layer.json())),
        }
    }
}

/// Installs the global tracing subscriber described by the environment.
pub fn init_telemetry_from_env() -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(DEFAULT_TRACING_FILTER_DIRECTIVE.into())
        .with_env_var(TRACING_FILTER_DIRECTIVE_ENV_VAR)
        .from_env_lossy();

    let subscriber = TelemetryConfig::from_environment()?.subscriber(env_filter);
    tracing::subscriber::set_global_default(subscriber)
        .context(error::TracingConfigurationSnafu)?;

    Ok(())
}

pub mod error {
    use super::{LOGGING_ANSI_ENABLED_ENV_VAR, LOGGING_FORMATTER_ENV_VAR};
    use snafu::Snafu;
    use std::str::ParseBoolError;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum TelemetryConfigError {
        #[snafu(display("Error configuring tracing: '{}'", source))]
        TracingConfiguration {
            source: tracing::subscriber::SetGlobalDefaultError,
        },

        #[snafu(display(
            "Could not parse formatter from environment variable '{}={}': '{}'",
            LOGGING_FORMATTER_ENV_VAR,
            env_value,
            source
        ))]
        LogFormatterEnv {
            source: serde_plain::Error,
            env_value: String,
        },

        #[snafu(display(
            "Could not parse ANSI enablement from environment variable '{}={}': '{}'",
            LOGGING_ANSI_ENABLED_ENV_VAR,
            env_value,
            source
        ))]
        LogAnsiEnv {
            source: ParseBoolError,
            env_value: String,
        },
    }
}
