use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormatConfig;

/// Installs the global subscriber. `RUST_LOG` overrides `level`. Logs go to
/// stderr so stdout stays free for reports.
pub fn init_tracing(level: &str, format: LogFormatConfig) -> Result<(), anyhow::Error> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormatConfig::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
        LogFormatConfig::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?,
    }

    Ok(())
}
