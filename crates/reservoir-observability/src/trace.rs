//! Structured tracing setup.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{LogFormat, ObservabilityConfig, ObservabilityError};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over [`ObservabilityConfig::default_filter`]. Calling this
/// twice returns [`ObservabilityError::TracingInit`].
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))
        .map_err(|e| ObservabilityError::TracingInit(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| ObservabilityError::TracingInit(e.to_string()))?;

    tracing::info!(
        filter = %config.default_filter,
        format = ?config.log_format,
        "Initialized structured tracing"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_initialization_fails() {
        let config = ObservabilityConfig {
            log_format: LogFormat::Pretty,
            ..ObservabilityConfig::default()
        };
        let _ = init_tracing(&config);
        let second = init_tracing(&config);
        assert!(matches!(second, Err(ObservabilityError::TracingInit(_))));
    }
}
