//! Tracing setup.

use anyhow::{Context, Result};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use vecgraph_types::Settings;

/// Install the global fmt subscriber.
///
/// The filter comes from `RUST_LOG` when set, else from `settings.log_level`.
/// If a global subscriber is already installed this does nothing.
pub fn init_tracing(settings: &Settings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.log_level)
            .with_context(|| format!("Invalid log level {:?}", settings.log_level))?,
    };
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("Tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_noop() {
        let settings = Settings::default();
        init_tracing(&settings).unwrap();
        init_tracing(&settings).unwrap();
    }
}
