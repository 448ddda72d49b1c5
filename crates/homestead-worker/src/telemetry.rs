use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the worker process.
///
/// `RUST_LOG` overrides the default filter. `log_format` selects JSON lines
/// (`json`) or the human readable formatter (anything else).
pub fn init_telemetry(log_format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "homestead=debug,sqlx=warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    let initialized = if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    initialized.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    tracing::debug!(log_format = %log_format, "Tracing initialized");
    Ok(())
}
