use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing::debug;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global subscriber. `RUST_LOG` refines the configured level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })?;

    debug!(level = %logging.level, format = ?logging.format, "telemetry ready");
    Ok(())
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    }
}

/// Register descriptions for every metric the crate emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "verdant_cache_hit_total",
            Unit::Count,
            "Cache reads answered from a stored value, fresh or stale."
        );
        describe_counter!(
            "verdant_cache_miss_total",
            Unit::Count,
            "Cache reads that found no entry and started a fetch."
        );
        describe_counter!(
            "verdant_cache_coalesced_total",
            Unit::Count,
            "Cache reads that joined a fetch already in flight."
        );
        describe_counter!(
            "verdant_cache_refresh_total",
            Unit::Count,
            "Background or explicit refreshes started."
        );
        describe_counter!(
            "verdant_cache_refresh_failed_total",
            Unit::Count,
            "Background refreshes that failed while a previous value was kept."
        );
        describe_counter!(
            "verdant_cache_evict_total",
            Unit::Count,
            "Cache entries evicted due to capacity."
        );
        describe_counter!(
            "verdant_login_failure_total",
            Unit::Count,
            "Rejected admin login attempts."
        );
        describe_gauge!(
            "verdant_admin_sessions",
            Unit::Count,
            "Admin sessions currently live."
        );
    });
}
