use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register units and help text for every metric the service emits. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pressroom_cache_hit_total",
            Unit::Count,
            "Total number of result cache hits."
        );
        describe_counter!(
            "pressroom_cache_miss_total",
            Unit::Count,
            "Total number of result cache misses, including expired entries."
        );
        describe_counter!(
            "pressroom_cache_evict_total",
            Unit::Count,
            "Total number of result cache evictions due to entry or byte capacity."
        );
        describe_counter!(
            "pressroom_cache_expired_total",
            Unit::Count,
            "Total number of result cache entries dropped after their lifetime elapsed."
        );
        describe_counter!(
            "pressroom_engine_launch_total",
            Unit::Count,
            "Total number of engine launch attempts."
        );
        describe_counter!(
            "pressroom_engine_launch_failed_total",
            Unit::Count,
            "Total number of engine launches that failed or timed out."
        );
        describe_histogram!(
            "pressroom_engine_launch_ms",
            Unit::Milliseconds,
            "Engine launch latency in milliseconds."
        );
        describe_counter!(
            "pressroom_engine_restart_total",
            Unit::Count,
            "Total number of engine restarts after a crash."
        );
        describe_counter!(
            "pressroom_session_acquired_total",
            Unit::Count,
            "Total number of render sessions leased from the pool."
        );
        describe_counter!(
            "pressroom_session_released_total",
            Unit::Count,
            "Total number of render sessions returned to the pool."
        );
        describe_counter!(
            "pressroom_session_leaked_total",
            Unit::Count,
            "Total number of render sessions dropped without an explicit release."
        );
        describe_histogram!(
            "pressroom_session_wait_ms",
            Unit::Milliseconds,
            "Time spent waiting for a render session in milliseconds."
        );
        describe_counter!(
            "pressroom_pool_exhausted_total",
            Unit::Count,
            "Total number of acquisitions that gave up waiting for a session."
        );
        describe_histogram!(
            "pressroom_render_ms",
            Unit::Milliseconds,
            "Latency of successful PDF renders in milliseconds."
        );
        describe_counter!(
            "pressroom_render_failed_total",
            Unit::Count,
            "Total number of PDF renders that failed."
        );
        describe_counter!(
            "pressroom_render_deduped_total",
            Unit::Count,
            "Total number of requests that joined a render already in flight."
        );
    });
}
