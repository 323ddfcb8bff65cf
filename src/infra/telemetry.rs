use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names::{
    METRIC_CLIENTS, METRIC_EVICT_MS, METRIC_EVICT_TOTAL, METRIC_EXPIRED_TOTAL,
    METRIC_FALLBACK_TOTAL, METRIC_HIT_TOTAL, METRIC_MISS_TOTAL, METRIC_REVALIDATION_TOTAL,
    METRIC_WRITE_FAILED_TOTAL,
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT_TOTAL,
            Unit::Count,
            "Total number of cache hits, labelled by partition."
        );
        describe_counter!(
            METRIC_MISS_TOTAL,
            Unit::Count,
            "Total number of lookups that found no usable entry."
        );
        describe_counter!(
            METRIC_EXPIRED_TOTAL,
            Unit::Count,
            "Total number of entries dropped on read for exceeding the max age."
        );
        describe_counter!(
            METRIC_WRITE_FAILED_TOTAL,
            Unit::Count,
            "Total number of responses served but not cached after a storage failure."
        );
        describe_counter!(
            METRIC_EVICT_TOTAL,
            Unit::Count,
            "Total number of entries evicted to respect partition budgets."
        );
        describe_histogram!(
            METRIC_EVICT_MS,
            Unit::Milliseconds,
            "Eviction pass latency in milliseconds."
        );
        describe_counter!(
            METRIC_FALLBACK_TOTAL,
            Unit::Count,
            "Total number of fallback responses, labelled by kind."
        );
        describe_counter!(
            METRIC_REVALIDATION_TOTAL,
            Unit::Count,
            "Total number of background revalidations, labelled by outcome."
        );
        describe_gauge!(
            METRIC_CLIENTS,
            Unit::Count,
            "Current number of connected clients."
        );
    });
}
