use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "deckhand_renderer_spawn_total",
            Unit::Count,
            "Total number of renderer processes spawned."
        );
        describe_counter!(
            "deckhand_renderer_exit_total",
            Unit::Count,
            "Total number of renderer process exits, labelled by result."
        );
        describe_gauge!(
            "deckhand_renderer_live",
            Unit::Count,
            "Renderer processes currently tracked by the supervisor."
        );
        describe_counter!(
            "deckhand_build_total",
            Unit::Count,
            "Total number of deck builds, labelled by result."
        );
        describe_histogram!(
            "deckhand_build_ms",
            Unit::Milliseconds,
            "Successful deck build latency in milliseconds."
        );
        describe_counter!(
            "deckhand_deck_busy_total",
            Unit::Count,
            "Operations rejected because the deck was locked."
        );
        describe_counter!(
            "deckhand_screenshot_failure_total",
            Unit::Count,
            "Total number of failed cover screenshots."
        );
        describe_counter!(
            "deckhand_proxy_error_total",
            Unit::Count,
            "Preview proxy requests that failed upstream."
        );
    });
}
