use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Dependencies that are chatty at `debug` and below.
const QUIET_TARGETS: &[(&str, LevelFilter)] = &[
    ("sqlx::query", LevelFilter::WARN),
    ("tungstenite", LevelFilter::INFO),
    ("tokio_tungstenite", LevelFilter::INFO),
    ("hyper_util", LevelFilter::INFO),
    ("reqwest", LevelFilter::INFO),
];

/// Install the global subscriber for either process and describe the metrics
/// both of them emit. `RUST_LOG` still wins over the configured level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(logging.level))
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| InfraError::Telemetry(err.to_string()))
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    for (target, cap) in QUIET_TARGETS {
        if level > *cap {
            if let Ok(directive) = format!("{target}={cap}").parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "wittr_cache_hit_total",
            Unit::Count,
            "Cache lookups answered from a tier, labelled by tier."
        );
        describe_counter!(
            "wittr_cache_miss_total",
            Unit::Count,
            "Cache lookups that found nothing usable, labelled by tier."
        );
        describe_counter!(
            "wittr_cache_evict_total",
            Unit::Count,
            "Entries removed from a tier, labelled by tier and reason."
        );
        describe_gauge!(
            "wittr_feed_subscribers",
            Unit::Count,
            "Live feed subscribers at the last subscribe or tick."
        );
        describe_counter!(
            "wittr_feed_broadcast_total",
            Unit::Count,
            "Posts broadcast by the feed server."
        );
        describe_counter!(
            "wittr_store_pruned_total",
            Unit::Count,
            "Posts pruned from the local store to respect its bound."
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_level_caps_noisy_dependencies() {
        let rendered = env_filter(LevelFilter::DEBUG).to_string().to_lowercase();
        assert!(rendered.contains("sqlx::query=warn"), "{rendered}");
        assert!(rendered.contains("tungstenite=info"), "{rendered}");
    }

    #[test]
    fn info_level_leaves_dependencies_alone() {
        let rendered = env_filter(LevelFilter::INFO).to_string().to_lowercase();
        assert!(rendered.contains("sqlx::query=warn"), "{rendered}");
        assert!(!rendered.contains("reqwest"), "{rendered}");
    }
}
