//! Prometheus counters for watch loops, dispatch, store retries and transitions.
//!
//! Counters are process wide. Register them into a registry of your choice with
//! [`register_custom_metrics`], or scrape the crate [`struct@REGISTRY`] through [`gather_text`].

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;


lazy_static! {
    pub static ref WATCH_FIRES: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_fires_total", "One-shot store watches that fired, by event"),
        &["event"]
    )
    .expect("metric can not be created");

    pub static ref NOTIFICATIONS_DISPATCHED: IntCounterVec = IntCounterVec::new(
        Opts::new("notifications_dispatched_total", "Notifications handed to listeners, by change kind"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref STORE_RETRIES: IntCounterVec = IntCounterVec::new(
        Opts::new("store_retries_total", "Store operations retried after a transient failure"),
        &["op"]
    )
    .expect("metric can not be created");

    pub static ref TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("state_transitions_total", "State transition messages processed, by outcome"),
        &["model", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        if let Err(e) = register_custom_metrics(&registry) {
            warn!("failed to register custom metrics: {:?}", e);
        }
        registry
    };
}

pub fn register_custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(WATCH_FIRES.clone()))?;
    registry.register(Box::new(NOTIFICATIONS_DISPATCHED.clone()))?;
    registry.register(Box::new(STORE_RETRIES.clone()))?;
    registry.register(Box::new(TRANSITIONS.clone()))?;
    Ok(())
}

/// Text exposition of the crate registry for Prometheus to scrape
pub fn gather_text() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode custom metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
