//! Prometheus metrics for entitlement-service.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

/// Chapter unlock attempts by outcome (`ok` or an error kind).
pub static UNLOCKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "entitlement_unlocks_total",
        "Total number of chapter unlock attempts",
        &["outcome"]
    )
    .expect("Failed to register unlocks_total")
});

/// Coin credits by outcome (`ok`, `replayed`, or an error kind).
pub static COIN_PURCHASES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "entitlement_coin_purchases_total",
        "Total number of coin purchase attempts",
        &["outcome"]
    )
    .expect("Failed to register coin_purchases_total")
});

/// Subscription operations by operation and outcome.
pub static SUBSCRIPTION_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "entitlement_subscription_events_total",
        "Total number of subscription lifecycle operations",
        &["operation", "outcome"]
    )
    .expect("Failed to register subscription_events_total")
});

/// Access decisions by matched rule.
pub static ACCESS_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "entitlement_access_decisions_total",
        "Total number of chapter access decisions",
        &["reason"]
    )
    .expect("Failed to register access_decisions_total")
});

/// Payment provider call duration.
pub static PROVIDER_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "entitlement_provider_call_duration_seconds",
        "Payment provider call duration in seconds",
        &["provider", "operation"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0]
    )
    .expect("Failed to register provider_call_duration")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "entitlement_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&UNLOCKS_TOTAL);
    Lazy::force(&COIN_PURCHASES_TOTAL);
    Lazy::force(&SUBSCRIPTION_EVENTS_TOTAL);
    Lazy::force(&ACCESS_DECISIONS_TOTAL);
    Lazy::force(&PROVIDER_CALL_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Outcome label for a result: `ok` or the error kind.
pub fn outcome<T>(result: &Result<T, super::AccessError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}
