//! Prometheus counters, registered on the default registry so any metrics
//! endpoint in the host process can gather them.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

pub static SUBMISSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "einvoice_submissions_total",
        "Submission handler outcomes by provider and resulting status",
        &["provider", "status"]
    )
    .expect("einvoice_submissions_total registration")
});

pub static STATUS_CHECKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "einvoice_status_checks_total",
        "Status poll outcomes by provider",
        &["provider", "outcome"]
    )
    .expect("einvoice_status_checks_total registration")
});

pub static RATE_LIMITED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "einvoice_rate_limited_total",
        "Calls refused by a named provider limit",
        &["provider", "limit"]
    )
    .expect("einvoice_rate_limited_total registration")
});
