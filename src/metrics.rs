//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Job pipeline metrics
    pub static ref JOBS_ENQUEUED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("badgeharbor_jobs_enqueued_total", "Total number of jobs enqueued"),
        &["job_type"]
    ).expect("metric can be created");
    pub static ref JOBS_PROCESSED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("badgeharbor_jobs_processed_total", "Total number of jobs processed"),
        &["job_type", "outcome"]
    ).expect("metric can be created");
    pub static ref JOB_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "badgeharbor_job_duration_seconds",
            "Job dispatch duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["job_type"]
    ).expect("metric can be created");
    pub static ref JOBS_QUEUED: IntGaugeVec = IntGaugeVec::new(
        Opts::new("badgeharbor_jobs_queued", "Current number of jobs per status"),
        &["domain", "status"]
    ).expect("metric can be created");

    // Federation metrics
    pub static ref ACTIVITIES_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("badgeharbor_activities_received_total", "Total number of ActivityPub activities received"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("badgeharbor_deliveries_total", "Total number of outbound activity deliveries"),
        &["status"]
    ).expect("metric can be created");

    // Cache metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("badgeharbor_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("badgeharbor_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");

    // Error metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("badgeharbor_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(JOBS_ENQUEUED_TOTAL.clone()))
        .expect("JOBS_ENQUEUED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(JOBS_PROCESSED_TOTAL.clone()))
        .expect("JOBS_PROCESSED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(JOB_DURATION_SECONDS.clone()))
        .expect("JOB_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(JOBS_QUEUED.clone()))
        .expect("JOBS_QUEUED can be registered");
    REGISTRY
        .register(Box::new(ACTIVITIES_RECEIVED_TOTAL.clone()))
        .expect("ACTIVITIES_RECEIVED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DELIVERIES_TOTAL.clone()))
        .expect("DELIVERIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_HITS_TOTAL.clone()))
        .expect("CACHE_HITS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_MISSES_TOTAL.clone()))
        .expect("CACHE_MISSES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
