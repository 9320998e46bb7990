//! # Application State Management
//!
//! Shared state that every HTTP handler and every assistant WebSocket actor can
//! reach at the same time: configuration, request metrics, the live-call count
//! and the ledger of captured leads and appointments.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Lets many handlers and actors share ownership of the same data
//! - **Memory safety**: The data is freed when the last reference is dropped
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Many readers OR one writer at a time
//! - **Use here**: Config is read on every new connection, written only by `PUT /api/v1/config`
//!
//! ### Arc<RwLock<T>> Pattern
//! Cloning `AppState` clones the `Arc`s, not the data, so every worker thread
//! sees the same configuration and counters.

use crate::config::AppConfig;
use crate::ledger::BusinessLedger;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across handlers and actors.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and call metrics
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Leads and appointments captured by tool calls
    pub ledger: Arc<BusinessLedger>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and calls.
///
/// - **request_count** / **error_count**: REST traffic since start
/// - **active_sessions**: live calls currently connecting or running
/// - **total_sessions**: live calls started since start
/// - **endpoint_metrics**: per-endpoint statistics
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_sessions: u32,
    pub total_sessions: u64,
    /// Key: endpoint name (e.g., "GET /api/v1/leads")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a single API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    /// Cumulative processing time (milliseconds)
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let ledger = BusinessLedger::new(config.performance.max_ledger_records);
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            ledger: Arc::new(ledger),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately, so a slow caller never
    /// blocks a config update.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// A new ledger retention limit applies immediately.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                let retention = new_config.performance.max_ledger_records;
                *self.config.write().unwrap() = new_config;
                self.ledger.set_capacity(retention).map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record timing and outcome for one request to `endpoint`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Claim a live-call slot if fewer than `max` calls are running.
    ///
    /// Check and increment happen under one write lock, so two connections
    /// racing for the last slot cannot both win.
    pub fn try_acquire_session(&self, max: usize) -> bool {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions as usize >= max {
            return false;
        }
        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
        true
    }

    /// Give a live-call slot back. Never goes below zero.
    pub fn release_session(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Consistent copy of the metrics, taken under a single read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            total_sessions: metrics.total_sessions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds; 0.0 before the first request.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, from 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
