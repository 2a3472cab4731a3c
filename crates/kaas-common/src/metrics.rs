//! Metrics registry for KaaS
//!
//! Provides OpenTelemetry metrics for:
//! - Deploys (count and duration by workload kind and outcome)
//! - Shared Ingress updates rejected for a stale resourceVersion
//! - Per-app status lookups that failed inside a listing
//!
//! Instruments record into the global meter provider; until telemetry
//! installs one they are no-ops.

use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::Error;

/// Global meter for KaaS metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("kaas"));

// ============================================================================
// Deploy Metrics
// ============================================================================

/// Counter of deploy requests
///
/// Labels:
/// - `workload`: app, database
/// - `outcome`: created, invalid, conflict, partial, failed
pub static DEPLOYS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kaas_deploys_total")
        .with_description("Total number of deploy requests by outcome")
        .with_unit("{deploys}")
        .build()
});

/// Histogram of deploy duration
///
/// Labels:
/// - `workload`: app, database
/// - `outcome`: created, invalid, conflict, partial, failed
pub static DEPLOY_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("kaas_deploy_duration_seconds")
        .with_description("Duration of deploy requests in seconds")
        .with_unit("s")
        .build()
});

// ============================================================================
// Routing Metrics
// ============================================================================

/// Counter of Ingress updates rejected because another writer got there first
///
/// Labels:
/// - `ingress`: shared Ingress name
pub static ROUTING_CONFLICTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kaas_routing_conflicts_total")
        .with_description("Total number of version conflicts on the shared Ingress")
        .with_unit("{conflicts}")
        .build()
});

// ============================================================================
// Status Metrics
// ============================================================================

/// Counter of app status lookups that failed while listing every app
pub static STATUS_LOOKUP_FAILURES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kaas_status_lookup_failures_total")
        .with_description("Total number of failed per-app status lookups")
        .with_unit("{lookups}")
        .build()
});

// ============================================================================
// Helper Types
// ============================================================================

/// Kind of workload a deploy creates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// Stateless app (Deployment)
    App,
    /// Database (StatefulSet)
    Database,
}

impl WorkloadKind {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Database => "database",
        }
    }
}

/// How a deploy ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Every object was created
    Created,
    /// Rejected before any orchestrator call
    Invalid,
    /// Name already taken
    Conflict,
    /// Failed after some objects were created
    Partial,
    /// Failed with nothing created
    Failed,
}

impl DeployOutcome {
    /// Classify a deploy result
    pub fn of<T>(result: &Result<T, Error>) -> Self {
        match result {
            Ok(_) => Self::Created,
            Err(Error::Validation { .. }) => Self::Invalid,
            Err(Error::Conflict { .. }) => Self::Conflict,
            Err(Error::PartialFailure { .. }) => Self::Partial,
            Err(_) => Self::Failed,
        }
    }

    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Invalid => "invalid",
            Self::Conflict => "conflict",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record a deploy with timing
pub struct DeployTimer {
    workload: WorkloadKind,
    start: Instant,
}

impl DeployTimer {
    /// Start timing a deploy
    pub fn start(workload: WorkloadKind) -> Self {
        Self {
            workload,
            start: Instant::now(),
        }
    }

    /// Record the deploy's outcome and duration
    pub fn finish<T>(self, result: &Result<T, Error>) -> DeployOutcome {
        let outcome = DeployOutcome::of(result);
        let labels = [
            KeyValue::new("workload", self.workload.as_str()),
            KeyValue::new("outcome", outcome.as_str()),
        ];
        DEPLOY_DURATION.record(self.start.elapsed().as_secs_f64(), &labels);
        DEPLOYS.add(1, &labels);
        outcome
    }
}

/// Record a version conflict on the shared Ingress
pub fn record_routing_conflict(ingress: &str) {
    ROUTING_CONFLICTS.add(1, &[KeyValue::new("ingress", ingress.to_string())]);
}

/// Record a failed per-app status lookup
pub fn record_status_lookup_failure() {
    STATUS_LOOKUP_FAILURES.add(1, &[]);
}
