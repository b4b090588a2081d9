//! Producer health classification.
//!
//! Three boolean signals are recomputed from scratch on every check and folded
//! into a tri-state status. There is no history and no debounce, so the status
//! can flap between consecutive checks.

use std::time::Duration;

use serde::Serialize;

use crate::types::ProducerState;

/// Overall producer health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Reachable, fresh and responsive
    Healthy,
    /// Reachable, but data is stale or commands go unanswered
    Degraded,
    /// Neither shared memory nor any snapshot is reachable
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Inputs to a health decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HealthSignals {
    /// A shared-memory region is attached or a snapshot parses
    pub shm_or_snapshot_accessible: bool,
    /// Latest data is inside its freshness window
    pub data_fresh: bool,
    /// The producer acknowledged a ping in time
    pub producer_responsive: bool,
}

impl HealthSignals {
    /// Fold the signals into a status.
    pub fn classify(&self) -> HealthStatus {
        if !self.shm_or_snapshot_accessible {
            HealthStatus::Unhealthy
        } else if self.data_fresh && self.producer_responsive {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }
}

/// Health check output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Raw signals
    #[serde(flatten)]
    pub signals: HealthSignals,
    /// Derived status
    pub status: HealthStatus,
    /// Lifecycle state from the status snapshot, if one was readable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer_state: Option<ProducerState>,
    /// Age of the latest detections, if their timestamp is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections_age_ms: Option<u64>,
}

impl HealthReport {
    /// Build a report from signals and context.
    pub fn new(
        signals: HealthSignals,
        producer_state: Option<ProducerState>,
        detections_age: Option<Duration>,
    ) -> Self {
        Self {
            status: signals.classify(),
            signals,
            producer_state,
            detections_age_ms: detections_age.map(|age| age.as_millis() as u64),
        }
    }
}
