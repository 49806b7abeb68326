//! Data transfer objects for the HTTP endpoint

use serde::{Deserialize, Serialize};

use crate::controller::SchedulerState;

/// Liveness response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness response, carrying the scheduler state it was derived from
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub completed_cycles: u64,
    pub scheduler: SchedulerState,
}
