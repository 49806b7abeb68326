//! HTTP endpoint for Prometheus scraping and Kubernetes probes
//!
//! Serves the metrics registry plus `/healthz` and `/readyz`.

mod dto;
mod handlers;
mod server;

pub use dto::{HealthResponse, ReadyResponse};
pub use server::{router, run_server, ServerState};
