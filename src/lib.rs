//! validation-operator: cluster-wide Kubernetes compliance scanner
//!
//! This crate periodically discovers every resource type the cluster
//! serves, validates each object against a set of checks and republishes
//! the results as Prometheus metrics.

pub mod config;
pub mod controller;
pub mod error;
pub mod validation;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::config::ScannerConfig;
pub use crate::error::{Error, Result};
