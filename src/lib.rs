//! # seqload
//!
//! CSV-driven replay of fixed HTTP call sequences against a REST API.
//!
//! The core is an exactly-once work distribution engine: a finite work queue
//! drained by a ramped pool of tokio workers, with a dedup tracker guarding
//! against re-delivery and a result collector feeding reports and the
//! controller's termination check.

pub mod collector;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod report;
pub mod scenario;
pub mod source;
pub mod telemetry;
