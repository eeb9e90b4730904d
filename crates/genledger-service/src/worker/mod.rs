//! Generation worker integration.
//!
//! The worker receives jobs over `POST {worker}/jobs`, answers status polls
//! on `GET {worker}/jobs/{id}` and reports progress back through the signed
//! `/webhooks/{kind}-completion` callbacks.

pub mod client;
pub mod types;

pub use client::{WorkerClient, WorkerError};
pub use types::{Artifact, DispatchRequest, WorkerCallback, WorkerReport, WorkerResult};
