//! genledger HTTP API service.
//!
//! This crate provides the HTTP API for genledger, including:
//!
//! - Credit balances and transaction history
//! - Generation jobs: charging, dispatch to the worker, status reads
//! - Generated files in a user-partitioned object store
//! - Paystack checkouts, verification and subscriptions
//! - Signed webhooks from the worker and from Paystack
//!
//! # Authentication
//!
//! 1. **Identity JWTs** - end-user requests; HS256 with a shared secret or
//!    RS256 against the identity provider's JWKS
//! 2. **Admin API key** - privileged endpoints
//! 3. **HMAC-SHA512 signatures** - inbound webhooks

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)]

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod ledger;
pub mod payments;
pub mod paystack;
pub mod routes;
pub mod state;
pub mod storage;
pub mod worker;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use idempotency::IdempotencyGuard;
pub use ledger::CreditLedger;
pub use paystack::{PaystackClient, PaystackError};
pub use routes::create_router;
pub use state::AppState;
pub use storage::{MemoryObjectStore, ObjectStore};
pub use worker::{WorkerClient, WorkerError};
