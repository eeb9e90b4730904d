//! Core types and utilities for genledger.
//!
//! This crate provides the foundational types shared by the store and the
//! HTTP service:
//!
//! - **Identifiers**: `UserId`, `JobId`, `FileId`, `SubscriptionId`, `TransactionId`
//! - **Accounts**: `User`, `Plan`, `Subscription`
//! - **Credits**: `CreditTransaction`, `TransactionType`
//! - **Jobs**: `Job`, `JobKind`, `JobSpec`, `GeneratedFile`, `JobPricing`
//! - **Payments**: `Payment`
//! - **Status vocabularies**: `JobStatus`, `WorkerStatus`, `FrontendStatus`, `PaymentStatus`
//! - **Storage keys**: `StorageKey`
//!
//! # Credit Unit
//!
//! Credits are whole integers. A user's balance never goes below zero; a
//! deduction that would do so is rejected, never clamped.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod credits;
pub mod error;
pub mod ids;
pub mod job;
pub mod payment;
pub mod status;
pub mod storage;

pub use account::{
    BillingInterval, Plan, Subscription, SubscriptionStatus, User, DEFAULT_SIGNUP_CREDITS,
};
pub use credits::{CreditTransaction, TransactionType};
pub use error::{CoreError, Result};
pub use ids::{FileId, IdError, JobId, SubscriptionId, TransactionId, UserId};
pub use job::{GeneratedFile, Job, JobKind, JobPricing, JobSpec, MAX_JOB_QUANTITY};
pub use payment::Payment;
pub use status::{FrontendStatus, JobStatus, PaymentStatus, WorkerStatus};
pub use storage::StorageKey;
