//! Paystack integration for checkouts and subscriptions.
//!
//! Paystack handles:
//! - Hosted checkout (`/transaction/initialize`)
//! - Transaction verification (`/transaction/verify/{reference}`)
//! - Subscription cancellation (`/subscription/disable`)
//! - Signed webhooks (`x-paystack-signature`, HMAC-SHA512 with the secret key)

pub mod client;
pub mod types;

pub use client::{PaystackClient, PaystackError};
pub use types::*;
