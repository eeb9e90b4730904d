//! Identifier types for genledger.
//!
//! Row ids are random UUIDs; ledger transaction ids are ULIDs. All of them
//! serialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;
use uuid::Uuid;

/// Define a string-serialized identifier newtype over `$inner`.
///
/// `$parse` turns text into `$inner`; any failure becomes `$error`.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty), $parse:path, $error:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name($inner);

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $parse(s).map(Self).map_err(|_| $error)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }
    };
}

/// Random (v4) UUID constructors and accessors, shared by the row ids.
macro_rules! uuid_ids {
    ($($name:ident),+ $(,)?) => {$(
        impl $name {
            /// Wrap an existing UUID, e.g. one read back from the database.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// A fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }
    )+};
}

id_type!(
    /// A local user. Each maps 1:1 to an identity-provider subject.
    UserId(Uuid), Uuid::parse_str, IdError::InvalidUuid
);
id_type!(
    /// A generation job. Also handed to the worker as the callback correlation token.
    JobId(Uuid), Uuid::parse_str, IdError::InvalidUuid
);
id_type!(
    /// A generated file.
    FileId(Uuid), Uuid::parse_str, IdError::InvalidUuid
);
id_type!(
    /// A local subscription record.
    SubscriptionId(Uuid), Uuid::parse_str, IdError::InvalidUuid
);
id_type!(
    /// A ledger entry. ULIDs sort by creation time, so a user's history
    /// orders chronologically by id.
    #[derive(PartialOrd, Ord)]
    TransactionId(Ulid), Ulid::from_string, IdError::InvalidUlid
);

uuid_ids!(UserId, JobId, FileId, SubscriptionId);

impl TransactionId {
    /// A new id stamped with the current time.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,
}
