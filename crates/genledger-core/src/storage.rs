//! Structured object-storage keys.
//!
//! User-owned objects live under `user_{owner}/{kind}/{resource}/{name}`.
//! Ownership is decided on the parsed owner id, never on a raw string
//! prefix, so `user_1...` can never match `user_12...`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::JobKind;
use crate::UserId;

const OWNER_PREFIX: &str = "user_";

/// A parsed object-storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageKey {
    owner: UserId,
    kind: JobKind,
    resource: String,
    name: String,
}

impl StorageKey {
    /// Build a key, validating the free-form segments.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidStorageKey` if `resource` or `name` is empty,
    /// contains `/`, or is a dot segment.
    pub fn new(
        owner: UserId,
        kind: JobKind,
        resource: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let resource = resource.into();
        let name = name.into();
        validate_segment(&resource)?;
        validate_segment(&name)?;
        Ok(Self {
            owner,
            kind,
            resource,
            name,
        })
    }

    /// The listing prefix for everything a user owns.
    #[must_use]
    pub fn owner_prefix(owner: &UserId) -> String {
        format!("{OWNER_PREFIX}{owner}/")
    }

    /// The owning user.
    #[must_use]
    pub const fn owner(&self) -> &UserId {
        &self.owner
    }

    /// The resource kind.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        self.kind
    }

    /// The resource id segment (a job id for generated files).
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The file name segment.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `user` owns this key.
    #[must_use]
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        self.owner == *user
    }
}

fn validate_segment(segment: &str) -> Result<(), CoreError> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains('/') {
        return Err(CoreError::InvalidStorageKey(format!(
            "invalid key segment: {segment:?}"
        )));
    }
    Ok(())
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{OWNER_PREFIX}{}/{}/{}/{}",
            self.owner,
            self.kind.as_str(),
            self.resource,
            self.name
        )
    }
}

impl FromStr for StorageKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidStorageKey(s.to_string());

        let segments: Vec<&str> = s.split('/').collect();
        let [owner, kind, resource, name] = segments.as_slice() else {
            return Err(invalid());
        };

        let owner = owner
            .strip_prefix(OWNER_PREFIX)
            .ok_or_else(invalid)?
            .parse::<UserId>()
            .map_err(|_| invalid())?;
        let kind = JobKind::parse(kind).map_err(|_| invalid())?;

        Self::new(owner, kind, *resource, *name)
    }
}

impl TryFrom<String> for StorageKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats_with_owner_prefix() {
        let owner = UserId::generate();
        let key = StorageKey::new(owner, JobKind::Image, "job-1", "0.png").unwrap();
        assert_eq!(key.to_string(), format!("user_{owner}/image/job-1/0.png"));
        assert!(key.to_string().starts_with(&StorageKey::owner_prefix(&owner)));
    }

    #[test]
    fn key_parses_back() {
        let owner = UserId::generate();
        let text = format!("user_{owner}/video/abc/clip.mp4");
        let key: StorageKey = text.parse().unwrap();
        assert_eq!(key.owner(), &owner);
        assert_eq!(key.kind(), JobKind::Video);
        assert_eq!(key.resource(), "abc");
        assert_eq!(key.name(), "clip.mp4");
    }

    #[test]
    fn ownership_uses_parsed_owner() {
        let owner = UserId::generate();
        let other = UserId::generate();
        let key = StorageKey::new(owner, JobKind::Blog, "r", "a.md").unwrap();
        assert!(key.is_owned_by(&owner));
        assert!(!key.is_owned_by(&other));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        let owner = UserId::generate();
        for bad in [
            String::new(),
            "user_42/image/a/b.png".to_string(),
            format!("{owner}/image/a/b.png"),
            format!("user_{owner}/podcast/a/b.mp3"),
            format!("user_{owner}/image/../b.png"),
            format!("user_{owner}/image/a/b/c.png"),
            format!("user_{owner}/image/a/"),
        ] {
            assert!(bad.parse::<StorageKey>().is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn key_serializes_as_string() {
        let owner = UserId::generate();
        let key = StorageKey::new(owner, JobKind::Book, "r", "book.pdf").unwrap();
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json, serde_json::json!(key.to_string()));
    }
}
