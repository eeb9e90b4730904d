//! API handlers.

use serde::Deserialize;

pub mod admin;
pub mod credits;
pub mod files;
pub mod health;
pub mod jobs;
pub mod payments;
pub mod subscriptions;
pub mod webhooks;

/// Largest page any list endpoint returns.
const MAX_PAGE: usize = 100;

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Maximum number of items to return (default: 50, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

const fn default_limit() -> usize {
    50
}

impl PageQuery {
    /// The effective page size.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE)
    }
}

/// Trim a page fetched with one extra row and report whether more exist.
pub(crate) fn split_page<T>(mut items: Vec<T>, limit: usize) -> (Vec<T>, bool) {
    let has_more = items.len() > limit;
    items.truncate(limit);
    (items, has_more)
}
