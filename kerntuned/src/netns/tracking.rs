//! Per-tuner namespace tracking
//!
//! Each tuner owns one keyed set of the namespaces it has seen, keyed by
//! cookie. Cookie 0 (the global namespace) is implicitly present and never
//! stored.

use std::collections::HashSet;

use crate::domain::NetnsCookie;

/// Owned keyed collection of tracked namespaces for one tuner.
///
/// Invariant: a tuner never holds two entries with the same cookie; the
/// global cookie is always implicitly tracked.
#[derive(Debug, Default)]
pub struct NetnsSet {
    cookies: HashSet<u64>,
}

impl NetnsSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `cookie`. Idempotent; tracking the global cookie is a no-op.
    /// Returns whether a new entry was created.
    pub fn add(&mut self, cookie: NetnsCookie) -> bool {
        if cookie.is_global() {
            return false;
        }
        self.cookies.insert(cookie.0)
    }

    /// Stop tracking `cookie`. No-op if absent or global.
    pub fn remove(&mut self, cookie: NetnsCookie) {
        if cookie.is_global() {
            return;
        }
        self.cookies.remove(&cookie.0);
    }

    /// Whether `cookie` is tracked. Always true for the global cookie.
    #[must_use]
    pub fn tracks(&self, cookie: NetnsCookie) -> bool {
        cookie.is_global() || self.cookies.contains(&cookie.0)
    }

    /// Number of tracked non-global namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Iterate tracked non-global cookies (unordered).
    pub fn iter(&self) -> impl Iterator<Item = NetnsCookie> + '_ {
        self.cookies.iter().map(|c| NetnsCookie(*c))
    }
}
