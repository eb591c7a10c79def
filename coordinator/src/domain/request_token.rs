//! Opaque token identifying a batch of geofence registrations.
//!
//! Two tokens are equal when they share a key, even when one of them has
//! been cancelled. Cancellation flags are shared between clones so the
//! location service and the coordinator observe the same state.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Handle passed to the location service when adding geofences and used
/// later to remove every geofence registered under it.
#[derive(Clone)]
pub struct RequestToken {
    key: Arc<str>,
    cancelled: Arc<AtomicBool>,
}

impl RequestToken {
    /// Create a live token for `key`.
    #[must_use]
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self {
            key: key.into(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stable identity of the token.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Invalidate this token and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether this token or any clone of it was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl PartialEq for RequestToken {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for RequestToken {}

impl Hash for RequestToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestToken")
            .field("key", &self.key)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = RequestToken::new("transitions");
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn identity_follows_the_key() {
        let live = RequestToken::new("transitions");
        let cancelled = RequestToken::new("transitions");
        cancelled.cancel();
        assert_eq!(live, cancelled);
        assert_ne!(live, RequestToken::new("other"));
    }
}
