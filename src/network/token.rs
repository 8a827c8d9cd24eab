//! Session identity and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Generation marker for one listen/accept loop
///
/// A loop keeps going only while the session's current token equals the one
/// it was started with. Stopping replaces the token with [`SENTINEL`](Self::SENTINEL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionToken(Uuid);

impl ConnectionToken {
    pub const SENTINEL: ConnectionToken = ConnectionToken(Uuid::nil());

    /// Fresh token, distinct from every earlier one
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }
}

/// Shared stop flag checked by the streaming loops between blocking calls
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let a = ConnectionToken::mint();
        let b = ConnectionToken::mint();
        assert_ne!(a, b);
        assert!(!a.is_sentinel());
        assert!(ConnectionToken::SENTINEL.is_sentinel());
    }

    #[test]
    fn test_cancel_is_shared() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }
}
