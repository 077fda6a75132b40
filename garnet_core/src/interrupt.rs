//! Cooperative compilation-interrupt flag.
//!
//! The runtime may ask an in-flight compilation to stop (shutdown, class
//! redefinition, memory pressure). Phases poll the flag at their
//! long-running points; a set flag surfaces as [`GarnetError::Interrupted`]
//! and aborts the whole compilation, not just the polling phase.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GarnetError, GarnetResult};

/// Shared interrupt flag for one compilation.
///
/// Cloning shares the underlying flag; the runtime keeps one clone to
/// request interruption, the compilation threads the other through its
/// phases.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    requested: Arc<AtomicBool>,
}

impl InterruptFlag {
    /// Create a fresh, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request interruption of the owning compilation.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Check whether interruption was requested.
    #[inline]
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Poll point: return `Err(Interrupted)` if interruption was requested.
    #[inline]
    pub fn check(&self) -> GarnetResult<()> {
        if self.is_requested() {
            Err(GarnetError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_flag_is_unset() {
        let flag = InterruptFlag::new();
        assert!(!flag.is_requested());
        assert!(flag.check().is_ok());
    }

    #[test]
    fn test_request_sets_flag() {
        let flag = InterruptFlag::new();
        flag.request();
        assert!(flag.is_requested());
        assert!(matches!(flag.check(), Err(GarnetError::Interrupted)));
    }

    #[test]
    fn test_clones_share_state() {
        let flag = InterruptFlag::new();
        let observer = flag.clone();

        flag.request();
        assert!(observer.is_requested());
    }
}
