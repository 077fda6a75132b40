//! On-demand IR for callee peeking.
//!
//! The escape pass asks for a callee's IR to continue propagation through a
//! call boundary. Generation must be idempotent per callee within a pass;
//! `CachedIrProvider` wraps any provider with a read-mostly cache shared
//! across compilations.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use garnet_core::{GarnetError, GarnetResult};

use crate::ir::method::MethodIr;
use crate::ir::types::MethodId;

/// Builds (or retrieves) the IR of a method on demand.
pub trait IrProvider {
    /// Return the method's IR, or an [`GarnetError::IrGenFailure`].
    fn peek(&self, method: MethodId) -> GarnetResult<Arc<MethodIr>>;
}

// =============================================================================
// Map-backed provider
// =============================================================================

/// A provider backed by pre-registered bodies (tests, warm-up snapshots).
#[derive(Debug, Default)]
pub struct MapIrProvider {
    bodies: FxHashMap<MethodId, Arc<MethodIr>>,
}

impl MapIrProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a body under its own method id.
    pub fn register(&mut self, ir: MethodIr) {
        self.bodies.insert(ir.method, Arc::new(ir));
    }

    /// Number of registered bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Whether no bodies are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

impl IrProvider for MapIrProvider {
    fn peek(&self, method: MethodId) -> GarnetResult<Arc<MethodIr>> {
        self.bodies
            .get(&method)
            .cloned()
            .ok_or_else(|| GarnetError::ir_gen(method.to_string()))
    }
}

// =============================================================================
// Caching provider
// =============================================================================

/// Wraps a provider with a read-mostly result cache.
///
/// Failures are not cached: a method that failed to generate may become
/// generatable later (class loading progressed).
#[derive(Debug)]
pub struct CachedIrProvider<P> {
    inner: P,
    cache: RwLock<FxHashMap<MethodId, Arc<MethodIr>>>,
}

impl<P: IrProvider> CachedIrProvider<P> {
    /// Wrap a provider.
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// Number of cached bodies.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }
}

impl<P: IrProvider> IrProvider for CachedIrProvider<P> {
    fn peek(&self, method: MethodId) -> GarnetResult<Arc<MethodIr>> {
        if let Some(found) = self.cache.read().get(&method) {
            return Ok(Arc::clone(found));
        }
        let built = self.inner.peek(method)?;
        self.cache.write().insert(method, Arc::clone(&built));
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;

    fn tiny_body(id: MethodId) -> MethodIr {
        let mut b = IrBuilder::new(id, format!("callee{}", id.0), 1);
        b.ret();
        b.finish()
    }

    #[test]
    fn test_map_provider_hit_and_miss() {
        let mut p = MapIrProvider::new();
        p.register(tiny_body(MethodId(1)));

        assert!(p.peek(MethodId(1)).is_ok());
        let err = p.peek(MethodId(2)).unwrap_err();
        assert!(matches!(err, GarnetError::IrGenFailure { .. }));
    }

    #[test]
    fn test_cached_provider_is_idempotent() {
        let mut p = MapIrProvider::new();
        p.register(tiny_body(MethodId(1)));
        let cached = CachedIrProvider::new(p);

        let a = cached.peek(MethodId(1)).unwrap();
        let b = cached.peek(MethodId(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cached.cached_count(), 1);
    }

    #[test]
    fn test_cached_provider_does_not_cache_failures() {
        let cached = CachedIrProvider::new(MapIrProvider::new());
        assert!(cached.peek(MethodId(9)).is_err());
        assert_eq!(cached.cached_count(), 0);
    }
}
