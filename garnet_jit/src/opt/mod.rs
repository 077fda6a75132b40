//! Optimization passes over the method IR.
//!
//! This module contains the optimizer's pass protocol and the passes built
//! on it:
//!
//! - **Escape analysis** (`escape`): promotes provably method-local heap
//!   allocations to stack aggregates or scalar temporaries, with bounded
//!   interprocedural peeking and cold-path compensation
//! - **Flush/monitor elimination** (`flush`): removes or relocates
//!   publication barriers and elides monitors made redundant by promotion
//!
//! Passes receive the method IR mutably plus an [`OptContext`] carrying the
//! read-only collaborators every pass needs: the VM metadata registry, the
//! on-demand IR provider, the compilation options and the interrupt flag.

pub mod escape;
pub mod flush;

use garnet_core::{CompilerOptions, GarnetResult, InterruptFlag};

use crate::ir::method::MethodIr;
use crate::meta::{IrProvider, VmRegistry};

// Re-export key types
pub use escape::{Disposition, EscapeAnalysis, EscapeConfig, EscapeStats};
pub use flush::{FlushMonitorElimination, FlushStats};

// =============================================================================
// Optimization Context
// =============================================================================

/// Read-only collaborators threaded into every pass.
pub struct OptContext<'a> {
    /// VM class/method metadata.
    pub meta: &'a VmRegistry,
    /// On-demand callee IR for peeking.
    pub provider: &'a dyn IrProvider,
    /// Per-compilation options.
    pub options: &'a CompilerOptions,
    /// Cooperative interrupt flag.
    pub interrupt: &'a InterruptFlag,
}

// =============================================================================
// Optimization Pass Trait
// =============================================================================

/// A single optimization pass over a method body.
pub trait OptimizationPass {
    /// The name of this pass (for debugging/logging).
    fn name(&self) -> &'static str;

    /// Run the pass. Returns whether the IR was modified.
    fn run(&mut self, ir: &mut MethodIr, ctx: &OptContext<'_>) -> GarnetResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::MethodId;

    struct NopPass;

    impl OptimizationPass for NopPass {
        fn name(&self) -> &'static str {
            "nop"
        }

        fn run(&mut self, _ir: &mut MethodIr, _ctx: &OptContext<'_>) -> GarnetResult<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_pass_protocol() {
        let meta = VmRegistry::new();
        let provider = crate::meta::MapIrProvider::new();
        let options = CompilerOptions::default();
        let interrupt = InterruptFlag::new();
        let ctx = OptContext {
            meta: &meta,
            provider: &provider,
            options: &options,
            interrupt: &interrupt,
        };

        let mut ir = MethodIr::new(MethodId(0), "T.m", 0);
        let mut pass = NopPass;
        assert_eq!(pass.name(), "nop");
        assert!(!pass.run(&mut ir, &ctx).unwrap());
    }
}
