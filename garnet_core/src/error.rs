//! Error types and result definitions for the Garnet compiler.
//!
//! Optimization phases are expected to degrade, not fail: most error
//! conditions are absorbed as "fewer optimizations applied" by the phase
//! that encounters them. The variants here cover the cases that must be
//! reported across a phase boundary:
//! - Analysis preconditions missing (a phase disables itself)
//! - On-demand IR generation failures (a callee could not be peeked)
//! - Structural control-flow irregularities (a sub-phase aborts)
//! - The compilation-interrupt signal (the whole compile aborts)

use thiserror::Error;

/// The unified result type used throughout the Garnet compiler.
pub type GarnetResult<T> = Result<T, GarnetError>;

/// Error conditions reported across compiler phase boundaries.
#[derive(Error, Debug, Clone)]
pub enum GarnetError {
    /// An analysis could not run because a prerequisite is unavailable.
    ///
    /// The phase that raised this disables itself for the method; the
    /// compilation continues without it.
    #[error("analysis aborted: {reason}")]
    AnalysisAbort {
        /// What was missing.
        reason: String,
    },

    /// On-demand IR generation for a callee failed.
    #[error("IR generation failed for method '{method}'")]
    IrGenFailure {
        /// Name or identifier of the method that could not be built.
        method: String,
    },

    /// The CFG contains an improper (irreducible) region.
    ///
    /// Raised only by flow-sensitive sub-phases that require reducible
    /// control flow; aborts that sub-phase, nothing else.
    #[error("improper control-flow region")]
    ImproperRegion,

    /// The enclosing compilation was asked to stop.
    ///
    /// Unrecoverable at the phase level; propagates to the compilation
    /// driver and aborts the whole compile.
    #[error("compilation interrupted")]
    Interrupted,

    /// Internal invariant violation (should never occur).
    #[error("internal error: {message}")]
    Internal {
        /// Error description.
        message: String,
    },
}

impl GarnetError {
    /// Create an analysis-abort error.
    #[must_use]
    pub fn analysis_abort(reason: impl Into<String>) -> Self {
        Self::AnalysisAbort {
            reason: reason.into(),
        }
    }

    /// Create an IR-generation failure.
    #[must_use]
    pub fn ir_gen(method: impl Into<String>) -> Self {
        Self::IrGenFailure {
            method: method.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole compilation.
    ///
    /// Everything except the interrupt signal and internal errors is
    /// recoverable at the level of "this optimization is not applied".
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Interrupted | Self::Internal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_abort_creation() {
        let err = GarnetError::analysis_abort("no use-def info");

        match &err {
            GarnetError::AnalysisAbort { reason } => {
                assert_eq!(reason, "no use-def info");
            }
            _ => panic!("Expected AnalysisAbort"),
        }

        assert_eq!(err.to_string(), "analysis aborted: no use-def info");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_ir_gen_failure_creation() {
        let err = GarnetError::ir_gen("List.add");

        assert_eq!(err.to_string(), "IR generation failed for method 'List.add'");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_improper_region_not_fatal() {
        let err = GarnetError::ImproperRegion;

        assert_eq!(err.to_string(), "improper control-flow region");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_interrupted_is_fatal() {
        let err = GarnetError::Interrupted;

        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "compilation interrupted");
    }

    #[test]
    fn test_internal_is_fatal() {
        let err = GarnetError::internal("candidate index out of range");

        assert!(err.is_fatal());
        assert!(err.to_string().contains("candidate index"));
    }

    #[test]
    fn test_error_is_clone() {
        let original = GarnetError::ir_gen("m");
        let cloned = original.clone();

        match (&original, &cloned) {
            (
                GarnetError::IrGenFailure { method: m1 },
                GarnetError::IrGenFailure { method: m2 },
            ) => assert_eq!(m1, m2),
            _ => panic!("Clone mismatch"),
        }
    }

    #[test]
    fn test_result_alias() {
        let ok: GarnetResult<u32> = Ok(7);
        assert_eq!(ok.unwrap(), 7);

        let err: GarnetResult<u32> = Err(GarnetError::Interrupted);
        assert!(err.is_err());
    }
}
