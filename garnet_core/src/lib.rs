//! Core support types shared across the Garnet compiler.
//!
//! This crate carries the pieces every compilation phase needs but none
//! owns: the unified error taxonomy, the immutable per-compilation options
//! object, and the cooperative interrupt flag polled at long-running points.

pub mod error;
pub mod interrupt;
pub mod options;

pub use error::{GarnetError, GarnetResult};
pub use interrupt::InterruptFlag;
pub use options::{CompilerOptions, SourceFilter};
