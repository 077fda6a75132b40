//! Garnet JIT optimizer.
//!
//! The method-level optimizer of the Garnet runtime: the statement/CFG
//! intermediate representation, the supporting analyses (value numbering,
//! use-def chains, dominators), the VM metadata surface, and the
//! optimization passes, centered on escape analysis with allocation
//! promotion and the follow-up flush/monitor elimination.
//!
//! # Architecture
//!
//! - [`ir`]: node arena, statements, basic blocks, symbols, builder
//! - [`analysis`]: oracles the optimizer queries
//! - [`meta`]: read-only VM metadata, IR peeking, the inliner seam
//! - [`opt`]: the pass protocol and the passes

pub mod analysis;
pub mod ir;
pub mod meta;
pub mod opt;
