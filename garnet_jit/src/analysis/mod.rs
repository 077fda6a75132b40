//! Supporting analyses consumed by the optimizer.
//!
//! - `value_numbering`: equivalence classes used as alias-tracking keys
//! - `use_defs`: reaching-definition use-def chains over locals
//! - `dominators`: dominance, orderings, structural soundness
//! - `bits`: shared bit-set helpers

pub mod bits;
pub mod dominators;
pub mod use_defs;
pub mod value_numbering;

pub use dominators::{blocks_in_loops, is_reducible, postorder, reverse_postorder, Dominators};
pub use use_defs::UseDefs;
pub use value_numbering::{ValueNum, ValueNumbering};
