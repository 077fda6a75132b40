//! Small bit-set helpers shared by the dataflow analyses.
//!
//! All per-method dataflow domains here are dense and small (blocks,
//! definition sites, candidates), so plain `BitVec` sets with explicit
//! combine loops keep the analyses easy to audit.

use bitvec::prelude::*;

/// `dst &= src`. Both sets must have the same length.
pub fn intersect_in_place(dst: &mut BitVec, src: &BitVec) {
    debug_assert_eq!(dst.len(), src.len());
    for i in 0..dst.len() {
        if dst[i] && !src[i] {
            dst.set(i, false);
        }
    }
}

/// `dst |= src`; returns whether `dst` changed.
pub fn union_in_place(dst: &mut BitVec, src: &BitVec) -> bool {
    debug_assert_eq!(dst.len(), src.len());
    let mut changed = false;
    for i in 0..src.len() {
        if src[i] && !dst[i] {
            dst.set(i, true);
            changed = true;
        }
    }
    changed
}

/// `dst -= src` (clears every bit set in `src`).
pub fn subtract_in_place(dst: &mut BitVec, src: &BitVec) {
    debug_assert_eq!(dst.len(), src.len());
    for i in 0..src.len() {
        if src[i] && dst[i] {
            dst.set(i, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect() {
        let mut a = bitvec![1, 1, 0, 1];
        let b = bitvec![1, 0, 0, 1];
        intersect_in_place(&mut a, &b);
        assert_eq!(a, bitvec![1, 0, 0, 1]);
    }

    #[test]
    fn test_union_reports_change() {
        let mut a = bitvec![1, 0, 0, 0];
        let b = bitvec![0, 1, 0, 0];
        assert!(union_in_place(&mut a, &b));
        assert_eq!(a, bitvec![1, 1, 0, 0]);
        assert!(!union_in_place(&mut a, &b));
    }

    #[test]
    fn test_subtract() {
        let mut a = bitvec![1, 1, 1, 0];
        let b = bitvec![0, 1, 0, 0];
        subtract_in_place(&mut a, &b);
        assert_eq!(a, bitvec![1, 0, 1, 0]);
    }
}
