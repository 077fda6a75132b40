//! Redundant-monitor removal.
//!
//! Consumes the "local object monitor" markings produced by escape fixup:
//! a monitor whose guarded value was promoted (and never cold-escapes)
//! protects a thread-local object and can be deleted. Removal is disabled
//! for the whole method when monitor structure is not balanced; flush
//! elimination is unaffected by that.

use crate::ir::method::MethodIr;
use crate::ir::opcodes::OpCode;
use crate::ir::stmt::StmtId;

/// Counters from monitor removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Monitor statements deleted.
    pub removed: u32,
    /// Removal was disabled by unbalanced monitor structure.
    pub disabled: bool,
}

/// Check that every block's monitor operations nest correctly and the
/// method's enters and exits pair up.
#[must_use]
pub fn monitors_balanced(ir: &MethodIr) -> bool {
    let mut enters: i64 = 0;
    let mut exits: i64 = 0;
    for sid in ir.stmt_ids_in_block_order() {
        match ir.arena.node(ir.stmt(sid).root).op {
            OpCode::MonitorEnter => enters += 1,
            OpCode::MonitorExit => {
                exits += 1;
                if exits > enters {
                    // An exit with no enter anywhere before it in layout
                    // order cannot be part of a balanced region.
                    return false;
                }
            }
            _ => {}
        }
    }
    enters == exits
}

/// Remove the marked local-object monitors.
pub fn remove_local_monitors(ir: &mut MethodIr, marked: &[StmtId]) -> MonitorStats {
    let mut stats = MonitorStats::default();

    if !monitors_balanced(ir) {
        stats.disabled = true;
        tracing::debug!(method = %ir.name, "monitor removal disabled: unbalanced structure");
        return stats;
    }

    for &sid in marked {
        if !ir.is_attached(sid) {
            continue;
        }
        let op = ir.arena.node(ir.stmt(sid).root).op;
        if matches!(op, OpCode::MonitorEnter | OpCode::MonitorExit) {
            ir.detach(sid);
            stats.removed += 1;
        }
    }

    if stats.removed > 0 {
        tracing::debug!(method = %ir.name, removed = stats.removed, "local monitors removed");
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::types::{ClassId, MethodId, ValueType};

    fn locked_method() -> (MethodIr, StmtId, StmtId) {
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let p = b.local("p", ValueType::Address);
        let alloc = b.new_object(ClassId(1));
        b.store_local(p, alloc);
        let l1 = b.load_local(p);
        let enter = b.monitor_enter(l1);
        let l2 = b.load_local(p);
        let exit = b.monitor_exit(l2);
        b.ret();
        (b.finish(), enter, exit)
    }

    #[test]
    fn test_balanced_pair() {
        let (ir, ..) = locked_method();
        assert!(monitors_balanced(&ir));
    }

    #[test]
    fn test_unbalanced_exit_first() {
        let mut b = IrBuilder::new(MethodId(0), "T.m", 1);
        let p = b.param(0, ValueType::Address);
        b.monitor_exit(p);
        b.monitor_enter(p);
        b.ret();
        let ir = b.finish();
        assert!(!monitors_balanced(&ir));
    }

    #[test]
    fn test_unbalanced_counts() {
        let mut b = IrBuilder::new(MethodId(0), "T.m", 1);
        let p = b.param(0, ValueType::Address);
        b.monitor_enter(p);
        b.ret();
        let ir = b.finish();
        assert!(!monitors_balanced(&ir));
    }

    #[test]
    fn test_removal_detaches_marked_pair() {
        let (mut ir, enter, exit) = locked_method();
        let stats = remove_local_monitors(&mut ir, &[enter, exit]);
        assert_eq!(stats.removed, 2);
        assert!(!stats.disabled);
        assert!(!ir.is_attached(enter));
        assert!(!ir.is_attached(exit));
    }

    #[test]
    fn test_removal_disabled_when_unbalanced() {
        let mut b = IrBuilder::new(MethodId(0), "T.m", 1);
        let p = b.param(0, ValueType::Address);
        let enter = b.monitor_enter(p);
        b.ret();
        let mut ir = b.finish();

        let stats = remove_local_monitors(&mut ir, &[enter]);
        assert!(stats.disabled);
        assert_eq!(stats.removed, 0);
        assert!(ir.is_attached(enter));
    }

    #[test]
    fn test_unmarked_monitors_untouched() {
        let (mut ir, enter, exit) = locked_method();
        let stats = remove_local_monitors(&mut ir, &[enter]);
        assert_eq!(stats.removed, 1);
        assert!(ir.is_attached(exit));
    }
}
