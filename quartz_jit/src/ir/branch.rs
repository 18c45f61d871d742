//! Control-flow linkage: labels, branches, and jump tables.
//!
//! Labels own the exact set of branches that target them; branches own a
//! forward target pointer (or a table of them). Both directions are
//! always updated together, so the back-reference set and the forward
//! pointers never disagree. Removing a reference that is not present is a
//! fatal invariant violation, not a no-op.

use smallvec::SmallVec;

use super::func::Func;
use super::instr::{BranchPayload, Instr, InstrId, InstrKind, InstrPayload, MultiBranchPayload};
use super::opcode::Opcode;

impl Func {
    // =========================================================================
    // Factories
    // =========================================================================

    /// Create an unlinked single-target branch.
    pub fn new_branch(&mut self, opcode: Opcode, target: Option<InstrId>) -> InstrId {
        assert!(opcode.is_branch() && opcode != Opcode::MultiBr);
        let branch = self.instrs.alloc(Instr::new(
            opcode,
            InstrKind::Branch,
            InstrPayload::Branch(BranchPayload {
                target: None,
                multi: None,
            }),
        ));
        if let Some(target) = target {
            self.set_branch_target(branch, target);
        }
        branch
    }

    /// Create an unlinked multi-branch backed by a contiguous jump table.
    /// Slot `i` is taken for case value `base + i`; `default` catches
    /// everything outside the table.
    pub fn new_multi_branch_table(
        &mut self,
        base: i32,
        table: Vec<InstrId>,
        default: InstrId,
    ) -> InstrId {
        let branch = self.instrs.alloc(Instr::new(
            Opcode::MultiBr,
            InstrKind::Branch,
            InstrPayload::Branch(BranchPayload {
                target: Some(default),
                multi: Some(Box::new(MultiBranchPayload::JumpTable {
                    base,
                    table: SmallVec::from_vec(table),
                })),
            }),
        ));
        for target in self.branch_targets(branch) {
            self.add_label_ref(target, branch);
        }
        branch
    }

    /// Create an unlinked multi-branch backed by a string dictionary.
    pub fn new_multi_branch_dict(&mut self, default: InstrId) -> InstrId {
        let branch = self.instrs.alloc(Instr::new(
            Opcode::MultiBr,
            InstrKind::Branch,
            InstrPayload::Branch(BranchPayload {
                target: Some(default),
                multi: Some(Box::new(MultiBranchPayload::StrDict(Default::default()))),
            }),
        ));
        self.add_label_ref(default, branch);
        branch
    }

    /// Add one string case to a dictionary multi-branch.
    pub fn add_multi_branch_case(&mut self, branch: InstrId, key: &str, target: InstrId) {
        let before = self.branch_targets(branch);
        match self.instrs[branch].as_branch_mut().multi.as_deref_mut() {
            Some(MultiBranchPayload::StrDict(dict)) => {
                dict.insert(key.into(), target);
            }
            _ => panic!("add_multi_branch_case on a non-dictionary branch"),
        }
        self.refresh_label_refs(branch, &before);
    }

    // =========================================================================
    // Target Queries
    // =========================================================================

    /// The single target (or the default target of a multi-branch).
    #[inline]
    pub fn branch_target(&self, branch: InstrId) -> Option<InstrId> {
        self.instrs[branch].as_branch().target
    }

    /// All distinct labels this branch targets: the target/default slot
    /// plus every jump-table or dictionary slot.
    pub fn branch_targets(&self, branch: InstrId) -> Vec<InstrId> {
        let payload = self.instrs[branch].as_branch();
        let mut targets = Vec::new();
        let mut push = |t: InstrId, targets: &mut Vec<InstrId>| {
            if !targets.contains(&t) {
                targets.push(t);
            }
        };
        if let Some(t) = payload.target {
            push(t, &mut targets);
        }
        match payload.multi.as_deref() {
            Some(MultiBranchPayload::JumpTable { table, .. }) => {
                for &t in table {
                    push(t, &mut targets);
                }
            }
            Some(MultiBranchPayload::StrDict(dict)) => {
                for &t in dict.values() {
                    push(t, &mut targets);
                }
            }
            None => {}
        }
        targets
    }

    /// The jump-table slot for a case value, if it falls inside the table.
    pub fn multi_branch_case_target(&self, branch: InstrId, case_value: i32) -> Option<InstrId> {
        match self.instrs[branch].as_branch().multi.as_deref() {
            Some(MultiBranchPayload::JumpTable { base, table }) => {
                let slot = case_value.checked_sub(*base)?;
                if (0..table.len() as i32).contains(&slot) {
                    Some(table[slot as usize])
                } else {
                    self.branch_target(branch)
                }
            }
            _ => None,
        }
    }

    // =========================================================================
    // Reference Maintenance
    // =========================================================================

    /// Register `branch` in `label`'s back-reference set. A branch appears
    /// at most once no matter how many of its slots target the label.
    pub(crate) fn add_label_ref(&mut self, label: InstrId, branch: InstrId) {
        let refs = &mut self.instrs[label].as_label_mut().refs;
        assert!(
            !refs.contains(&branch),
            "branch {branch:?} is already referenced by label {label:?}"
        );
        refs.push(branch);
    }

    /// Remove `branch` from `label`'s back-reference set. The reference
    /// must be present; the set is exact.
    pub(crate) fn remove_label_ref(&mut self, label: InstrId, branch: InstrId) {
        let refs = &mut self.instrs[label].as_label_mut().refs;
        let pos = refs
            .iter()
            .position(|&r| r == branch)
            .unwrap_or_else(|| {
                panic!("removing absent reference {branch:?} from label {label:?}")
            });
        refs.remove(pos);
    }

    /// Reconcile back-references after a branch's targets changed:
    /// labels dropped since `before` lose the reference, labels gained
    /// acquire it.
    fn refresh_label_refs(&mut self, branch: InstrId, before: &[InstrId]) {
        let after = self.branch_targets(branch);
        for &old in before {
            if !after.contains(&old) {
                self.remove_label_ref(old, branch);
            }
        }
        for &new in &after {
            if !before.contains(&new) {
                self.add_label_ref(new, branch);
            }
        }
    }

    // =========================================================================
    // Target Mutation
    // =========================================================================

    /// Point a branch at a label, updating both directions.
    pub fn set_branch_target(&mut self, branch: InstrId, label: InstrId) {
        assert!(self.instrs[label].is_label(), "branch target must be a label");
        let before = self.branch_targets(branch);
        self.instrs[branch].as_branch_mut().target = Some(label);
        self.refresh_label_refs(branch, &before);
    }

    /// Clear a single-target branch's target, updating both directions.
    pub fn clear_branch_target(&mut self, branch: InstrId) {
        let before = self.branch_targets(branch);
        self.instrs[branch].as_branch_mut().target = None;
        self.refresh_label_refs(branch, &before);
    }

    /// Rewrite every occurrence of `old` to `new`: every jump-table slot,
    /// every dictionary slot, and the default. The same label may sit
    /// in multiple slots, so all of them are visited, not just the first.
    pub fn replace_branch_target(&mut self, branch: InstrId, old: InstrId, new: InstrId) {
        let before = self.branch_targets(branch);
        let payload = self.instrs[branch].as_branch_mut();
        if payload.target == Some(old) {
            payload.target = Some(new);
        }
        match payload.multi.as_deref_mut() {
            Some(MultiBranchPayload::JumpTable { table, .. }) => {
                for slot in table.iter_mut() {
                    if *slot == old {
                        *slot = new;
                    }
                }
            }
            Some(MultiBranchPayload::StrDict(dict)) => {
                for slot in dict.values_mut() {
                    if *slot == old {
                        *slot = new;
                    }
                }
            }
            None => {}
        }
        self.refresh_label_refs(branch, &before);
    }

    /// Drop every target of a branch (single, table, dictionary, and
    /// default), releasing all back-references. Used on free.
    pub(crate) fn clear_all_branch_targets(&mut self, branch: InstrId) {
        let before = self.branch_targets(branch);
        {
            let payload = self.instrs[branch].as_branch_mut();
            payload.target = None;
            payload.multi = None;
        }
        for &label in &before {
            self.remove_label_ref(label, branch);
        }
    }

    // =========================================================================
    // Condition Inversion
    // =========================================================================

    /// Replace a conditional branch's opcode with its logical negation.
    /// Opcodes with no defined inversion (unconditional, multi-branch, and
    /// the compare-against-undefined forms) abort the compilation.
    pub fn invert_branch(&mut self, branch: InstrId) {
        let opcode = self.instrs[branch].opcode;
        let inverted = opcode
            .inverted()
            .unwrap_or_else(|| panic!("no inversion defined for {opcode}"));
        self.instrs[branch].opcode = inverted;
    }

    // =========================================================================
    // Loop Queries
    // =========================================================================

    /// Check whether `branch` is the loop tail of the loop its target
    /// heads: the highest-numbered branch referencing that loop-top label.
    /// Valid only after `number_instrs`.
    pub fn is_loop_tail(&self, branch: InstrId) -> bool {
        let Some(target) = self.branch_target(branch) else {
            return false;
        };
        let label = self.instrs[target].as_label();
        if !label.is_loop_top {
            return false;
        }
        let number = self.instrs[branch].number;
        assert!(number != 0, "loop-tail query requires numbered instructions");
        label.refs().iter().all(|&other| {
            let n = self.instrs[other].number;
            assert!(n != 0, "loop-tail query requires numbered instructions");
            other == branch || n < number
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::func::FreeOutcome;

    #[test]
    fn test_backref_bijection() {
        let mut func = Func::new();
        let label = func.new_label();
        func.append(label);
        let branch = func.new_branch(Opcode::Br, Some(label));
        func.append(branch);

        let refs = func.instr(label).as_label().refs();
        assert_eq!(refs, &[branch]);
        assert!(func.verify().is_ok());

        func.clear_branch_target(branch);
        assert!(func.instr(label).as_label().refs().is_empty());
    }

    #[test]
    fn test_retarget_moves_reference() {
        let mut func = Func::new();
        let l1 = func.new_label();
        func.append(l1);
        let l2 = func.new_label();
        func.append(l2);
        let branch = func.new_branch(Opcode::BrTrue, Some(l1));
        func.append(branch);

        func.set_branch_target(branch, l2);
        assert!(func.instr(l1).as_label().refs().is_empty());
        assert_eq!(func.instr(l2).as_label().refs(), &[branch]);
        assert!(func.verify().is_ok());
    }

    #[test]
    #[should_panic(expected = "removing absent reference")]
    fn test_remove_absent_reference_is_fatal() {
        let mut func = Func::new();
        let label = func.new_label();
        func.append(label);
        let branch = func.new_branch(Opcode::Br, None);
        func.append(branch);
        func.remove_label_ref(label, branch);
    }

    #[test]
    fn test_free_branch_clears_backref() {
        let mut func = Func::new();
        let label = func.new_label();
        func.append(label);
        let branch = func.new_branch(Opcode::Br, Some(label));
        func.append(branch);

        assert_eq!(func.remove(branch), FreeOutcome::Freed);
        assert!(func.instr(label).as_label().refs().is_empty());
        assert!(func.verify().is_ok());
    }

    #[test]
    #[should_panic(expected = "branches still reference")]
    fn test_free_referenced_label_is_fatal() {
        let mut func = Func::new();
        let label = func.new_label();
        func.append(label);
        let branch = func.new_branch(Opcode::Br, Some(label));
        func.append(branch);
        func.remove(label);
    }

    #[test]
    fn test_invert() {
        let mut func = Func::new();
        let label = func.new_label();
        func.append(label);
        let branch = func.new_branch(Opcode::BrLt, Some(label));
        func.append(branch);

        func.invert_branch(branch);
        assert_eq!(func.instr(branch).opcode, Opcode::BrNotLt);
        func.invert_branch(branch);
        assert_eq!(func.instr(branch).opcode, Opcode::BrLt);
    }

    #[test]
    #[should_panic(expected = "no inversion defined")]
    fn test_invert_undef_compare_is_fatal() {
        let mut func = Func::new();
        let label = func.new_label();
        func.append(label);
        let branch = func.new_branch(Opcode::BrOnUndef, Some(label));
        func.append(branch);
        func.invert_branch(branch);
    }

    #[test]
    fn test_multi_branch_table_replace_visits_all_slots() {
        let mut func = Func::new();
        let l1 = func.new_label();
        func.append(l1);
        let l2 = func.new_label();
        func.append(l2);

        // l1 appears in two table slots AND as the default.
        let branch = func.new_multi_branch_table(10, vec![l1, l2, l1], l1);
        func.append(branch);
        assert_eq!(func.instr(l1).as_label().refs(), &[branch]);

        func.replace_branch_target(branch, l1, l2);
        assert!(func.instr(l1).as_label().refs().is_empty());
        assert_eq!(func.instr(l2).as_label().refs(), &[branch]);
        assert_eq!(func.branch_target(branch), Some(l2));
        assert_eq!(func.multi_branch_case_target(branch, 10), Some(l2));
        assert_eq!(func.multi_branch_case_target(branch, 12), Some(l2));
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_multi_branch_case_lookup() {
        let mut func = Func::new();
        let l1 = func.new_label();
        func.append(l1);
        let l2 = func.new_label();
        func.append(l2);
        let default = func.new_label();
        func.append(default);

        let branch = func.new_multi_branch_table(5, vec![l1, l2], default);
        func.append(branch);

        assert_eq!(func.multi_branch_case_target(branch, 5), Some(l1));
        assert_eq!(func.multi_branch_case_target(branch, 6), Some(l2));
        // Out of table range falls back to the default.
        assert_eq!(func.multi_branch_case_target(branch, 7), Some(default));
    }

    #[test]
    fn test_multi_branch_dict() {
        let mut func = Func::new();
        let l1 = func.new_label();
        func.append(l1);
        let default = func.new_label();
        func.append(default);

        let branch = func.new_multi_branch_dict(default);
        func.append(branch);
        func.add_multi_branch_case(branch, "red", l1);
        func.add_multi_branch_case(branch, "blue", l1);

        assert_eq!(func.instr(l1).as_label().refs(), &[branch]);
        assert!(func.verify().is_ok());

        func.replace_branch_target(branch, l1, default);
        assert!(func.instr(l1).as_label().refs().is_empty());
    }

    #[test]
    fn test_loop_tail_detection() {
        let mut func = Func::new();
        let top = func.new_profiled_label(0);
        func.append(top);
        let early = func.new_branch(Opcode::BrTrue, Some(top));
        func.append(early);
        let tail = func.new_branch(Opcode::Br, Some(top));
        func.append(tail);

        func.number_instrs();
        assert!(!func.is_loop_tail(early));
        assert!(func.is_loop_tail(tail));
    }

    #[test]
    fn test_non_loop_label_has_no_tail() {
        let mut func = Func::new();
        let label = func.new_label();
        func.append(label);
        let branch = func.new_branch(Opcode::Br, Some(label));
        func.append(branch);

        func.number_instrs();
        assert!(!func.is_loop_tail(branch));
    }
}
