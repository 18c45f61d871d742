//! The clone context: consistent duplication of instruction ranges.
//!
//! A [`Cloner`] lives for one cloning session and is threaded explicitly
//! through every clone call. It memoizes three remappings:
//! - **labels**: the first clone of an original label is cached, so every
//!   branch into that label converges on the same cloned label;
//! - **symbols**: a symbol rebound by a cloned definition is rewritten in
//!   every later cloned use;
//! - **instructions**: the original → clone correspondence.
//!
//! Branches may be cloned before their in-range targets exist. Such a
//! clone keeps the *original* target, the function's retarget flag is
//! set, and [`Cloner::retarget_cloned_branches`] resolves the pending
//! branches once the whole range has been cloned. Targets outside the
//! cloned range stay pointed at the original label.

use rustc_hash::FxHashMap;

use super::func::Func;
use super::instr::{
    BranchPayload, Instr, InstrFlags, InstrId, InstrKind, InstrPayload, MultiBranchPayload,
};
use super::sym::SymId;

// =============================================================================
// Cloner
// =============================================================================

/// Transient clone-session context.
#[derive(Debug, Default)]
pub struct Cloner {
    label_map: FxHashMap<InstrId, InstrId>,
    sym_map: FxHashMap<SymId, SymId>,
    instr_map: FxHashMap<InstrId, InstrId>,
    pending_branches: Vec<InstrId>,
}

impl Cloner {
    /// Start a cloning session.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cloned counterpart of a label, or the original when the label
    /// has not been cloned in this session.
    #[inline]
    pub fn mapped_label(&self, label: InstrId) -> InstrId {
        self.label_map.get(&label).copied().unwrap_or(label)
    }

    /// The fresh symbol an original was rebound to, if any.
    #[inline]
    pub fn mapped_sym(&self, sym: SymId) -> Option<SymId> {
        self.sym_map.get(&sym).copied()
    }

    pub(crate) fn record_sym(&mut self, original: SymId, fresh: SymId) {
        self.sym_map.insert(original, fresh);
    }

    /// The clone of an original instruction, if it was cloned in this
    /// session.
    #[inline]
    pub fn clone_of(&self, original: InstrId) -> Option<InstrId> {
        self.instr_map.get(&original).copied()
    }

    // =========================================================================
    // Instruction Cloning
    // =========================================================================

    /// Deep-clone one instruction for a parallel copy of its range.
    ///
    /// Labels clone through the memoized remap; branches whose targets
    /// have not been cloned yet keep the original target and are queued
    /// for retargeting. Destination operands rebind their symbols to
    /// fresh ones; source operands pick up any rebinding already made.
    pub fn clone_instr(&mut self, func: &mut Func, instr: InstrId) -> InstrId {
        let clone = match func.instr(instr).kind() {
            InstrKind::Label | InstrKind::ProfiledLabel => self.clone_label(func, instr),
            InstrKind::Branch => self.clone_branch(func, instr),
            _ => {
                let (opcode, kind) = (func.instr(instr).opcode, func.instr(instr).kind());
                let payload = func.instr(instr).payload_clone();
                func.alloc_raw_instr(Instr::new(opcode, kind, payload))
            }
        };
        let offset = func.instr(instr).byte_code_offset;
        func.instr_mut(clone).byte_code_offset = offset;
        func.instr_mut(clone).flags.insert(InstrFlags::WAS_CLONED);

        if let Some(dst) = func.instr(instr).dst() {
            let dup = func.clone_opnd_def(dst, self);
            func.set_dst(clone, dup);
        }
        if let Some(src) = func.instr(instr).src1() {
            let dup = func.clone_opnd_use(src, self);
            func.set_src1(clone, dup);
        }
        if let Some(src) = func.instr(instr).src2() {
            let dup = func.clone_opnd_use(src, self);
            func.set_src2(clone, dup);
        }

        if func.instr(instr).bail_out_attachment().is_some() {
            func.clone_bail_out(instr, clone);
        }

        self.instr_map.insert(instr, clone);
        clone
    }

    /// Clone a label through the memoized remap: the first request creates
    /// the clone, later requests return the same one.
    pub fn clone_label(&mut self, func: &mut Func, label: InstrId) -> InstrId {
        if let Some(&existing) = self.label_map.get(&label) {
            return existing;
        }
        let clone = match func.instr(label).kind() {
            InstrKind::Label => {
                let is_loop_top = func.instr(label).as_label().is_loop_top;
                let id = func.new_label();
                func.instr_mut(id).as_label_mut().is_loop_top = is_loop_top;
                id
            }
            InstrKind::ProfiledLabel => {
                let loop_num = match func.instr(label).payload_ref() {
                    InstrPayload::ProfiledLabel(_, loop_num) => *loop_num,
                    _ => unreachable!(),
                };
                func.new_profiled_label(loop_num)
            }
            kind => panic!("clone_label on {kind:?} instruction"),
        };
        self.label_map.insert(label, clone);
        clone
    }

    fn clone_branch(&mut self, func: &mut Func, branch: InstrId) -> InstrId {
        let opcode = func.instr(branch).opcode;
        let original = func.instr(branch).as_branch();
        let target = original.target;
        let multi = original.multi.clone();

        // Remap any target whose clone already exists; keep the original
        // otherwise and queue the branch for late retargeting.
        let mut unresolved = false;
        let map = |t: InstrId, this: &Self, unresolved: &mut bool| -> InstrId {
            match this.label_map.get(&t) {
                Some(&clone) => clone,
                None => {
                    *unresolved = true;
                    t
                }
            }
        };
        let target = target.map(|t| map(t, self, &mut unresolved));
        let multi = multi.map(|mut boxed| {
            match &mut *boxed {
                MultiBranchPayload::JumpTable { table, .. } => {
                    for slot in table.iter_mut() {
                        *slot = map(*slot, self, &mut unresolved);
                    }
                }
                MultiBranchPayload::StrDict(dict) => {
                    for slot in dict.values_mut() {
                        *slot = map(*slot, self, &mut unresolved);
                    }
                }
            }
            boxed
        });

        let clone = func.alloc_raw_instr(Instr::new(
            opcode,
            InstrKind::Branch,
            InstrPayload::Branch(BranchPayload { target, multi }),
        ));
        for label in func.branch_targets(clone) {
            func.add_label_ref(label, clone);
        }
        if unresolved {
            self.pending_branches.push(clone);
            func.set_has_instrs_to_retarget();
        }
        clone
    }

    // =========================================================================
    // Range Cloning
    // =========================================================================

    /// Clone every instruction in `[start, end]`, inserting the clones
    /// contiguously after `insertion_point`. When a clone satisfies
    /// `pred`, a fresh label is inserted before it and recorded in the
    /// function's clone map under the *original* instruction, so later
    /// passes can jump into the cloned range. Branches into the range are
    /// retargeted to the cloned labels once the whole range is in place.
    ///
    /// Returns the first and last inserted instruction.
    pub fn clone_range<F>(
        &mut self,
        func: &mut Func,
        start: InstrId,
        end: InstrId,
        insertion_point: InstrId,
        mut pred: F,
    ) -> (InstrId, InstrId)
    where
        F: FnMut(&Func, InstrId) -> bool,
    {
        let mut insert_at = insertion_point;
        let mut first = None;

        let mut cur = Some(start);
        while let Some(orig) = cur {
            let clone = self.clone_instr(func, orig);
            if pred(func, clone) {
                let jump_in = func.new_label();
                func.insert_after(insert_at, jump_in);
                insert_at = jump_in;
                func.record_cloned_label(orig, jump_in);
                first.get_or_insert(jump_in);
            }
            func.insert_after(insert_at, clone);
            insert_at = clone;
            first.get_or_insert(clone);

            cur = if orig == end {
                None
            } else {
                Some(func.next_of(orig).unwrap_or_else(|| {
                    panic!("clone_range ran off the list before reaching the range end")
                }))
            };
        }

        // The whole range exists now; resolve branches cloned before
        // their targets were.
        self.retarget_cloned_branches(func);

        (first.expect("clone_range over an empty range"), insert_at)
    }

    /// Resolve branches whose targets were cloned after them: any pending
    /// branch target whose label has a clone in this session is redirected
    /// to that clone. Targets never cloned stay on the original label.
    pub fn retarget_cloned_branches(&mut self, func: &mut Func) {
        for branch in std::mem::take(&mut self.pending_branches) {
            for target in func.branch_targets(branch) {
                if let Some(&clone) = self.label_map.get(&target) {
                    func.replace_branch_target(branch, target, clone);
                }
            }
        }
        func.clear_has_instrs_to_retarget();
    }
}

// =============================================================================
// Tests
// =============================================================================
