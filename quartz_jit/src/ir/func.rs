//! The per-function instruction container and list discipline.
//!
//! A [`Func`] owns every arena its IR nodes live in: instructions,
//! operands, symbols, and bailout records. The instruction list is doubly
//! linked through arena ids and bracketed by an entry and an exit anchor.
//! All structural mutation goes through the explicit operations here:
//! nodes are never linked or torn down by side effect.
//!
//! Invariants maintained by this module:
//! - The list is acyclic and doubly consistent (`x.next.prev == x`).
//! - Unlink detaches; free validates and tears down; remove is exactly
//!   unlink followed by free.
//! - Freeing the defining instruction of a single-def constant symbol
//!   retains the instruction instead, because later code may still read
//!   the constant through the symbol.

use rustc_hash::FxHashMap;

use crate::bailout::info::BailOutInfo;
use super::arena::Arena;
use super::instr::{
    Instr, InstrFlags, InstrId, InstrKind, InstrPayload, LabelPayload, PragmaPayload,
    ProfilePayload, ProfilingPayload,
};
use super::opcode::Opcode;
use super::opnd::{Opnd, OpndData, OpndId};
use super::sym::SymTable;

// =============================================================================
// Func
// =============================================================================

/// Result of a free/remove request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// The instruction was torn down and its slot reclaimed.
    Freed,
    /// The instruction defines a single-def constant symbol and was kept
    /// alive so the constant stays recoverable.
    Retained,
}

/// One function's IR: arenas plus the ordered instruction list.
pub struct Func {
    pub(crate) instrs: Arena<Instr>,
    pub(crate) opnds: Arena<Opnd>,
    pub syms: SymTable,
    pub(crate) bail_outs: Arena<BailOutInfo>,
    head: InstrId,
    tail: InstrId,
    /// Set by range cloning when a cloned branch still points at an
    /// original label; cleared by `Cloner::retarget_cloned_branches`.
    pub(crate) has_instrs_to_retarget: bool,
    /// Original instruction -> label inserted before its clone, recorded
    /// by range cloning for passes that later jump into the cloned range.
    pub(crate) clone_map: FxHashMap<InstrId, InstrId>,
}

impl Func {
    /// Create a function with its entry and exit anchors linked.
    pub fn new() -> Self {
        let mut instrs = Arena::with_capacity(64);
        let head = instrs.alloc(Instr::new(
            Opcode::FunctionEntry,
            InstrKind::Entry,
            InstrPayload::None,
        ));
        let tail = instrs.alloc(Instr::new(
            Opcode::FunctionExit,
            InstrKind::Exit,
            InstrPayload::None,
        ));
        instrs[head].next = Some(tail);
        instrs[tail].prev = Some(head);
        Func {
            instrs,
            opnds: Arena::with_capacity(64),
            syms: SymTable::new(),
            bail_outs: Arena::new(),
            head,
            tail,
            has_instrs_to_retarget: false,
            clone_map: FxHashMap::default(),
        }
    }

    /// The entry anchor.
    #[inline]
    pub fn entry_instr(&self) -> InstrId {
        self.head
    }

    /// The exit anchor.
    #[inline]
    pub fn exit_instr(&self) -> InstrId {
        self.tail
    }

    /// Get an instruction.
    #[inline]
    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id]
    }

    /// Get an instruction mutably.
    #[inline]
    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.instrs[id]
    }

    /// Number of live instructions, anchors included.
    #[inline]
    pub fn instr_count(&self) -> usize {
        self.instrs.len()
    }

    /// Whether cloned branches still await retargeting.
    #[inline]
    pub fn has_instrs_to_retarget(&self) -> bool {
        self.has_instrs_to_retarget
    }

    /// Label recorded for an original instruction by range cloning.
    #[inline]
    pub fn cloned_label_for(&self, original: InstrId) -> Option<InstrId> {
        self.clone_map.get(&original).copied()
    }

    pub(crate) fn alloc_raw_instr(&mut self, instr: Instr) -> InstrId {
        self.instrs.alloc(instr)
    }

    pub(crate) fn set_has_instrs_to_retarget(&mut self) {
        self.has_instrs_to_retarget = true;
    }

    pub(crate) fn clear_has_instrs_to_retarget(&mut self) {
        self.has_instrs_to_retarget = false;
    }

    pub(crate) fn record_cloned_label(&mut self, original: InstrId, label: InstrId) {
        self.clone_map.insert(original, label);
    }

    // =========================================================================
    // Factories
    // =========================================================================

    /// Create an unlinked plain instruction.
    pub fn new_instr(&mut self, opcode: Opcode) -> InstrId {
        assert!(!opcode.is_branch(), "branches use new_branch");
        assert!(
            !matches!(opcode, Opcode::Label | Opcode::StatementBoundary | Opcode::ByteCodeUses),
            "marker opcodes use their dedicated factories"
        );
        self.instrs
            .alloc(Instr::new(opcode, InstrKind::Plain, InstrPayload::None))
    }

    /// Create an unlinked profiled instruction.
    pub fn new_profiled_instr(&mut self, opcode: Opcode, profile_id: u16) -> InstrId {
        assert!(
            opcode.has_profiled_form(),
            "{opcode} has no profiled variant"
        );
        self.instrs.alloc(Instr::new(
            opcode,
            InstrKind::Profiled,
            InstrPayload::Profiled(ProfilePayload { profile_id }),
        ))
    }

    /// Create an unlinked profiling-instrumentation instruction.
    pub fn new_profiling_instr(&mut self, opcode: Opcode, probe_id: u16) -> InstrId {
        self.instrs.alloc(Instr::new(
            opcode,
            InstrKind::Profiling,
            InstrPayload::Profiling(ProfilingPayload { probe_id }),
        ))
    }

    /// Create an unlinked label.
    pub fn new_label(&mut self) -> InstrId {
        self.instrs.alloc(Instr::new(
            Opcode::Label,
            InstrKind::Label,
            InstrPayload::Label(LabelPayload::default()),
        ))
    }

    /// Create an unlinked profiled loop-header label.
    pub fn new_profiled_label(&mut self, loop_num: u16) -> InstrId {
        let payload = LabelPayload {
            refs: Default::default(),
            is_loop_top: true,
        };
        self.instrs.alloc(Instr::new(
            Opcode::Label,
            InstrKind::ProfiledLabel,
            InstrPayload::ProfiledLabel(payload, loop_num),
        ))
    }

    /// Create an unlinked statement-boundary pragma.
    pub fn new_pragma(&mut self, statement_index: u32) -> InstrId {
        self.instrs.alloc(Instr::new(
            Opcode::StatementBoundary,
            InstrKind::Pragma,
            InstrPayload::Pragma(PragmaPayload { statement_index }),
        ))
    }

    // =========================================================================
    // Operand Slots
    // =========================================================================

    /// Set the destination operand. Claims the operand and records the
    /// instruction as a definition site of the operand's symbol.
    pub fn set_dst(&mut self, instr: InstrId, opnd: OpndId) {
        assert!(self.instrs[instr].dst.is_none(), "dst slot already set");
        self.use_opnd(opnd);
        self.instrs[instr].dst = Some(opnd);
        if let Some(sym) = self.opnds[opnd].sym_id() {
            self.syms.set_instr_def(sym, instr);
        }
    }

    /// Set the first source operand. Claims the operand.
    pub fn set_src1(&mut self, instr: InstrId, opnd: OpndId) {
        assert!(self.instrs[instr].src1.is_none(), "src1 slot already set");
        self.use_opnd(opnd);
        self.instrs[instr].src1 = Some(opnd);
    }

    /// Set the second source operand. Claims the operand.
    pub fn set_src2(&mut self, instr: InstrId, opnd: OpndId) {
        assert!(self.instrs[instr].src2.is_none(), "src2 slot already set");
        self.use_opnd(opnd);
        self.instrs[instr].src2 = Some(opnd);
    }

    /// Detach the destination operand, releasing its claim and the
    /// symbol's definition record. The operand itself stays allocated.
    pub fn unlink_dst(&mut self, instr: InstrId) -> Option<OpndId> {
        let opnd = self.instrs[instr].dst.take()?;
        if let Some(sym) = self.opnds[opnd].sym_id() {
            self.syms.clear_instr_def(sym, instr);
        }
        self.un_use_opnd(opnd);
        Some(opnd)
    }

    /// Detach the first source operand, releasing its claim.
    pub fn unlink_src1(&mut self, instr: InstrId) -> Option<OpndId> {
        let opnd = self.instrs[instr].src1.take()?;
        self.un_use_opnd(opnd);
        Some(opnd)
    }

    /// Detach the second source operand, releasing its claim.
    pub fn unlink_src2(&mut self, instr: InstrId) -> Option<OpndId> {
        let opnd = self.instrs[instr].src2.take()?;
        self.un_use_opnd(opnd);
        Some(opnd)
    }

    /// Replace the destination, freeing the displaced operand.
    pub fn replace_dst(&mut self, instr: InstrId, opnd: OpndId) {
        if let Some(old) = self.unlink_dst(instr) {
            self.free_opnd(old);
        }
        self.set_dst(instr, opnd);
    }

    /// Replace the first source, freeing the displaced operand.
    pub fn replace_src1(&mut self, instr: InstrId, opnd: OpndId) {
        if let Some(old) = self.unlink_src1(instr) {
            self.free_opnd(old);
        }
        self.set_src1(instr, opnd);
    }

    // =========================================================================
    // List Discipline
    // =========================================================================

    /// Insert an unlinked instruction immediately before `at`.
    pub fn insert_before(&mut self, at: InstrId, instr: InstrId) {
        assert!(!self.instrs[instr].is_linked(), "instruction already linked");
        let prev = self.instrs[at]
            .prev
            .unwrap_or_else(|| panic!("cannot insert before the entry anchor"));
        self.instrs[prev].next = Some(instr);
        self.instrs[instr].prev = Some(prev);
        self.instrs[instr].next = Some(at);
        self.instrs[at].prev = Some(instr);
    }

    /// Insert an unlinked instruction immediately after `at`.
    pub fn insert_after(&mut self, at: InstrId, instr: InstrId) {
        assert!(!self.instrs[instr].is_linked(), "instruction already linked");
        let next = self.instrs[at]
            .next
            .unwrap_or_else(|| panic!("cannot insert after the exit anchor"));
        self.instrs[at].next = Some(instr);
        self.instrs[instr].prev = Some(at);
        self.instrs[instr].next = Some(next);
        self.instrs[next].prev = Some(instr);
    }

    /// Append an instruction just before the exit anchor.
    pub fn append(&mut self, instr: InstrId) {
        self.insert_before(self.tail, instr);
    }

    /// Splice a detached contiguous run `[first, last]` before `at`.
    /// The run must be linked internally but detached at both ends.
    pub fn insert_range_before(&mut self, at: InstrId, first: InstrId, last: InstrId) {
        debug_assert!(self.instrs[first].prev.is_none() && self.instrs[last].next.is_none());
        let prev = self.instrs[at]
            .prev
            .unwrap_or_else(|| panic!("cannot insert before the entry anchor"));
        self.instrs[prev].next = Some(first);
        self.instrs[first].prev = Some(prev);
        self.instrs[last].next = Some(at);
        self.instrs[at].prev = Some(last);
    }

    /// Splice a detached contiguous run `[first, last]` after `at`.
    pub fn insert_range_after(&mut self, at: InstrId, first: InstrId, last: InstrId) {
        debug_assert!(self.instrs[first].prev.is_none() && self.instrs[last].next.is_none());
        let next = self.instrs[at]
            .next
            .unwrap_or_else(|| panic!("cannot insert after the exit anchor"));
        self.instrs[at].next = Some(first);
        self.instrs[first].prev = Some(at);
        self.instrs[last].next = Some(next);
        self.instrs[next].prev = Some(last);
    }

    /// Detach an instruction from the list without destroying it.
    pub fn unlink(&mut self, instr: InstrId) {
        assert!(
            instr != self.head && instr != self.tail,
            "cannot unlink the entry/exit anchors"
        );
        let prev = self.instrs[instr].prev.take();
        let next = self.instrs[instr].next.take();
        assert!(
            prev.is_some() && next.is_some(),
            "unlink of an instruction that is not linked"
        );
        self.instrs[prev.unwrap()].next = next;
        self.instrs[next.unwrap()].prev = prev;
    }

    fn should_retain(&self, instr: InstrId) -> bool {
        let Some(dst) = self.instrs[instr].dst else {
            return false;
        };
        let Some(sym) = self.opnds[dst].sym_id() else {
            return false;
        };
        let sym = self.syms.sym(sym);
        sym.is_single_def() && sym.is_const() && sym.single_def_instr() == Some(instr)
    }

    /// Tear an unlinked instruction down and reclaim its slot.
    ///
    /// Kind-specific teardown runs first (a branch clears its target
    /// back-reference, a label must no longer be referenced), then the
    /// operand slots are released and freed, then any owned bailout record
    /// is released. If the instruction defines a single-def constant
    /// symbol it is retained instead.
    pub fn free_instr(&mut self, instr: InstrId) -> FreeOutcome {
        if self.should_retain(instr) {
            return FreeOutcome::Retained;
        }
        debug_assert!(
            !self.instrs[instr].is_linked(),
            "free of a linked instruction; unlink it first (or use remove)"
        );
        match self.instrs[instr].kind() {
            InstrKind::Branch => self.clear_all_branch_targets(instr),
            InstrKind::Label | InstrKind::ProfiledLabel => {
                assert!(
                    self.instrs[instr].as_label().refs().is_empty(),
                    "freeing a label that branches still reference"
                );
            }
            _ => {}
        }
        if let Some(dst) = self.unlink_dst(instr) {
            self.free_opnd(dst);
        }
        if let Some(src) = self.unlink_src1(instr) {
            self.free_opnd(src);
        }
        if let Some(src) = self.unlink_src2(instr) {
            self.free_opnd(src);
        }
        self.release_bail_out_on_free(instr);
        self.instrs.free(instr);
        FreeOutcome::Freed
    }

    /// Unlink and free in one step.
    pub fn remove(&mut self, instr: InstrId) -> FreeOutcome {
        if self.should_retain(instr) {
            return FreeOutcome::Retained;
        }
        self.unlink(instr);
        self.free_instr(instr)
    }

    /// Relocate an instruction to immediately before `point`, restamping
    /// its source position to `point`'s.
    pub fn move_before(&mut self, instr: InstrId, point: InstrId) {
        self.unlink(instr);
        self.insert_before(point, instr);
        let offset = self.instrs[point].byte_code_offset;
        self.instrs[instr].byte_code_offset = offset;
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Successor in list order.
    #[inline]
    pub fn next_of(&self, instr: InstrId) -> Option<InstrId> {
        self.instrs[instr].next
    }

    /// Predecessor in list order.
    #[inline]
    pub fn prev_of(&self, instr: InstrId) -> Option<InstrId> {
        self.instrs[instr].prev
    }

    /// The next real instruction after `instr`, skipping markers.
    /// Running off the end of the list is a fatal invariant violation.
    pub fn next_real_instr(&self, instr: InstrId) -> InstrId {
        let mut cur = self.instrs[instr].next;
        while let Some(id) = cur {
            if self.instrs[id].is_real() {
                return id;
            }
            cur = self.instrs[id].next;
        }
        panic!("ran off the end of the list looking for a real instruction");
    }

    /// The next real instruction or label after `instr`.
    pub fn next_real_instr_or_label(&self, instr: InstrId) -> InstrId {
        let mut cur = self.instrs[instr].next;
        while let Some(id) = cur {
            if self.instrs[id].is_real() || self.instrs[id].is_label() {
                return id;
            }
            cur = self.instrs[id].next;
        }
        panic!("ran off the end of the list looking for a real instruction");
    }

    /// The previous real instruction before `instr`, skipping markers.
    /// Running off the front of the list is a fatal invariant violation.
    pub fn prev_real_instr(&self, instr: InstrId) -> InstrId {
        let mut cur = self.instrs[instr].prev;
        while let Some(id) = cur {
            if self.instrs[id].is_real() {
                return id;
            }
            cur = self.instrs[id].prev;
        }
        panic!("ran off the front of the list looking for a real instruction");
    }

    /// Forward iteration over the whole list, anchors included.
    pub fn iter(&self) -> InstrIter<'_> {
        InstrIter {
            func: self,
            cur: Some(self.head),
            until: None,
        }
    }

    /// Backward iteration over the whole list.
    pub fn riter(&self) -> RevInstrIter<'_> {
        RevInstrIter {
            func: self,
            cur: Some(self.tail),
            until: None,
        }
    }

    /// Forward iteration over `[first, last]` inclusive.
    pub fn iter_range(&self, first: InstrId, last: InstrId) -> InstrIter<'_> {
        InstrIter {
            func: self,
            cur: Some(first),
            until: Some(last),
        }
    }

    /// Backward iteration over `[last, first]` inclusive.
    pub fn riter_range(&self, last: InstrId, first: InstrId) -> RevInstrIter<'_> {
        RevInstrIter {
            func: self,
            cur: Some(last),
            until: Some(first),
        }
    }

    /// Deletion-safe traversal: the successor is captured before `f` runs,
    /// so `f` may remove (or replace) the instruction it is handed.
    pub fn for_each_editing<F: FnMut(&mut Func, InstrId)>(&mut self, mut f: F) {
        let mut cur = Some(self.head);
        while let Some(id) = cur {
            cur = self.instrs[id].next;
            f(self, id);
        }
    }

    /// Deletion-safe traversal over `[first, last]` inclusive.
    pub fn for_each_editing_range<F: FnMut(&mut Func, InstrId)>(
        &mut self,
        first: InstrId,
        last: InstrId,
        mut f: F,
    ) {
        let mut cur = Some(first);
        while let Some(id) = cur {
            cur = if id == last { None } else { self.instrs[id].next };
            f(self, id);
        }
    }

    // =========================================================================
    // Numbering
    // =========================================================================

    /// Assign sequential ordinals front to back. Queries that compare
    /// instruction order (loop-tail detection) are only valid afterwards.
    pub fn number_instrs(&mut self) {
        let mut number = 1u32;
        let mut cur = Some(self.head);
        while let Some(id) = cur {
            self.instrs[id].number = number;
            number += 1;
            cur = self.instrs[id].next;
        }
    }

    // =========================================================================
    // Copy
    // =========================================================================

    /// Produce a plain unlinked duplicate: same opcode and kind, operands
    /// duplicated for reuse, and, if a bailout is attached, a shallow
    /// duplicate of the record and kind. Used for fallback/slow-path
    /// copies of an instruction at a new location.
    pub fn copy_instr(&mut self, instr: InstrId, include_dst: bool) -> InstrId {
        let (opcode, kind, byte_code_offset) = {
            let i = &self.instrs[instr];
            (i.opcode, i.kind(), i.byte_code_offset)
        };
        let payload = match &self.instrs[instr].payload {
            InstrPayload::Label(l) => InstrPayload::Label(LabelPayload {
                refs: Default::default(),
                is_loop_top: l.is_loop_top,
            }),
            InstrPayload::ProfiledLabel(l, loop_num) => InstrPayload::ProfiledLabel(
                LabelPayload {
                    refs: Default::default(),
                    is_loop_top: l.is_loop_top,
                },
                *loop_num,
            ),
            other => other.clone(),
        };
        let copy = self.instrs.alloc(Instr::new(opcode, kind, payload));
        self.instrs[copy].byte_code_offset = byte_code_offset;

        // A copied branch references the same targets; register it.
        if kind == InstrKind::Branch {
            for target in self.branch_targets(copy) {
                self.add_label_ref(target, copy);
            }
        }

        if include_dst {
            if let Some(dst) = self.instrs[instr].dst {
                let dup = self.copy_opnd(dst);
                self.set_dst(copy, dup);
            }
        }
        if let Some(src) = self.instrs[instr].src1 {
            let dup = self.copy_opnd(src);
            self.set_src1(copy, dup);
        }
        if let Some(src) = self.instrs[instr].src2 {
            let dup = self.copy_opnd(src);
            self.set_src2(copy, dup);
        }

        self.copy_bail_out_onto(instr, copy);
        copy
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Re-check the structural invariants, reporting the first violation.
    pub fn verify(&self) -> Result<(), String> {
        // List consistency and acyclicity.
        let mut seen = 0usize;
        let mut cur = self.head;
        loop {
            let node = &self.instrs[cur];
            seen += 1;
            if seen > self.instrs.len() {
                return Err("instruction list contains a cycle".into());
            }
            match node.next {
                Some(next) => {
                    if self.instrs[next].prev != Some(cur) {
                        return Err(format!("link inconsistency at {cur:?} -> {next:?}"));
                    }
                    cur = next;
                }
                None => {
                    if cur != self.tail {
                        return Err(format!("list ends at {cur:?}, not at the exit anchor"));
                    }
                    break;
                }
            }
        }

        // Branch/label back-reference bijection.
        for (id, instr) in self.instrs.iter() {
            if instr.is_branch() {
                for target in self.branch_targets(id) {
                    let refs = self.instrs[target].as_label().refs();
                    let count = refs.iter().filter(|&&r| r == id).count();
                    if count != 1 {
                        return Err(format!(
                            "branch {id:?} appears {count} times in refs of {target:?}"
                        ));
                    }
                }
            }
            if instr.is_label() {
                for &br in instr.as_label().refs() {
                    if !self.branch_targets(br).contains(&id) {
                        return Err(format!(
                            "label {id:?} lists {br:?} which does not target it"
                        ));
                    }
                }
            }
        }

        // Operand claim discipline: every slot operand is claimed, and no
        // operand occupies two slots.
        let mut slots: FxHashMap<OpndId, usize> = FxHashMap::default();
        let mut record = |map: &mut FxHashMap<OpndId, usize>, opnd: OpndId| {
            *map.entry(opnd).or_insert(0) += 1;
        };
        for (_, instr) in self.instrs.iter() {
            for opnd in [instr.dst(), instr.src1(), instr.src2()].into_iter().flatten() {
                record(&mut slots, opnd);
            }
        }
        for (_, opnd) in self.opnds.iter() {
            match &opnd.data {
                OpndData::Indir { base, index, .. } => {
                    record(&mut slots, *base);
                    if let Some(index) = index {
                        record(&mut slots, *index);
                    }
                }
                OpndData::List(elems) => {
                    for &e in elems {
                        record(&mut slots, e);
                    }
                }
                _ => {}
            }
        }
        for (id, opnd) in self.opnds.iter() {
            let occupancy = slots.get(&id).copied().unwrap_or(0);
            if occupancy > 1 {
                return Err(format!("operand {id:?} occupies {occupancy} slots"));
            }
            if opnd.is_in_use() && occupancy == 0 {
                return Err(format!("operand {id:?} is claimed but fills no slot"));
            }
            if !opnd.is_in_use() && occupancy > 0 {
                return Err(format!("operand {id:?} fills a slot but is not claimed"));
            }
        }

        // Bailout flag agreement and ownership.
        for (id, instr) in self.instrs.iter() {
            let has_attachment = instr.bail_out_attachment().is_some();
            let flagged = instr.flags.contains(InstrFlags::HAS_BAIL_OUT)
                || instr.flags.contains(InstrFlags::HAS_AUX_BAIL_OUT);
            if has_attachment != flagged {
                return Err(format!("bailout flags disagree with attachment on {id:?}"));
            }
            if let Some(att) = instr.bail_out_attachment() {
                if !self.bail_outs.is_live(att.info) {
                    return Err(format!("instruction {id:?} references a freed bailout record"));
                }
            }
        }
        for (id, info) in self.bail_outs.iter() {
            if let Some(owner) = info.owner {
                let ok = self
                    .instrs
                    .get(owner)
                    .and_then(|i| i.bail_out_attachment())
                    .is_some_and(|att| att.info == id);
                if !ok {
                    return Err(format!("bailout record {id:?} has a stale owner"));
                }
            }
        }

        Ok(())
    }
}

impl Default for Func {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// Forward instruction iterator.
pub struct InstrIter<'a> {
    func: &'a Func,
    cur: Option<InstrId>,
    until: Option<InstrId>,
}

impl Iterator for InstrIter<'_> {
    type Item = InstrId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        self.cur = if Some(id) == self.until {
            None
        } else {
            self.func.instrs[id].next
        };
        Some(id)
    }
}

/// Backward instruction iterator.
pub struct RevInstrIter<'a> {
    func: &'a Func,
    cur: Option<InstrId>,
    until: Option<InstrId>,
}

impl Iterator for RevInstrIter<'_> {
    type Item = InstrId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        self.cur = if Some(id) == self.until {
            None
        } else {
            self.func.instrs[id].prev
        };
        Some(id)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opcode::Opcode;

    #[test]
    fn test_new_func_has_anchors() {
        let func = Func::new();
        assert_eq!(func.instr_count(), 2);
        assert_eq!(
            func.next_of(func.entry_instr()),
            Some(func.exit_instr())
        );
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_insert_before_links() {
        let mut func = Func::new();
        let x = func.new_instr(Opcode::Add);
        func.append(x);
        let y = func.new_instr(Opcode::Sub);
        func.insert_before(x, y);

        assert_eq!(func.next_of(y), Some(x));
        assert_eq!(func.prev_of(x), Some(y));
        assert_eq!(func.next_of(func.entry_instr()), Some(y));
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_insert_after_links() {
        let mut func = Func::new();
        let x = func.new_instr(Opcode::Add);
        func.append(x);
        let y = func.new_instr(Opcode::Sub);
        func.insert_after(x, y);

        assert_eq!(func.next_of(x), Some(y));
        assert_eq!(func.prev_of(func.exit_instr()), Some(y));
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_remove_is_unlink_then_free() {
        let mut func = Func::new();
        let x = func.new_instr(Opcode::Add);
        func.append(x);

        assert_eq!(func.remove(x), FreeOutcome::Freed);
        assert!(!func.instrs.is_live(x));
        assert!(func.iter().all(|id| id != x));
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_unlink_keeps_instr_alive() {
        let mut func = Func::new();
        let x = func.new_instr(Opcode::Add);
        func.append(x);
        func.unlink(x);

        assert!(func.instrs.is_live(x));
        assert!(!func.instr(x).is_linked());
        assert_eq!(func.free_instr(x), FreeOutcome::Freed);
    }

    #[test]
    fn test_insert_range() {
        let mut func = Func::new();
        let anchor = func.new_instr(Opcode::Add);
        func.append(anchor);

        // Build a detached run a -> b.
        let a = func.new_instr(Opcode::Sub);
        let b = func.new_instr(Opcode::Mul);
        func.instr_mut(a).next = Some(b);
        func.instr_mut(b).prev = Some(a);

        func.insert_range_after(anchor, a, b);
        let order: Vec<_> = func.iter().collect();
        assert_eq!(
            order,
            vec![func.entry_instr(), anchor, a, b, func.exit_instr()]
        );
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_move_before_restamps_offset() {
        let mut func = Func::new();
        let a = func.new_instr(Opcode::Add);
        func.instr_mut(a).byte_code_offset = 10;
        func.append(a);
        let b = func.new_instr(Opcode::Sub);
        func.instr_mut(b).byte_code_offset = 50;
        func.append(b);

        func.move_before(b, a);
        assert_eq!(func.next_of(b), Some(a));
        assert_eq!(func.instr(b).byte_code_offset, 10);
    }

    #[test]
    fn test_next_real_skips_markers() {
        let mut func = Func::new();
        let label = func.new_label();
        func.append(label);
        let add = func.new_instr(Opcode::Add);
        func.append(add);

        assert_eq!(func.next_real_instr(func.entry_instr()), add);
        assert_eq!(func.next_real_instr_or_label(func.entry_instr()), label);
    }

    #[test]
    #[should_panic(expected = "ran off the end")]
    fn test_next_real_at_end_is_fatal() {
        let mut func = Func::new();
        let label = func.new_label();
        func.append(label);
        let _ = func.next_real_instr(label);
    }

    #[test]
    fn test_constant_single_def_retained() {
        let mut func = Func::new();
        let instr = func.new_instr(Opcode::Ld);
        let sym = func.syms.new_sym();
        let dst = func.new_reg_opnd(sym);
        func.set_dst(instr, dst);
        let src = func.new_int_const_opnd(42);
        func.set_src1(instr, src);
        func.append(instr);
        func.syms.sym_mut(sym).set_is_const(true);

        assert_eq!(func.remove(instr), FreeOutcome::Retained);
        // Still linked and still live.
        assert!(func.iter().any(|id| id == instr));
        assert!(func.instrs.is_live(instr));
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_copy_instr_duplicates_operands() {
        let mut func = Func::new();
        let instr = func.new_instr(Opcode::Add);
        let sym = func.syms.new_sym();
        let dst = func.new_reg_opnd(sym);
        func.set_dst(instr, dst);
        let src = func.new_int_const_opnd(3);
        func.set_src1(instr, src);
        func.append(instr);

        let copy = func.copy_instr(instr, true);
        assert_eq!(func.instr(copy).opcode, Opcode::Add);
        assert!(!func.instr(copy).is_linked());
        let copy_dst = func.instr(copy).dst().unwrap();
        assert_ne!(copy_dst, dst);
        assert!(func.opnds_equal(copy_dst, dst));
        // Two defs on the same symbol: no longer single-def.
        assert!(!func.syms.sym(sym).is_single_def());
    }

    #[test]
    fn test_copy_instr_without_dst() {
        let mut func = Func::new();
        let instr = func.new_instr(Opcode::Add);
        let sym = func.syms.new_sym();
        let dst = func.new_reg_opnd(sym);
        func.set_dst(instr, dst);
        func.append(instr);

        let copy = func.copy_instr(instr, false);
        assert!(func.instr(copy).dst().is_none());
        assert!(func.syms.sym(sym).is_single_def());
    }

    #[test]
    fn test_numbering() {
        let mut func = Func::new();
        let a = func.new_instr(Opcode::Add);
        func.append(a);
        let b = func.new_instr(Opcode::Sub);
        func.append(b);

        func.number_instrs();
        assert!(func.instr(a).number < func.instr(b).number);
        assert_eq!(func.instr(func.entry_instr()).number, 1);
    }

    #[test]
    fn test_editing_traversal_allows_removal() {
        let mut func = Func::new();
        for _ in 0..4 {
            let i = func.new_instr(Opcode::Nop);
            func.append(i);
        }
        func.for_each_editing(|f, id| {
            if f.instr(id).opcode == Opcode::Nop {
                f.remove(id);
            }
        });
        assert_eq!(func.instr_count(), 2);
        assert!(func.verify().is_ok());
    }
}
