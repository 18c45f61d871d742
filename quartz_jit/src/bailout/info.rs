//! Bailout records and the ownership protocol over them.
//!
//! A [`BailOutInfo`] describes one deoptimization point: where to resume
//! in bytecode and the captured values the interpreter needs. Records are
//! attached to instructions by composition (any instruction kind can
//! carry one) and obey a strict ownership discipline:
//!
//! - Exactly one instruction is the authoritative owner at any time.
//! - [`Func::share_bail_out`] moves ownership to a fresh bail-target
//!   instruction and marks the record shared; later passes must no longer
//!   assume the two sites' kinds agree.
//! - [`Func::replace_bail_out_info`] frees the displaced record unless it
//!   is shared or was produced by cloning, in which case another
//!   instruction still references it.
//! - [`Func::clone_bail_out`] reuses the *same* record for a cloned
//!   guard: both copies represent the same logical check and must bail
//!   out identically.
//! - Copy-conversion snapshots the captured values into a brand-new
//!   record when two sites need to diverge afterward.
//!
//! Attachment states: a record arrives either as a *primary* bailout,
//! visible to optimization queries, or as a hidden *auxiliary* one (a
//! debugger hook the optimizer must not trip over). An aux bailout is
//! either promoted to primary, or the primary conversion of an
//! aux-carrying instruction keeps the aux kind as a decoration on the
//! same record. A cleanup pass promotes any surviving aux bailout before
//! lowering.

use crate::ir::arena::{BitSet, Id};
use crate::ir::func::Func;
use crate::ir::instr::{Instr, InstrFlags, InstrId, InstrKind, InstrPayload};
use crate::ir::opcode::Opcode;
use crate::ir::sym::SymId;
use super::kind::{BailOutKind, BailOutModifiers};

// =============================================================================
// Captured State
// =============================================================================

/// A constant value captured for frame reconstruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Undefined,
    Null,
}

/// The snapshot a bailout needs to rebuild interpreter state: constants
/// folded away by optimization, copy-propagation aliases, and which
/// argument-object symbols are still live.
#[derive(Debug, Clone, Default)]
pub struct CapturedValues {
    /// Symbols whose value became a compile-time constant.
    pub const_values: Vec<(SymId, ConstValue)>,
    /// `(original, current)` pairs introduced by copy propagation.
    pub copy_prop_syms: Vec<(SymId, SymId)>,
    /// Liveness of synthetic argument-object symbols, by symbol index.
    pub arg_obj_syms: BitSet,
}

// =============================================================================
// Bailout Record
// =============================================================================

/// Unique identifier for a bailout record.
pub type BailOutInfoId = Id<BailOutInfo>;

/// The link from an instruction to its bailout record.
#[derive(Debug, Clone, Copy)]
pub struct BailOutAttachment {
    pub info: BailOutInfoId,
    /// Primary kind; meaningful while the instruction's primary flag is
    /// set.
    pub kind: BailOutKind,
    /// Auxiliary kind; meaningful while the aux flag is set.
    pub aux_kind: BailOutKind,
}

/// One deoptimization point.
#[derive(Debug, Clone)]
pub struct BailOutInfo {
    /// Bytecode offset to resume interpretation at.
    pub bail_out_offset: u32,
    /// The authoritative owner instruction.
    pub owner: Option<InstrId>,
    /// Ownership was moved to a shared bail target; other instructions
    /// reference this record and their kinds may differ.
    pub shared: bool,
    /// The record is referenced by a cloned guard as well.
    pub was_cloned: bool,
    /// The record was produced by a snapshot copy.
    pub was_copied: bool,
    /// Captured interpreter state.
    pub captured: CapturedValues,
    /// Lazy mode suppressed liveness of the owner's dst; restored when
    /// the lazy bit is cleared.
    pub dst_liveness_suppressed: bool,
}

impl BailOutInfo {
    fn new(bail_out_offset: u32, owner: InstrId) -> Self {
        BailOutInfo {
            bail_out_offset,
            owner: Some(owner),
            shared: false,
            was_cloned: false,
            was_copied: false,
            captured: CapturedValues::default(),
            dst_liveness_suppressed: false,
        }
    }

    /// A pre-op record resumes *before* the owning instruction's effects:
    /// its offset equals the instruction's own offset.
    #[inline]
    pub fn is_pre_op(&self, instr_offset: u32) -> bool {
        self.bail_out_offset == instr_offset
    }

    /// A post-op record resumes *after* the instruction already had
    /// effect: its offset is greater than the instruction's.
    #[inline]
    pub fn is_post_op(&self, instr_offset: u32) -> bool {
        self.bail_out_offset > instr_offset
    }
}

// =============================================================================
// Attachment Protocol
// =============================================================================

impl Func {
    /// Get a bailout record.
    #[inline]
    pub fn bail_out_info(&self, id: BailOutInfoId) -> &BailOutInfo {
        &self.bail_outs[id]
    }

    /// Get a bailout record mutably.
    #[inline]
    pub fn bail_out_info_mut(&mut self, id: BailOutInfoId) -> &mut BailOutInfo {
        &mut self.bail_outs[id]
    }

    /// Attach a primary bailout of `kind` resuming at `offset`.
    ///
    /// On an instruction already carrying an auxiliary bailout, the aux
    /// record is reused: the primary kind takes over and the aux kind
    /// stays as a decoration on the same record.
    pub fn convert_to_bail_out_instr(
        &mut self,
        instr: InstrId,
        kind: BailOutKind,
        offset: u32,
    ) -> BailOutInfoId {
        assert!(
            !self.instrs[instr].has_bail_out(),
            "instruction already has a primary bailout"
        );
        if self.instrs[instr].has_aux_bail_out() {
            let att = self.instrs[instr].bail_out.as_mut().unwrap();
            att.kind = kind;
            let info = att.info;
            self.instrs[instr].flags.insert(InstrFlags::HAS_BAIL_OUT);
            return info;
        }
        let info = self.bail_outs.alloc(BailOutInfo::new(offset, instr));
        self.instrs[instr].bail_out = Some(BailOutAttachment {
            info,
            kind,
            aux_kind: BailOutKind::NONE,
        });
        self.instrs[instr].flags.insert(InstrFlags::HAS_BAIL_OUT);
        info
    }

    /// Attach a hidden auxiliary bailout. Ordinary `has_bail_out`
    /// queries will not see it.
    pub fn convert_to_aux_bail_out_instr(
        &mut self,
        instr: InstrId,
        kind: BailOutKind,
        offset: u32,
    ) -> BailOutInfoId {
        assert!(
            self.instrs[instr].bail_out.is_none(),
            "instruction already carries a bailout record"
        );
        let info = self.bail_outs.alloc(BailOutInfo::new(offset, instr));
        self.instrs[instr].bail_out = Some(BailOutAttachment {
            info,
            kind: BailOutKind::NONE,
            aux_kind: kind,
        });
        self.instrs[instr].flags.insert(InstrFlags::HAS_AUX_BAIL_OUT);
        info
    }

    /// Promote an auxiliary bailout to primary. Kind and record identity
    /// carry over unchanged, so the result is indistinguishable from a
    /// direct primary conversion of the same kind.
    pub fn promote_aux_bail_out(&mut self, instr: InstrId) {
        assert!(
            self.instrs[instr].has_aux_bail_out() && !self.instrs[instr].has_bail_out(),
            "promotion requires an aux-only bailout"
        );
        let att = self.instrs[instr].bail_out.as_mut().unwrap();
        att.kind = att.aux_kind;
        att.aux_kind = BailOutKind::NONE;
        self.instrs[instr].flags.remove(InstrFlags::HAS_AUX_BAIL_OUT);
        self.instrs[instr].flags.insert(InstrFlags::HAS_BAIL_OUT);
    }

    /// Move a record's ownership to a fresh, unlinked bail-target
    /// instruction and mark the record shared. The original instruction
    /// keeps referencing the record but no longer owns it; the caller
    /// links the returned bail target where the shared bailout belongs.
    pub fn share_bail_out(&mut self, instr: InstrId) -> InstrId {
        assert!(
            self.instrs[instr].has_bail_out(),
            "share_bail_out requires a primary bailout"
        );
        let att = *self.instrs[instr].bail_out.as_ref().unwrap();
        let target = self.instrs.alloc(Instr::new(
            Opcode::BailTarget,
            InstrKind::Plain,
            InstrPayload::None,
        ));
        self.instrs[target].byte_code_offset = self.bail_outs[att.info].bail_out_offset;
        self.instrs[target].bail_out = Some(BailOutAttachment {
            info: att.info,
            kind: att.kind,
            aux_kind: BailOutKind::NONE,
        });
        self.instrs[target].flags.insert(InstrFlags::HAS_BAIL_OUT);
        let info = &mut self.bail_outs[att.info];
        info.owner = Some(target);
        info.shared = true;
        target
    }

    /// Swap in a different record. The displaced record is freed
    /// immediately unless it is shared or was produced by cloning, in
    /// which case another instruction still references it.
    pub fn replace_bail_out_info(&mut self, instr: InstrId, new_info: BailOutInfoId) {
        let att = self
            .instrs[instr]
            .bail_out
            .as_mut()
            .expect("replace_bail_out_info requires an attached record");
        let old = att.info;
        att.info = new_info;
        self.bail_outs[new_info].owner = Some(instr);
        if old != new_info {
            let (shared, was_cloned, owner) = {
                let d = &self.bail_outs[old];
                (d.shared, d.was_cloned, d.owner)
            };
            if !shared && !was_cloned {
                self.bail_outs.free(old);
            } else if owner == Some(instr) {
                self.bail_outs[old].owner = None;
            }
        }
    }

    /// Attach `original`'s record to its clone. Both sites represent the
    /// same logical guard on two control paths and must bail out
    /// identically, so the record is reused, flagged `was_cloned`, and
    /// ownership moves to the clone.
    pub fn clone_bail_out(&mut self, original: InstrId, clone: InstrId) {
        let att = *self
            .instrs[original]
            .bail_out
            .as_ref()
            .expect("clone_bail_out requires an attached record");
        let flags = self.instrs[original].flags
            & (InstrFlags::HAS_BAIL_OUT | InstrFlags::HAS_AUX_BAIL_OUT);
        self.instrs[clone].bail_out = Some(att);
        self.instrs[clone].flags.insert(flags);
        let info = &mut self.bail_outs[att.info];
        info.was_cloned = true;
        info.owner = Some(clone);
    }

    /// Attach a primary bailout whose record is a field-wise snapshot of
    /// `source`'s captured values. Unlike [`Func::clone_bail_out`], the
    /// two sites own distinct records and may diverge afterward.
    pub fn convert_to_bail_out_instr_with_info_copy(
        &mut self,
        instr: InstrId,
        source: BailOutInfoId,
        kind: BailOutKind,
    ) -> BailOutInfoId {
        assert!(
            self.instrs[instr].bail_out.is_none(),
            "instruction already carries a bailout record"
        );
        let src = &self.bail_outs[source];
        let mut info = BailOutInfo::new(src.bail_out_offset, instr);
        info.captured = src.captured.clone();
        info.was_copied = true;
        let info = self.bail_outs.alloc(info);
        self.instrs[instr].bail_out = Some(BailOutAttachment {
            info,
            kind,
            aux_kind: BailOutKind::NONE,
        });
        self.instrs[instr].flags.insert(InstrFlags::HAS_BAIL_OUT);
        info
    }

    /// Detach and drop an instruction's bailout. The record is freed when
    /// no other site references it.
    pub fn clear_bail_out(&mut self, instr: InstrId) {
        let att = self
            .instrs[instr]
            .bail_out
            .take()
            .expect("clear_bail_out without an attached record");
        self.instrs[instr]
            .flags
            .remove(InstrFlags::HAS_BAIL_OUT | InstrFlags::HAS_AUX_BAIL_OUT);
        let (shared, was_cloned, owner) = {
            let info = &self.bail_outs[att.info];
            (info.shared, info.was_cloned, info.owner)
        };
        if !shared && !was_cloned {
            self.bail_outs.free(att.info);
        } else if owner == Some(instr) {
            self.bail_outs[att.info].owner = None;
        }
    }

    /// Decorate an instruction's primary bailout with the lazy modifier,
    /// suppressing the dst's liveness at the bailout point.
    pub fn apply_lazy_bail_out(&mut self, instr: InstrId) {
        let att = self
            .instrs[instr]
            .bail_out
            .as_mut()
            .expect("apply_lazy_bail_out requires an attached record");
        att.kind = att.kind.with_modifier(BailOutModifiers::LAZY);
        let info = att.info;
        self.bail_outs[info].dst_liveness_suppressed = true;
    }

    /// Clear the lazy modifier. When lazy was the only content of the
    /// kind, the whole bailout is dropped; otherwise only the bit is
    /// stripped and the dst-liveness suppression lazy mode applied is
    /// restored.
    pub fn clear_lazy_bail_out(&mut self, instr: InstrId) {
        assert!(
            self.instrs[instr].has_bail_out(),
            "clear_lazy_bail_out requires a primary bailout"
        );
        let kind = self.instrs[instr].bail_out.as_ref().unwrap().kind;
        if !kind.is_lazy() {
            return;
        }
        if kind.is_lazy_only() {
            self.clear_bail_out(instr);
            return;
        }
        let att = self.instrs[instr].bail_out.as_mut().unwrap();
        att.kind = kind.without_modifier(BailOutModifiers::LAZY);
        let info = att.info;
        self.bail_outs[info].dst_liveness_suppressed = false;
    }

    /// Promote every surviving aux-only bailout back to primary. Runs as
    /// a cleanup before lowering, which understands only primary records.
    pub fn promote_all_aux_bail_outs(&mut self) {
        let pending: Vec<InstrId> = self
            .instrs
            .iter()
            .filter(|(_, i)| {
                i.flags.contains(InstrFlags::HAS_AUX_BAIL_OUT)
                    && !i.flags.contains(InstrFlags::HAS_BAIL_OUT)
            })
            .map(|(id, _)| id)
            .collect();
        for instr in pending {
            self.promote_aux_bail_out(instr);
        }
    }

    /// Release an instruction's record during free.
    pub(crate) fn release_bail_out_on_free(&mut self, instr: InstrId) {
        if self.instrs[instr].bail_out.is_some() {
            self.clear_bail_out(instr);
        }
    }

    /// Shallow-duplicate `src`'s record (and kinds) onto `dst` for
    /// instruction copies.
    pub(crate) fn copy_bail_out_onto(&mut self, src: InstrId, dst: InstrId) {
        let Some(att) = self.instrs[src].bail_out else {
            return;
        };
        let flags =
            self.instrs[src].flags & (InstrFlags::HAS_BAIL_OUT | InstrFlags::HAS_AUX_BAIL_OUT);
        let mut dup = self.bail_outs[att.info].clone();
        dup.owner = Some(dst);
        dup.shared = false;
        dup.was_cloned = false;
        dup.was_copied = true;
        let info = self.bail_outs.alloc(dup);
        self.instrs[dst].bail_out = Some(BailOutAttachment { info, ..att });
        self.instrs[dst].flags.insert(flags);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bailout::kind::BailOutReason;

    fn guard(func: &mut Func, offset: u32) -> InstrId {
        let instr = func.new_instr(Opcode::GuardType);
        func.instr_mut(instr).byte_code_offset = offset;
        func.append(instr);
        instr
    }

    #[test]
    fn test_primary_conversion() {
        let mut func = Func::new();
        let instr = guard(&mut func, 10);
        let kind = BailOutKind::new(BailOutReason::MonoTypeCheck);
        let info = func.convert_to_bail_out_instr(instr, kind, 10);

        assert!(func.instr(instr).has_bail_out());
        assert!(!func.instr(instr).has_aux_bail_out());
        assert_eq!(func.instr(instr).bail_out_kind(), kind);
        assert_eq!(func.bail_out_info(info).owner, Some(instr));
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_aux_is_hidden() {
        let mut func = Func::new();
        let instr = guard(&mut func, 10);
        let kind = BailOutKind::new(BailOutReason::ExceptionInFlight);
        func.convert_to_aux_bail_out_instr(instr, kind, 10);

        // Invisible to ordinary optimization queries.
        assert!(!func.instr(instr).has_bail_out());
        assert!(func.instr(instr).has_aux_bail_out());
        assert_eq!(func.instr(instr).aux_bail_out_kind(), kind);
    }

    #[test]
    fn test_promotion_equivalence() {
        let kind = BailOutKind::new(BailOutReason::ExpectedInt);

        let mut direct = Func::new();
        let d = guard(&mut direct, 10);
        direct.convert_to_bail_out_instr(d, kind, 10);

        let mut promoted = Func::new();
        let p = guard(&mut promoted, 10);
        let info = promoted.convert_to_aux_bail_out_instr(p, kind, 10);
        promoted.promote_aux_bail_out(p);

        // Indistinguishable: same kind, record identity kept, flags agree.
        assert_eq!(promoted.instr(p).bail_out_kind(), kind);
        assert_eq!(direct.instr(d).bail_out_kind(), kind);
        assert!(!promoted.instr(p).has_aux_bail_out());
        assert_eq!(promoted.instr(p).bail_out_attachment().unwrap().info, info);
    }

    #[test]
    fn test_primary_over_aux_keeps_decoration() {
        let mut func = Func::new();
        let instr = guard(&mut func, 10);
        let aux_kind = BailOutKind::new(BailOutReason::ExceptionInFlight);
        let aux_info = func.convert_to_aux_bail_out_instr(instr, aux_kind, 10);

        let primary = BailOutKind::new(BailOutReason::IntOverflow);
        let info = func.convert_to_bail_out_instr(instr, primary, 10);

        // Same record; both kinds present.
        assert_eq!(info, aux_info);
        assert!(func.instr(instr).has_bail_out());
        assert!(func.instr(instr).has_aux_bail_out());
        assert_eq!(func.instr(instr).bail_out_kind(), primary);
        assert_eq!(func.instr(instr).aux_bail_out_kind(), aux_kind);
    }

    #[test]
    fn test_promote_all_aux() {
        let mut func = Func::new();
        let a = guard(&mut func, 4);
        let kind = BailOutKind::new(BailOutReason::NoProfile);
        func.convert_to_aux_bail_out_instr(a, kind, 4);
        let b = guard(&mut func, 8);
        func.convert_to_bail_out_instr(b, kind, 8);

        func.promote_all_aux_bail_outs();
        assert!(func.instr(a).has_bail_out());
        assert!(!func.instr(a).has_aux_bail_out());
        assert!(func.instr(b).has_bail_out());
    }

    #[test]
    fn test_share_bail_out() {
        let mut func = Func::new();
        let a = guard(&mut func, 10);
        let kind = BailOutKind::new(BailOutReason::MonoTypeCheck);
        let info = func.convert_to_bail_out_instr(a, kind, 10);

        let b = func.share_bail_out(a);
        func.insert_after(a, b);

        assert_eq!(func.bail_out_info(info).owner, Some(b));
        assert!(func.bail_out_info(info).shared);
        // A keeps its reference but is no longer the owner.
        assert_eq!(func.instr(a).bail_out_attachment().unwrap().info, info);
        assert_ne!(func.bail_out_info(info).owner, Some(a));
        assert_eq!(func.instr(b).opcode, Opcode::BailTarget);
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_replace_frees_unshared_record() {
        let mut func = Func::new();
        let instr = guard(&mut func, 10);
        let kind = BailOutKind::new(BailOutReason::ExpectedNumber);
        let old = func.convert_to_bail_out_instr(instr, kind, 10);

        let donor = guard(&mut func, 20);
        let fresh = func.convert_to_bail_out_instr_with_info_copy(donor, old, kind);

        func.replace_bail_out_info(instr, fresh);
        assert!(!func.bail_outs.is_live(old));
        assert_eq!(func.bail_out_info(fresh).owner, Some(instr));
    }

    #[test]
    fn test_replace_keeps_shared_record() {
        let mut func = Func::new();
        let a = guard(&mut func, 10);
        let kind = BailOutKind::new(BailOutReason::MonoTypeCheck);
        let shared_info = func.convert_to_bail_out_instr(a, kind, 10);
        let target = func.share_bail_out(a);
        func.insert_after(a, target);

        // Replacing A's record must not free it: the bail target still
        // references it.
        let b = guard(&mut func, 30);
        let fresh = func.convert_to_bail_out_instr_with_info_copy(b, shared_info, kind);
        func.replace_bail_out_info(a, fresh);

        assert!(func.bail_outs.is_live(shared_info));
        assert_eq!(func.bail_out_info(shared_info).owner, Some(target));
    }

    #[test]
    fn test_info_copy_diverges() {
        let mut func = Func::new();
        let a = guard(&mut func, 10);
        let kind = BailOutKind::new(BailOutReason::IntOverflow);
        let original = func.convert_to_bail_out_instr(a, kind, 10);
        let sym = func.syms.new_sym();
        func.bail_out_info_mut(original)
            .captured
            .const_values
            .push((sym, ConstValue::Int(7)));

        let b = guard(&mut func, 10);
        let copy = func.convert_to_bail_out_instr_with_info_copy(b, original, kind);

        assert_ne!(copy, original);
        assert!(func.bail_out_info(copy).was_copied);
        assert_eq!(func.bail_out_info(copy).captured.const_values.len(), 1);

        // Divergence after the copy does not leak across.
        func.bail_out_info_mut(copy).captured.const_values.clear();
        assert_eq!(func.bail_out_info(original).captured.const_values.len(), 1);
    }

    #[test]
    fn test_lazy_clear_drops_lazy_only_record() {
        let mut func = Func::new();
        let instr = guard(&mut func, 10);
        let lazy = BailOutKind::NONE.with_modifier(BailOutModifiers::LAZY);
        let info = func.convert_to_bail_out_instr(instr, lazy, 10);

        func.clear_lazy_bail_out(instr);
        assert!(!func.instr(instr).has_bail_out());
        assert!(!func.bail_outs.is_live(info));
    }

    #[test]
    fn test_lazy_clear_strips_bit_and_restores_liveness() {
        let mut func = Func::new();
        let instr = guard(&mut func, 10);
        let kind = BailOutKind::new(BailOutReason::IntOverflow);
        let info = func.convert_to_bail_out_instr(instr, kind, 10);
        func.apply_lazy_bail_out(instr);
        assert!(func.bail_out_info(info).dst_liveness_suppressed);
        assert!(func.instr(instr).bail_out_kind().is_lazy());

        func.clear_lazy_bail_out(instr);
        assert!(func.instr(instr).has_bail_out());
        assert_eq!(func.instr(instr).bail_out_kind(), kind);
        assert!(!func.bail_out_info(info).dst_liveness_suppressed);
    }

    #[test]
    fn test_pre_and_post_op_resume() {
        let mut func = Func::new();
        let instr = guard(&mut func, 10);
        let kind = BailOutKind::new(BailOutReason::ImplicitCall);
        let pre = func.convert_to_bail_out_instr(instr, kind, 10);
        assert!(func.bail_out_info(pre).is_pre_op(10));
        assert!(!func.bail_out_info(pre).is_post_op(10));

        let post = guard(&mut func, 10);
        let post_info = func.convert_to_bail_out_instr(post, kind, 13);
        assert!(func.bail_out_info(post_info).is_post_op(10));
        assert!(!func.bail_out_info(post_info).is_pre_op(10));
    }

    #[test]
    fn test_free_releases_owned_record() {
        let mut func = Func::new();
        let instr = guard(&mut func, 10);
        let kind = BailOutKind::new(BailOutReason::ExpectedInt);
        let info = func.convert_to_bail_out_instr(instr, kind, 10);

        func.remove(instr);
        assert!(!func.bail_outs.is_live(info));
    }
}
