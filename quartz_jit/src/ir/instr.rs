//! Instruction nodes.
//!
//! Every instruction is a node in a per-function doubly linked list. The
//! kind tag is fixed at construction and decides which specialized payload
//! is valid; cross-kind access goes through checked `as_*` accessors that
//! assert the tag. Bailout data is attached by composition rather than by
//! dedicated subkinds: any kind can carry a [`BailOutAttachment`].

use smallvec::SmallVec;

use crate::bailout::bytecode_uses::ByteCodeUsesPayload;
use crate::bailout::info::BailOutAttachment;
use super::arena::Id;
use super::opcode::Opcode;
use super::opnd::OpndId;

// =============================================================================
// Instruction ID and Kind
// =============================================================================

/// Unique identifier for an instruction.
pub type InstrId = Id<Instr>;

/// Offset value for instructions that have no bytecode position.
pub const NO_BYTE_CODE_OFFSET: u32 = u32::MAX;

/// The closed set of instruction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrKind {
    /// Ordinary instruction.
    Plain,
    /// Single- or multi-target branch.
    Branch,
    /// Branch target.
    Label,
    /// Instruction carrying profile data.
    Profiled,
    /// Loop-header label carrying profile data.
    ProfiledLabel,
    /// Function prologue anchor.
    Entry,
    /// Function epilogue anchor.
    Exit,
    /// Statement-boundary pragma.
    Pragma,
    /// Auxiliary liveness marker for bailout reconstruction.
    ByteCodeUses,
    /// Instrumentation emitted when profiling the JIT output itself.
    Profiling,
}

bitflags::bitflags! {
    /// Instruction state flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct InstrFlags: u8 {
        /// A primary bailout record is attached and visible to passes.
        const HAS_BAIL_OUT = 1 << 0;
        /// An auxiliary bailout is attached, hidden from ordinary queries.
        const HAS_AUX_BAIL_OUT = 1 << 1;
        /// This instruction was produced by range cloning.
        const WAS_CLONED = 1 << 2;
    }
}

// =============================================================================
// Kind-Specific Payloads
// =============================================================================

/// Branch payload: forward target plus optional multi-branch table.
/// For a multi-branch, `target` holds the default target.
#[derive(Debug, Clone)]
pub struct BranchPayload {
    pub target: Option<InstrId>,
    pub multi: Option<Box<MultiBranchPayload>>,
}

/// Case targets of a multi-branch.
#[derive(Debug, Clone)]
pub enum MultiBranchPayload {
    /// Contiguous jump table indexed by `case_value - base`.
    JumpTable {
        base: i32,
        table: SmallVec<[InstrId; 8]>,
    },
    /// String switch dictionary.
    StrDict(rustc_hash::FxHashMap<Box<str>, InstrId>),
}

/// Label payload: the exact set of branches currently targeting this
/// label, plus loop bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct LabelPayload {
    pub(crate) refs: SmallVec<[InstrId; 4]>,
    pub is_loop_top: bool,
}

impl LabelPayload {
    /// Branches currently referencing this label.
    #[inline]
    pub fn refs(&self) -> &[InstrId] {
        &self.refs
    }
}

/// Profile payload for instructions with a profiled form.
#[derive(Debug, Clone, Copy)]
pub struct ProfilePayload {
    pub profile_id: u16,
}

/// Pragma payload: source statement mapping.
#[derive(Debug, Clone, Copy)]
pub struct PragmaPayload {
    pub statement_index: u32,
}

/// Instrumentation payload for profiling-build output.
#[derive(Debug, Clone, Copy)]
pub struct ProfilingPayload {
    pub probe_id: u16,
}

/// The kind-specific portion of an instruction.
#[derive(Debug, Clone)]
pub enum InstrPayload {
    None,
    Branch(BranchPayload),
    Label(LabelPayload),
    /// A profiled label also records which loop it heads.
    ProfiledLabel(LabelPayload, u16),
    Profiled(ProfilePayload),
    Pragma(PragmaPayload),
    ByteCodeUses(ByteCodeUsesPayload),
    Profiling(ProfilingPayload),
}

// =============================================================================
// Instruction
// =============================================================================

/// One instruction in a function's ordered list.
#[derive(Debug, Clone)]
pub struct Instr {
    pub opcode: Opcode,
    kind: InstrKind,
    pub(crate) flags: InstrFlags,
    /// Bytecode offset this instruction came from.
    pub byte_code_offset: u32,
    /// Ordinal assigned by the numbering pass; 0 means unnumbered.
    pub number: u32,
    pub(crate) dst: Option<OpndId>,
    pub(crate) src1: Option<OpndId>,
    pub(crate) src2: Option<OpndId>,
    pub(crate) prev: Option<InstrId>,
    pub(crate) next: Option<InstrId>,
    pub(crate) bail_out: Option<BailOutAttachment>,
    pub(crate) payload: InstrPayload,
    /// Linkage into the call argument chain; interpreted by the calling
    /// convention collaborator, opaque here.
    pub arg_link: Option<InstrId>,
}

impl Instr {
    pub(crate) fn new(opcode: Opcode, kind: InstrKind, payload: InstrPayload) -> Self {
        Instr {
            opcode,
            kind,
            flags: InstrFlags::empty(),
            byte_code_offset: NO_BYTE_CODE_OFFSET,
            number: 0,
            dst: None,
            src1: None,
            src2: None,
            prev: None,
            next: None,
            bail_out: None,
            payload,
            arg_link: None,
        }
    }

    pub(crate) fn payload_ref(&self) -> &InstrPayload {
        &self.payload
    }

    pub(crate) fn payload_clone(&self) -> InstrPayload {
        self.payload.clone()
    }

    // -------------------------------------------------------------------------
    // Kind Queries
    // -------------------------------------------------------------------------

    /// The fixed kind tag.
    #[inline]
    pub fn kind(&self) -> InstrKind {
        self.kind
    }

    /// Check if this is a label of either flavor.
    #[inline]
    pub fn is_label(&self) -> bool {
        matches!(self.kind, InstrKind::Label | InstrKind::ProfiledLabel)
    }

    /// Check if this is a branch.
    #[inline]
    pub fn is_branch(&self) -> bool {
        matches!(self.kind, InstrKind::Branch)
    }

    /// Check if this instruction has semantics of its own, as opposed to
    /// being a marker traversal should skip.
    #[inline]
    pub fn is_real(&self) -> bool {
        self.opcode.is_real() && !matches!(self.kind, InstrKind::Entry | InstrKind::Exit)
    }

    // -------------------------------------------------------------------------
    // Checked As-Kind Accessors
    // -------------------------------------------------------------------------

    /// Branch payload. Fatal if this is not a branch.
    #[inline]
    pub fn as_branch(&self) -> &BranchPayload {
        match &self.payload {
            InstrPayload::Branch(b) => b,
            _ => panic!("as_branch on {:?} instruction", self.kind),
        }
    }

    pub(crate) fn as_branch_mut(&mut self) -> &mut BranchPayload {
        match &mut self.payload {
            InstrPayload::Branch(b) => b,
            _ => panic!("as_branch on {:?} instruction", self.kind),
        }
    }

    /// Label payload. Fatal if this is not a label of either flavor.
    #[inline]
    pub fn as_label(&self) -> &LabelPayload {
        match &self.payload {
            InstrPayload::Label(l) | InstrPayload::ProfiledLabel(l, _) => l,
            _ => panic!("as_label on {:?} instruction", self.kind),
        }
    }

    pub(crate) fn as_label_mut(&mut self) -> &mut LabelPayload {
        match &mut self.payload {
            InstrPayload::Label(l) | InstrPayload::ProfiledLabel(l, _) => l,
            _ => panic!("as_label on {:?} instruction", self.kind),
        }
    }

    /// Profile payload. Fatal if this is not a profiled instruction.
    #[inline]
    pub fn as_profiled(&self) -> &ProfilePayload {
        match &self.payload {
            InstrPayload::Profiled(p) => p,
            _ => panic!("as_profiled on {:?} instruction", self.kind),
        }
    }

    /// Pragma payload. Fatal if this is not a pragma.
    #[inline]
    pub fn as_pragma(&self) -> &PragmaPayload {
        match &self.payload {
            InstrPayload::Pragma(p) => p,
            _ => panic!("as_pragma on {:?} instruction", self.kind),
        }
    }

    /// Byte-code-uses payload. Fatal if this is not a liveness marker.
    #[inline]
    pub fn as_byte_code_uses(&self) -> &ByteCodeUsesPayload {
        match &self.payload {
            InstrPayload::ByteCodeUses(b) => b,
            _ => panic!("as_byte_code_uses on {:?} instruction", self.kind),
        }
    }

    pub(crate) fn as_byte_code_uses_mut(&mut self) -> &mut ByteCodeUsesPayload {
        match &mut self.payload {
            InstrPayload::ByteCodeUses(b) => b,
            _ => panic!("as_byte_code_uses on {:?} instruction", self.kind),
        }
    }

    // -------------------------------------------------------------------------
    // Operand Slots
    // -------------------------------------------------------------------------

    /// The destination operand, if any.
    #[inline]
    pub fn dst(&self) -> Option<OpndId> {
        self.dst
    }

    /// The first source operand, if any.
    #[inline]
    pub fn src1(&self) -> Option<OpndId> {
        self.src1
    }

    /// The second source operand, if any.
    #[inline]
    pub fn src2(&self) -> Option<OpndId> {
        self.src2
    }

    /// The previous instruction in the list.
    #[inline]
    pub fn prev(&self) -> Option<InstrId> {
        self.prev
    }

    /// The next instruction in the list.
    #[inline]
    pub fn next(&self) -> Option<InstrId> {
        self.next
    }

    /// Check whether the instruction is linked into a list.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.prev.is_some() || self.next.is_some()
    }

    // -------------------------------------------------------------------------
    // Bailout Queries
    // -------------------------------------------------------------------------

    /// Check for a *primary* bailout. Auxiliary bailouts are deliberately
    /// invisible here so optimizer passes can add and remove primary
    /// bailouts without tripping over a debugger-only hook.
    #[inline]
    pub fn has_bail_out(&self) -> bool {
        self.flags.contains(InstrFlags::HAS_BAIL_OUT)
    }

    /// Check for a hidden auxiliary bailout.
    #[inline]
    pub fn has_aux_bail_out(&self) -> bool {
        self.flags.contains(InstrFlags::HAS_AUX_BAIL_OUT)
    }

    /// The attached bailout record, hidden or not.
    #[inline]
    pub fn bail_out_attachment(&self) -> Option<&BailOutAttachment> {
        self.bail_out.as_ref()
    }

    /// The primary bailout kind. Fatal without a primary bailout.
    #[inline]
    pub fn bail_out_kind(&self) -> crate::bailout::kind::BailOutKind {
        assert!(self.has_bail_out(), "instruction has no primary bailout");
        self.bail_out.as_ref().unwrap().kind
    }

    /// The auxiliary bailout kind. Fatal without an aux bailout.
    #[inline]
    pub fn aux_bail_out_kind(&self) -> crate::bailout::kind::BailOutKind {
        assert!(self.has_aux_bail_out(), "instruction has no aux bailout");
        self.bail_out.as_ref().unwrap().aux_kind
    }
}

// =============================================================================
// Tests
// =============================================================================
