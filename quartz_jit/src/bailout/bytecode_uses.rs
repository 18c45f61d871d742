//! Auxiliary liveness markers.
//!
//! Optimization may delete the real uses of a value whose original
//! bytecode still needs it when a bailout reconstructs the interpreter
//! frame. A `ByteCodeUses` marker records "this point still logically
//! uses these symbols" so liveness walks keep them alive for
//! reconstruction. The markers carry no semantics of their own and are
//! skipped by real-instruction traversal.

use crate::ir::arena::BitSet;
use crate::ir::func::Func;
use crate::ir::instr::{Instr, InstrId, InstrKind, InstrPayload};
use crate::ir::opcode::Opcode;
use crate::ir::sym::SymId;

// =============================================================================
// Payload
// =============================================================================

/// Symbols a `ByteCodeUses` marker keeps alive, by symbol index.
#[derive(Debug, Clone, Default)]
pub struct ByteCodeUsesPayload {
    used: BitSet,
}

impl ByteCodeUsesPayload {
    /// Check whether a symbol is tracked.
    #[inline]
    pub fn contains(&self, sym: SymId) -> bool {
        self.used.contains(sym.as_usize())
    }

    /// Iterate over tracked symbol indices.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.used.iter()
    }

    /// Number of tracked symbols.
    pub fn count(&self) -> usize {
        self.used.count()
    }
}

// =============================================================================
// Marker Operations
// =============================================================================

impl Func {
    /// Create an unlinked liveness marker for the given bytecode offset.
    pub fn new_byte_code_uses(&mut self, offset: u32) -> InstrId {
        let id = self.alloc_raw_instr(Instr::new(
            Opcode::ByteCodeUses,
            InstrKind::ByteCodeUses,
            InstrPayload::ByteCodeUses(ByteCodeUsesPayload::default()),
        ));
        self.instr_mut(id).byte_code_offset = offset;
        id
    }

    /// Track a symbol in a liveness marker.
    pub fn byte_code_uses_add(&mut self, marker: InstrId, sym: SymId) {
        self.instr_mut(marker)
            .as_byte_code_uses_mut()
            .used
            .insert(sym.as_usize());
    }

    /// Merge marker `second` into marker `first` if that is sound:
    /// both must sit at the same bytecode offset, no instruction between
    /// them may define a destination, and no label or branch may
    /// intervene (merging across a basic-block boundary would extend
    /// liveness onto paths that never had it). On success the symbol sets
    /// are unioned into `first` and `second` is removed.
    pub fn try_merge_byte_code_uses(&mut self, first: InstrId, second: InstrId) -> bool {
        assert!(
            self.instr(first).kind() == InstrKind::ByteCodeUses
                && self.instr(second).kind() == InstrKind::ByteCodeUses,
            "merge requires two ByteCodeUses markers"
        );
        if self.instr(first).byte_code_offset != self.instr(second).byte_code_offset {
            return false;
        }

        // Scan the gap.
        let mut cur = self.next_of(first);
        loop {
            let Some(id) = cur else {
                // `second` is not after `first` at all.
                return false;
            };
            if id == second {
                break;
            }
            let between = self.instr(id);
            if between.dst().is_some() {
                return false;
            }
            if between.is_label() || between.is_branch() {
                return false;
            }
            cur = self.next_of(id);
        }

        let second_set = self.instr(second).as_byte_code_uses().used.clone();
        self.instr_mut(first)
            .as_byte_code_uses_mut()
            .used
            .union_with(&second_set);
        self.remove(second);
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
