//! The operand model: value references used by instruction slots.
//!
//! An operand's content is fixed at construction; what changes over its
//! lifetime is *linkage*. The claim discipline is strict: an operand
//! occupies at most one instruction slot at a time, enforced by the
//! `IN_USE` flag with fatal assertions. Passes that want the same value in
//! two places must duplicate the operand ([`Func::copy_opnd`]), never
//! share the instance. Structural equality ([`Func::opnds_equal`]) is for
//! redundancy elimination and ignores linkage entirely.
//!
//! Compound operands (indirect references, lists) own their component
//! operands: the components are claimed by the container at construction
//! and freed with it.

use super::arena::Id;
use super::cloner::Cloner;
use super::func::Func;
use super::sym::SymId;
use super::types::ValueType;

// =============================================================================
// Operand ID and Register Numbers
// =============================================================================

/// Unique identifier for an operand.
pub type OpndId = Id<Opnd>;

/// A machine register number, unassigned until register allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegNum(pub u8);

impl RegNum {
    /// No register assigned yet.
    pub const NONE: RegNum = RegNum(u8::MAX);

    /// Check if a register has been assigned.
    #[inline]
    pub const fn is_assigned(self) -> bool {
        self.0 != u8::MAX
    }
}

/// What a fixed address points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrKind {
    /// Raw data address.
    Fixed,
    /// A runtime helper routine.
    Helper,
    /// A runtime value pinned at JIT time.
    RuntimeVar,
}

// =============================================================================
// Operand
// =============================================================================

bitflags::bitflags! {
    /// Operand linkage flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpndFlags: u8 {
        /// Currently occupies an instruction (or container) slot.
        const IN_USE = 1 << 0;
    }
}

/// Tagged operand content.
#[derive(Debug, Clone, PartialEq)]
pub enum OpndData {
    /// Immediate integer constant.
    IntConst(i64),
    /// Immediate float constant.
    FloatConst(f64),
    /// A symbolic stack value.
    Sym(SymId),
    /// A symbolic value with a (future) register assignment.
    Reg { sym: SymId, reg: RegNum },
    /// `[base + index*scale + offset]` indirect reference. `base` and
    /// `index` are Reg operands owned by this operand.
    Indir {
        base: OpndId,
        index: Option<OpndId>,
        offset: i32,
        scale: u8,
    },
    /// A fixed address known at JIT time.
    Addr { addr: u64, kind: AddrKind },
    /// A raw memory reference (absolute load/store target).
    MemRef(u64),
    /// Reference to a label instruction.
    Label(super::instr::InstrId),
    /// Heterogeneous list of operands, owned by this operand.
    List(Vec<OpndId>),
}

/// An operand: tagged content plus an inferred value type and linkage.
#[derive(Debug, Clone)]
pub struct Opnd {
    pub data: OpndData,
    pub value_type: ValueType,
    flags: OpndFlags,
}

impl Opnd {
    pub(crate) fn new(data: OpndData, value_type: ValueType) -> Self {
        Opnd {
            data,
            value_type,
            flags: OpndFlags::empty(),
        }
    }

    /// Check whether the operand currently occupies a slot.
    #[inline]
    pub fn is_in_use(&self) -> bool {
        self.flags.contains(OpndFlags::IN_USE)
    }

    /// The symbol behind a Sym or Reg operand.
    #[inline]
    pub fn sym_id(&self) -> Option<SymId> {
        match self.data {
            OpndData::Sym(sym) | OpndData::Reg { sym, .. } => Some(sym),
            _ => None,
        }
    }

    /// The integer constant behind an IntConst operand.
    #[inline]
    pub fn as_int_const(&self) -> Option<i64> {
        match self.data {
            OpndData::IntConst(v) => Some(v),
            _ => None,
        }
    }

    /// Check if this is an immediate constant of any shape.
    #[inline]
    pub fn is_immediate(&self) -> bool {
        matches!(
            self.data,
            OpndData::IntConst(_) | OpndData::FloatConst(_) | OpndData::Addr { .. }
        )
    }
}

// =============================================================================
// Operand Operations
// =============================================================================

impl Func {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create an integer constant operand.
    pub fn new_int_const_opnd(&mut self, value: i64) -> OpndId {
        self.opnds
            .alloc(Opnd::new(OpndData::IntConst(value), ValueType::Int32))
    }

    /// Create a float constant operand.
    pub fn new_float_const_opnd(&mut self, value: f64) -> OpndId {
        self.opnds
            .alloc(Opnd::new(OpndData::FloatConst(value), ValueType::Float64))
    }

    /// Create a symbolic operand.
    pub fn new_sym_opnd(&mut self, sym: SymId) -> OpndId {
        let value_type = self.syms.sym(sym).value_type;
        self.opnds.alloc(Opnd::new(OpndData::Sym(sym), value_type))
    }

    /// Create a register operand for a symbol.
    pub fn new_reg_opnd(&mut self, sym: SymId) -> OpndId {
        let value_type = self.syms.sym(sym).value_type;
        self.opnds.alloc(Opnd::new(
            OpndData::Reg {
                sym,
                reg: RegNum::NONE,
            },
            value_type,
        ))
    }

    /// Create an indirect reference. Claims `base` and `index`.
    pub fn new_indir_opnd(
        &mut self,
        base: OpndId,
        index: Option<OpndId>,
        offset: i32,
        scale: u8,
    ) -> OpndId {
        assert!(
            matches!(self.opnds[base].data, OpndData::Reg { .. }),
            "indir base must be a Reg operand"
        );
        self.use_opnd(base);
        if let Some(index) = index {
            assert!(
                matches!(self.opnds[index].data, OpndData::Reg { .. }),
                "indir index must be a Reg operand"
            );
            self.use_opnd(index);
        }
        self.opnds.alloc(Opnd::new(
            OpndData::Indir {
                base,
                index,
                offset,
                scale,
            },
            ValueType::Tagged,
        ))
    }

    /// Create a fixed-address operand.
    pub fn new_addr_opnd(&mut self, addr: u64, kind: AddrKind) -> OpndId {
        self.opnds
            .alloc(Opnd::new(OpndData::Addr { addr, kind }, ValueType::Tagged))
    }

    /// Create a raw memory-reference operand.
    pub fn new_mem_ref_opnd(&mut self, addr: u64) -> OpndId {
        self.opnds
            .alloc(Opnd::new(OpndData::MemRef(addr), ValueType::Tagged))
    }

    /// Create a label-reference operand.
    pub fn new_label_opnd(&mut self, label: super::instr::InstrId) -> OpndId {
        debug_assert!(self.instr(label).is_label());
        self.opnds
            .alloc(Opnd::new(OpndData::Label(label), ValueType::Tagged))
    }

    /// Create a list operand. Claims every element.
    pub fn new_list_opnd(&mut self, elems: Vec<OpndId>) -> OpndId {
        for &elem in &elems {
            self.use_opnd(elem);
        }
        self.opnds
            .alloc(Opnd::new(OpndData::List(elems), ValueType::Tagged))
    }

    /// Get an operand.
    #[inline]
    pub fn opnd(&self, id: OpndId) -> &Opnd {
        &self.opnds[id]
    }

    /// Get an operand mutably.
    #[inline]
    pub fn opnd_mut(&mut self, id: OpndId) -> &mut Opnd {
        &mut self.opnds[id]
    }

    // -------------------------------------------------------------------------
    // Claim / Release
    // -------------------------------------------------------------------------

    /// Claim an operand for a slot. Claiming an operand that already
    /// occupies a slot is a fatal error.
    pub fn use_opnd(&mut self, id: OpndId) {
        let opnd = &mut self.opnds[id];
        assert!(
            !opnd.flags.contains(OpndFlags::IN_USE),
            "operand {id:?} is already claimed by another slot"
        );
        opnd.flags.insert(OpndFlags::IN_USE);
    }

    /// Release an operand's claim. Releasing an unclaimed operand is a
    /// fatal error.
    pub fn un_use_opnd(&mut self, id: OpndId) {
        let opnd = &mut self.opnds[id];
        assert!(
            opnd.flags.contains(OpndFlags::IN_USE),
            "double release of operand {id:?}"
        );
        opnd.flags.remove(OpndFlags::IN_USE);
    }

    // -------------------------------------------------------------------------
    // Duplication
    // -------------------------------------------------------------------------

    /// Duplicate an operand for reuse in another slot. The duplicate has
    /// identical content and is unclaimed; component operands of compound
    /// operands are duplicated as well.
    pub fn copy_opnd(&mut self, id: OpndId) -> OpndId {
        let (data, value_type) = {
            let opnd = &self.opnds[id];
            (opnd.data.clone(), opnd.value_type)
        };
        let data = match data {
            OpndData::Indir {
                base,
                index,
                offset,
                scale,
            } => {
                let base = self.copy_opnd(base);
                self.use_opnd(base);
                let index = index.map(|i| {
                    let copy = self.copy_opnd(i);
                    self.use_opnd(copy);
                    copy
                });
                OpndData::Indir {
                    base,
                    index,
                    offset,
                    scale,
                }
            }
            OpndData::List(elems) => {
                let elems = elems
                    .iter()
                    .map(|&e| {
                        let copy = self.copy_opnd(e);
                        self.use_opnd(copy);
                        copy
                    })
                    .collect();
                OpndData::List(elems)
            }
            other => other,
        };
        self.opnds.alloc(Opnd::new(data, value_type))
    }

    /// Duplicate an operand for the *definition* slot of a cloned
    /// instruction. Symbolic operands rebind to a fresh symbol (memoized
    /// in the cloner) so the clone does not alias the original's
    /// single-def symbol; derived facts like the inferred value type are
    /// preserved.
    pub fn clone_opnd_def(&mut self, id: OpndId, cloner: &mut Cloner) -> OpndId {
        self.clone_opnd_with(id, cloner, true)
    }

    /// Duplicate an operand for a *use* slot of a cloned instruction.
    /// Symbols already remapped by a cloned definition are rewritten to
    /// their fresh symbol; symbols defined outside the cloned range keep
    /// their identity.
    pub fn clone_opnd_use(&mut self, id: OpndId, cloner: &mut Cloner) -> OpndId {
        self.clone_opnd_with(id, cloner, false)
    }

    fn clone_opnd_with(&mut self, id: OpndId, cloner: &mut Cloner, is_def: bool) -> OpndId {
        let (data, value_type) = {
            let opnd = &self.opnds[id];
            (opnd.data.clone(), opnd.value_type)
        };
        let data = match data {
            OpndData::Sym(sym) => OpndData::Sym(self.clone_sym_ref(sym, cloner, is_def)),
            OpndData::Reg { sym, reg } => OpndData::Reg {
                sym: self.clone_sym_ref(sym, cloner, is_def),
                reg,
            },
            OpndData::Indir {
                base,
                index,
                offset,
                scale,
            } => {
                // Address components are always uses.
                let base = self.clone_opnd_use(base, cloner);
                self.use_opnd(base);
                let index = index.map(|i| {
                    let clone = self.clone_opnd_use(i, cloner);
                    self.use_opnd(clone);
                    clone
                });
                OpndData::Indir {
                    base,
                    index,
                    offset,
                    scale,
                }
            }
            OpndData::List(elems) => {
                let elems = elems
                    .iter()
                    .map(|&e| {
                        let clone = self.clone_opnd_with(e, cloner, is_def);
                        self.use_opnd(clone);
                        clone
                    })
                    .collect();
                OpndData::List(elems)
            }
            OpndData::Label(label) => OpndData::Label(cloner.mapped_label(label)),
            other => other,
        };
        self.opnds.alloc(Opnd::new(data, value_type))
    }

    fn clone_sym_ref(&mut self, sym: SymId, cloner: &mut Cloner, is_def: bool) -> SymId {
        if let Some(mapped) = cloner.mapped_sym(sym) {
            return mapped;
        }
        if is_def {
            let fresh = self.syms.new_cloned_sym(sym);
            cloner.record_sym(sym, fresh);
            fresh
        } else {
            sym
        }
    }

    // -------------------------------------------------------------------------
    // Equality and Free
    // -------------------------------------------------------------------------

    /// Structural equality: same kind and same content, linkage ignored.
    pub fn opnds_equal(&self, a: OpndId, b: OpndId) -> bool {
        match (&self.opnds[a].data, &self.opnds[b].data) {
            (OpndData::IntConst(x), OpndData::IntConst(y)) => x == y,
            (OpndData::FloatConst(x), OpndData::FloatConst(y)) => x.to_bits() == y.to_bits(),
            (OpndData::Sym(x), OpndData::Sym(y)) => x == y,
            (OpndData::Reg { sym: xs, reg: xr }, OpndData::Reg { sym: ys, reg: yr }) => {
                xs == ys && xr == yr
            }
            (
                OpndData::Indir {
                    base: xb,
                    index: xi,
                    offset: xo,
                    scale: xsc,
                },
                OpndData::Indir {
                    base: yb,
                    index: yi,
                    offset: yo,
                    scale: ysc,
                },
            ) => {
                xo == yo
                    && xsc == ysc
                    && self.opnds_equal(*xb, *yb)
                    && match (xi, yi) {
                        (Some(x), Some(y)) => self.opnds_equal(*x, *y),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (OpndData::Addr { addr: xa, kind: xk }, OpndData::Addr { addr: ya, kind: yk }) => {
                xa == ya && xk == yk
            }
            (OpndData::MemRef(x), OpndData::MemRef(y)) => x == y,
            (OpndData::Label(x), OpndData::Label(y)) => x == y,
            (OpndData::List(xs), OpndData::List(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .zip(ys.iter())
                        .all(|(&x, &y)| self.opnds_equal(x, y))
            }
            _ => false,
        }
    }

    /// Release any claim and return the operand's storage to the arena.
    /// Component operands of compound operands are freed as well.
    pub fn free_opnd(&mut self, id: OpndId) {
        let data = std::mem::replace(&mut self.opnds[id].data, OpndData::IntConst(0));
        match data {
            OpndData::Indir { base, index, .. } => {
                self.un_use_opnd(base);
                self.free_opnd(base);
                if let Some(index) = index {
                    self.un_use_opnd(index);
                    self.free_opnd(index);
                }
            }
            OpndData::List(elems) => {
                for elem in elems {
                    self.un_use_opnd(elem);
                    self.free_opnd(elem);
                }
            }
            _ => {}
        }
        let opnd = &mut self.opnds[id];
        opnd.flags.remove(OpndFlags::IN_USE);
        self.opnds.free(id);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_release() {
        let mut func = Func::new();
        let opnd = func.new_int_const_opnd(42);
        assert!(!func.opnd(opnd).is_in_use());

        func.use_opnd(opnd);
        assert!(func.opnd(opnd).is_in_use());

        func.un_use_opnd(opnd);
        assert!(!func.opnd(opnd).is_in_use());
    }

    #[test]
    #[should_panic(expected = "already claimed")]
    fn test_double_claim_panics() {
        let mut func = Func::new();
        let opnd = func.new_int_const_opnd(1);
        func.use_opnd(opnd);
        func.use_opnd(opnd);
    }

    #[test]
    #[should_panic(expected = "double release")]
    fn test_double_release_panics() {
        let mut func = Func::new();
        let opnd = func.new_int_const_opnd(1);
        func.use_opnd(opnd);
        func.un_use_opnd(opnd);
        func.un_use_opnd(opnd);
    }

    #[test]
    fn test_copy_is_unclaimed_and_equal() {
        let mut func = Func::new();
        let opnd = func.new_int_const_opnd(7);
        func.use_opnd(opnd);

        let copy = func.copy_opnd(opnd);
        assert!(!func.opnd(copy).is_in_use());
        assert!(func.opnds_equal(opnd, copy));
    }

    #[test]
    fn test_structural_equality() {
        let mut func = Func::new();
        let a = func.new_int_const_opnd(5);
        let b = func.new_int_const_opnd(5);
        let c = func.new_int_const_opnd(6);
        assert!(func.opnds_equal(a, b));
        assert!(!func.opnds_equal(a, c));

        let s1 = func.syms.new_sym();
        let s2 = func.syms.new_sym();
        let sa = func.new_sym_opnd(s1);
        let sb = func.new_sym_opnd(s1);
        let sc = func.new_sym_opnd(s2);
        assert!(func.opnds_equal(sa, sb));
        assert!(!func.opnds_equal(sa, sc));
        assert!(!func.opnds_equal(a, sa));
    }

    #[test]
    fn test_indir_owns_components() {
        let mut func = Func::new();
        let base_sym = func.syms.new_sym();
        let base = func.new_reg_opnd(base_sym);
        let indir = func.new_indir_opnd(base, None, 16, 1);

        // The base is claimed by the indir.
        assert!(func.opnd(base).is_in_use());

        // Copying duplicates the component.
        let copy = func.copy_opnd(indir);
        assert!(func.opnds_equal(indir, copy));

        // Freeing the indir frees the base too.
        func.free_opnd(indir);
        assert!(!func.opnds.is_live(base));
    }

    #[test]
    fn test_clone_def_rebinds_symbol() {
        let mut func = Func::new();
        let sym = func.syms.new_sym();
        func.syms.sym_mut(sym).value_type = ValueType::Int32;
        let opnd = func.new_reg_opnd(sym);

        let mut cloner = Cloner::new();
        let def_clone = func.clone_opnd_def(opnd, &mut cloner);
        let new_sym = func.opnd(def_clone).sym_id().unwrap();
        assert_ne!(new_sym, sym);
        // Derived facts preserved.
        assert_eq!(func.syms.sym(new_sym).value_type, ValueType::Int32);

        // A later use of the same symbol picks up the remap.
        let use_opnd = func.new_reg_opnd(sym);
        let use_clone = func.clone_opnd_use(use_opnd, &mut cloner);
        assert_eq!(func.opnd(use_clone).sym_id(), Some(new_sym));
    }

    #[test]
    fn test_clone_use_without_def_keeps_symbol() {
        let mut func = Func::new();
        let sym = func.syms.new_sym();
        let opnd = func.new_sym_opnd(sym);

        let mut cloner = Cloner::new();
        let clone = func.clone_opnd_use(opnd, &mut cloner);
        assert_eq!(func.opnd(clone).sym_id(), Some(sym));
    }
}
