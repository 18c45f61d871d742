//! The opcode catalog consumed by the IR.
//!
//! The IR never branches on the internals of an opcode, only on the
//! attribute queries below (`is_real`, `has_side_effects`, `is_branch`,
//! ...). The set is closed; lowering replaces these mid-level opcodes with
//! machine-oriented ones outside this crate.

// =============================================================================
// Opcode
// =============================================================================

/// Mid-level opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    // Markers. Not "real" instructions: traversal helpers skip them.
    /// Branch target.
    Label,
    /// Statement boundary pragma for source mapping.
    StatementBoundary,
    /// Auxiliary liveness marker for bailout reconstruction.
    ByteCodeUses,
    /// No operation.
    Nop,

    // Frame boundaries.
    /// Function prologue anchor.
    FunctionEntry,
    /// Function epilogue anchor.
    FunctionExit,

    // Moves and arithmetic.
    /// Copy a value.
    Ld,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Shl,
    /// Arithmetic shift right.
    Shr,
    /// Logical shift right.
    ShrU,
    And,
    Or,
    Xor,
    Not,

    // Object model.
    LdField,
    StField,
    LdElem,
    StElem,
    NewObject,

    // Speculation guards.
    /// Assert a value has the expected type, else bail out.
    GuardType,
    /// Checked tagged-to-int conversion.
    GuardInt,

    // Calls.
    /// Open an argument frame for a call.
    StartCall,
    /// Produce one outgoing argument.
    ArgOut,
    Call,
    Ret,
    Throw,

    // Bailout anchor created when a record's ownership is shared.
    BailTarget,

    // Branches.
    /// Unconditional branch.
    Br,
    BrTrue,
    BrFalse,
    BrEq,
    BrNeq,
    BrLt,
    BrNotLt,
    BrLe,
    BrNotLe,
    BrGt,
    BrNotGt,
    BrGe,
    BrNotGe,
    /// Branch if loosely equal to `undefined`.
    BrOnUndef,
    /// Branch if not loosely equal to `undefined`.
    BrOnNotUndef,
    /// Jump table / string dictionary switch.
    MultiBr,
}

impl Opcode {
    /// Check if this is a real instruction, as opposed to a marker that
    /// carries no semantics of its own (labels, pragmas, liveness notes).
    #[inline]
    pub const fn is_real(self) -> bool {
        !matches!(
            self,
            Opcode::Label | Opcode::StatementBoundary | Opcode::ByteCodeUses | Opcode::Nop
        )
    }

    /// Check if this opcode is any branch form.
    #[inline]
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Br
                | Opcode::BrTrue
                | Opcode::BrFalse
                | Opcode::BrEq
                | Opcode::BrNeq
                | Opcode::BrLt
                | Opcode::BrNotLt
                | Opcode::BrLe
                | Opcode::BrNotLe
                | Opcode::BrGt
                | Opcode::BrNotGt
                | Opcode::BrGe
                | Opcode::BrNotGe
                | Opcode::BrOnUndef
                | Opcode::BrOnNotUndef
                | Opcode::MultiBr
        )
    }

    /// Check if this is a conditional (fall-through-or-jump) branch.
    #[inline]
    pub const fn is_conditional_branch(self) -> bool {
        self.is_branch() && !matches!(self, Opcode::Br | Opcode::MultiBr)
    }

    /// Check if this opcode observably affects state beyond its dst.
    #[inline]
    pub const fn has_side_effects(self) -> bool {
        matches!(
            self,
            Opcode::StField
                | Opcode::StElem
                | Opcode::NewObject
                | Opcode::StartCall
                | Opcode::ArgOut
                | Opcode::Call
                | Opcode::Ret
                | Opcode::Throw
        )
    }

    /// Check if this opcode is a call.
    #[inline]
    pub const fn is_call(self) -> bool {
        matches!(self, Opcode::Call)
    }

    /// Check if the profiler records per-site data for this opcode, i.e.
    /// whether a profiled instruction variant exists for it.
    #[inline]
    pub const fn has_profiled_form(self) -> bool {
        matches!(
            self,
            Opcode::Call
                | Opcode::LdField
                | Opcode::StField
                | Opcode::LdElem
                | Opcode::StElem
                | Opcode::Div
        )
    }

    /// The logical negation of a conditional branch, or `None` when no
    /// inversion is defined.
    ///
    /// `BrOnUndef`/`BrOnNotUndef` are deliberately excluded: they test
    /// loose equality against `undefined`, and loose-equals coercion means
    /// neither opcode is the exact truth-table complement of the other, so
    /// swapping them would branch to the wrong target.
    pub const fn inverted(self) -> Option<Opcode> {
        match self {
            Opcode::BrTrue => Some(Opcode::BrFalse),
            Opcode::BrFalse => Some(Opcode::BrTrue),
            Opcode::BrEq => Some(Opcode::BrNeq),
            Opcode::BrNeq => Some(Opcode::BrEq),
            Opcode::BrLt => Some(Opcode::BrNotLt),
            Opcode::BrNotLt => Some(Opcode::BrLt),
            Opcode::BrLe => Some(Opcode::BrNotLe),
            Opcode::BrNotLe => Some(Opcode::BrLe),
            Opcode::BrGt => Some(Opcode::BrNotGt),
            Opcode::BrNotGt => Some(Opcode::BrGt),
            Opcode::BrGe => Some(Opcode::BrNotGe),
            Opcode::BrNotGe => Some(Opcode::BrGe),
            _ => None,
        }
    }

    /// Short mnemonic for dumps.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Label => "Label",
            Opcode::StatementBoundary => "Statement",
            Opcode::ByteCodeUses => "ByteCodeUses",
            Opcode::Nop => "Nop",
            Opcode::FunctionEntry => "FunctionEntry",
            Opcode::FunctionExit => "FunctionExit",
            Opcode::Ld => "Ld",
            Opcode::Add => "Add",
            Opcode::Sub => "Sub",
            Opcode::Mul => "Mul",
            Opcode::Div => "Div",
            Opcode::Rem => "Rem",
            Opcode::Neg => "Neg",
            Opcode::Shl => "Shl",
            Opcode::Shr => "Shr",
            Opcode::ShrU => "ShrU",
            Opcode::And => "And",
            Opcode::Or => "Or",
            Opcode::Xor => "Xor",
            Opcode::Not => "Not",
            Opcode::LdField => "LdField",
            Opcode::StField => "StField",
            Opcode::LdElem => "LdElem",
            Opcode::StElem => "StElem",
            Opcode::NewObject => "NewObject",
            Opcode::GuardType => "GuardType",
            Opcode::GuardInt => "GuardInt",
            Opcode::StartCall => "StartCall",
            Opcode::ArgOut => "ArgOut",
            Opcode::Call => "Call",
            Opcode::Ret => "Ret",
            Opcode::Throw => "Throw",
            Opcode::BailTarget => "BailTarget",
            Opcode::Br => "Br",
            Opcode::BrTrue => "BrTrue",
            Opcode::BrFalse => "BrFalse",
            Opcode::BrEq => "BrEq",
            Opcode::BrNeq => "BrNeq",
            Opcode::BrLt => "BrLt",
            Opcode::BrNotLt => "BrNotLt",
            Opcode::BrLe => "BrLe",
            Opcode::BrNotLe => "BrNotLe",
            Opcode::BrGt => "BrGt",
            Opcode::BrNotGt => "BrNotGt",
            Opcode::BrGe => "BrGe",
            Opcode::BrNotGe => "BrNotGe",
            Opcode::BrOnUndef => "BrOnUndef",
            Opcode::BrOnNotUndef => "BrOnNotUndef",
            Opcode::MultiBr => "MultiBr",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// =============================================================================
// Tests
// =============================================================================
