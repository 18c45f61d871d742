//! Bailout kinds: why optimized execution must abort.
//!
//! A kind is a primary reason plus an orthogonal set of modifier bits.
//! The numeric layout is private; only the algebra is API: read the
//! reason, test/add/strip modifiers, map a kind to its equivalent-check
//! variant. Lazy bailout is one such modifier with its own predicates:
//! it can decorate any primary reason and be cleared independently.

// =============================================================================
// Reason
// =============================================================================

/// The primary reason a bailout fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BailOutReason {
    /// No primary reason (modifier-only kinds).
    None = 0,
    /// Integer arithmetic overflowed the speculative representation.
    IntOverflow = 1,
    /// A value speculated as int was not an int.
    ExpectedInt = 2,
    /// A value speculated as number was not a number.
    ExpectedNumber = 3,
    /// A monomorphic type check failed.
    MonoTypeCheck = 4,
    /// An equivalent-set type check failed.
    EquivalentTypeCheck = 5,
    /// A type check failed after the fast path already ran.
    FailedTypeCheck = 6,
    /// An equivalent-set check failed after the fast path already ran.
    FailedEquivalentTypeCheck = 7,
    /// A helper made an unexpected implicit call.
    ImplicitCall = 8,
    /// No profile data exists for the speculated site.
    NoProfile = 9,
    /// An exception is in flight and must unwind interpreted frames.
    ExceptionInFlight = 10,
}

impl BailOutReason {
    const fn from_code(code: u8) -> BailOutReason {
        match code {
            0 => BailOutReason::None,
            1 => BailOutReason::IntOverflow,
            2 => BailOutReason::ExpectedInt,
            3 => BailOutReason::ExpectedNumber,
            4 => BailOutReason::MonoTypeCheck,
            5 => BailOutReason::EquivalentTypeCheck,
            6 => BailOutReason::FailedTypeCheck,
            7 => BailOutReason::FailedEquivalentTypeCheck,
            8 => BailOutReason::ImplicitCall,
            9 => BailOutReason::NoProfile,
            10 => BailOutReason::ExceptionInFlight,
            _ => panic!("invalid bailout reason code"),
        }
    }

    /// Human-readable description.
    pub const fn description(self) -> &'static str {
        match self {
            BailOutReason::None => "no reason",
            BailOutReason::IntOverflow => "integer overflow",
            BailOutReason::ExpectedInt => "expected an integer",
            BailOutReason::ExpectedNumber => "expected a number",
            BailOutReason::MonoTypeCheck => "type check failed",
            BailOutReason::EquivalentTypeCheck => "equivalent type check failed",
            BailOutReason::FailedTypeCheck => "late type check failed",
            BailOutReason::FailedEquivalentTypeCheck => "late equivalent type check failed",
            BailOutReason::ImplicitCall => "unexpected implicit call",
            BailOutReason::NoProfile => "no profile data",
            BailOutReason::ExceptionInFlight => "exception in flight",
        }
    }
}

// =============================================================================
// Modifiers
// =============================================================================

bitflags::bitflags! {
    /// Orthogonal bailout modifiers. Bits below 8 are reserved for the
    /// reason code.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BailOutModifiers: u32 {
        /// Deferred bailout: the site bails out lazily, after the current
        /// operation completes.
        const LAZY = 1 << 8;
        /// Temp-object marking must run during reconstruction.
        const MARK_TEMP_OBJECT = 1 << 9;
        /// Also bail out when the operation makes an implicit call.
        const ON_IMPLICIT_CALLS = 1 << 10;
        /// A property guard this site relies on was invalidated.
        const INVALIDATED_GUARD = 1 << 11;
        /// Also bail out on a thrown exception.
        const ON_EXCEPTION = 1 << 12;
    }
}

// =============================================================================
// Kind
// =============================================================================

const REASON_MASK: u32 = 0xFF;

/// A composed bailout kind: primary reason plus modifier bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BailOutKind(u32);

impl BailOutKind {
    /// The empty kind.
    pub const NONE: BailOutKind = BailOutKind(0);

    /// A kind with the given reason and no modifiers.
    pub const fn new(reason: BailOutReason) -> Self {
        BailOutKind(reason as u32)
    }

    /// A kind composed of a reason and modifiers.
    pub const fn with_parts(reason: BailOutReason, modifiers: BailOutModifiers) -> Self {
        BailOutKind(reason as u32 | modifiers.bits())
    }

    /// The primary reason.
    pub const fn reason(self) -> BailOutReason {
        BailOutReason::from_code((self.0 & REASON_MASK) as u8)
    }

    /// The modifier bits.
    pub const fn modifiers(self) -> BailOutModifiers {
        BailOutModifiers::from_bits_truncate(self.0 & !REASON_MASK)
    }

    /// Check for a modifier.
    pub const fn has_modifier(self, m: BailOutModifiers) -> bool {
        self.0 & m.bits() != 0
    }

    /// This kind plus a modifier.
    pub const fn with_modifier(self, m: BailOutModifiers) -> Self {
        BailOutKind(self.0 | m.bits())
    }

    /// This kind minus a modifier.
    pub const fn without_modifier(self, m: BailOutModifiers) -> Self {
        BailOutKind(self.0 & !m.bits())
    }

    /// The bare reason, all modifiers stripped.
    pub const fn without_modifiers(self) -> Self {
        BailOutKind(self.0 & REASON_MASK)
    }

    /// Check for the lazy modifier.
    pub const fn is_lazy(self) -> bool {
        self.has_modifier(BailOutModifiers::LAZY)
    }

    /// Check whether lazy is the *only* content of this kind: no primary
    /// reason and no other modifier. Clearing lazy from such a kind drops
    /// the whole bailout.
    pub const fn is_lazy_only(self) -> bool {
        self.0 == BailOutModifiers::LAZY.bits()
    }

    /// Map a monomorphic check kind to its equivalent-set variant,
    /// preserving modifiers. Other kinds map to themselves.
    pub const fn equivalent_variant(self) -> Self {
        let reason = match self.reason() {
            BailOutReason::MonoTypeCheck => BailOutReason::EquivalentTypeCheck,
            BailOutReason::FailedTypeCheck => BailOutReason::FailedEquivalentTypeCheck,
            other => other,
        };
        BailOutKind(reason as u32 | (self.0 & !REASON_MASK))
    }
}

impl std::fmt::Debug for BailOutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.reason())?;
        let mods = self.modifiers();
        if !mods.is_empty() {
            write!(f, "+{mods:?}")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for BailOutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason().description())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_round_trip() {
        let kind = BailOutKind::new(BailOutReason::IntOverflow);
        assert_eq!(kind.reason(), BailOutReason::IntOverflow);
        assert!(kind.modifiers().is_empty());
    }

    #[test]
    fn test_modifier_algebra() {
        let kind = BailOutKind::new(BailOutReason::MonoTypeCheck)
            .with_modifier(BailOutModifiers::ON_IMPLICIT_CALLS)
            .with_modifier(BailOutModifiers::LAZY);

        assert!(kind.has_modifier(BailOutModifiers::LAZY));
        assert!(kind.has_modifier(BailOutModifiers::ON_IMPLICIT_CALLS));
        assert!(!kind.has_modifier(BailOutModifiers::ON_EXCEPTION));
        assert_eq!(kind.reason(), BailOutReason::MonoTypeCheck);

        let stripped = kind.without_modifier(BailOutModifiers::LAZY);
        assert!(!stripped.is_lazy());
        assert!(stripped.has_modifier(BailOutModifiers::ON_IMPLICIT_CALLS));

        assert_eq!(
            kind.without_modifiers(),
            BailOutKind::new(BailOutReason::MonoTypeCheck)
        );
    }

    #[test]
    fn test_lazy_only() {
        let lazy = BailOutKind::NONE.with_modifier(BailOutModifiers::LAZY);
        assert!(lazy.is_lazy_only());

        let decorated = BailOutKind::new(BailOutReason::IntOverflow)
            .with_modifier(BailOutModifiers::LAZY);
        assert!(decorated.is_lazy());
        assert!(!decorated.is_lazy_only());
    }

    #[test]
    fn test_equivalent_variant_preserves_modifiers() {
        let kind = BailOutKind::new(BailOutReason::MonoTypeCheck)
            .with_modifier(BailOutModifiers::MARK_TEMP_OBJECT);
        let equiv = kind.equivalent_variant();
        assert_eq!(equiv.reason(), BailOutReason::EquivalentTypeCheck);
        assert!(equiv.has_modifier(BailOutModifiers::MARK_TEMP_OBJECT));

        let failed = BailOutKind::new(BailOutReason::FailedTypeCheck).equivalent_variant();
        assert_eq!(failed.reason(), BailOutReason::FailedEquivalentTypeCheck);

        let other = BailOutKind::new(BailOutReason::NoProfile);
        assert_eq!(other.equivalent_variant(), other);
    }
}
