//! Bailout (deoptimization) records and their ownership protocol.
//!
//! Speculatively-optimized code must be able to detect a violated
//! assumption and unwind to the interpreter at a precise, reconstructible
//! point. A [`BailOutInfo`](info::BailOutInfo) describes one such point:
//! the bytecode offset to resume at, the values the interpreter needs to
//! rebuild its frame, and a [`BailOutKind`](kind::BailOutKind) recording
//! why execution had to abort.

pub mod bytecode_uses;
pub mod info;
pub mod kind;

pub use bytecode_uses::ByteCodeUsesPayload;
pub use info::{BailOutAttachment, BailOutInfo, BailOutInfoId, CapturedValues, ConstValue};
pub use kind::{BailOutKind, BailOutModifiers, BailOutReason};
