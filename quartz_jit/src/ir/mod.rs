//! The mid-level IR: instruction lists, operands, and control-flow linkage.
//!
//! A front end builds one [`Func`](func::Func) per compiled function.
//! Optimization passes rewrite the instruction list in place, the lowering
//! pass rewrites it again into a machine-oriented form, and the encoder
//! consumes the final list. Everything an instruction owns (operands,
//! bailout records, symbols) lives in per-function arenas and dies with
//! the function's compilation.

pub mod arena;
pub mod args;
pub mod branch;
pub mod cloner;
pub mod fold;
pub mod func;
pub mod instr;
pub mod opcode;
pub mod opnd;
pub mod print;
pub mod sym;
pub mod types;

pub use arena::{Arena, BitSet, Id};
pub use cloner::Cloner;
pub use func::{FreeOutcome, Func};
pub use instr::{Instr, InstrId, InstrKind};
pub use opcode::Opcode;
pub use opnd::{Opnd, OpndId};
pub use sym::{StackSym, SymId, SymTable};
pub use types::ValueType;
