//! The call-argument chain collaborator interface.
//!
//! Call arity accounting and outgoing-argument layout belong to the
//! calling-convention layer, not the IR. The IR exposes only the linkage:
//! each instruction's `arg_link` field threads a call to its
//! argument-producing instructions, and this trait lets convention code
//! walk that chain without the IR re-deriving any convention arithmetic.

use super::func::Func;
use super::instr::InstrId;
use super::opcode::Opcode;

/// Walks the argument-producing instructions of a call, in order.
pub trait ArgChain {
    /// The argument instructions of `call`, first argument first.
    fn arg_instrs(&self, func: &Func, call: InstrId) -> Vec<InstrId>;
}

/// The default chain walker: follows `arg_link` from the call through its
/// `ArgOut`s to the opening `StartCall`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkedArgChain;

impl ArgChain for LinkedArgChain {
    fn arg_instrs(&self, func: &Func, call: InstrId) -> Vec<InstrId> {
        assert!(
            func.instr(call).opcode.is_call(),
            "argument chain walk starts at a call"
        );
        let mut args = Vec::new();
        let mut cur = func.instr(call).arg_link;
        while let Some(id) = cur {
            match func.instr(id).opcode {
                Opcode::ArgOut => {
                    args.push(id);
                    cur = func.instr(id).arg_link;
                }
                Opcode::StartCall => break,
                other => panic!("unexpected {other} in argument chain"),
            }
        }
        // The chain links last argument first.
        args.reverse();
        args
    }
}

// =============================================================================
// Tests
// =============================================================================
