//! Non-normative textual dump of a function's IR.
//!
//! Renders a disassembly-like listing for debugging; nothing downstream
//! parses this output.

use std::fmt::Write as _;

use super::func::Func;
use super::instr::{InstrId, InstrPayload, NO_BYTE_CODE_OFFSET};
use super::opnd::{OpndData, OpndId};

impl Func {
    /// Render the whole instruction list.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for id in self.iter() {
            self.dump_instr_into(&mut out, id);
        }
        out
    }

    fn dump_instr_into(&self, out: &mut String, id: InstrId) {
        let instr = self.instr(id);

        if instr.is_label() {
            let _ = write!(out, "$L{}:", id.index());
            if instr.as_label().is_loop_top {
                let _ = write!(out, " ; loop top");
            }
            out.push('\n');
            return;
        }

        if instr.number != 0 {
            let _ = write!(out, "{:>5}: ", instr.number);
        } else {
            out.push_str("       ");
        }
        let _ = write!(out, "{:<14}", instr.opcode.mnemonic());

        if let Some(dst) = instr.dst() {
            let _ = write!(out, "{} = ", self.fmt_opnd(dst));
        }
        let srcs: Vec<String> = [instr.src1(), instr.src2()]
            .into_iter()
            .flatten()
            .map(|src| self.fmt_opnd(src))
            .collect();
        out.push_str(&srcs.join(", "));

        if instr.is_branch() {
            if let Some(target) = self.branch_target(id) {
                let _ = write!(out, " -> $L{}", target.index());
            }
        }

        if let InstrPayload::ByteCodeUses(uses) = instr.payload_ref() {
            let syms: Vec<String> = uses.iter().map(|s| format!("s{s}")).collect();
            let _ = write!(out, "[{}]", syms.join(", "));
        }

        if instr.byte_code_offset != NO_BYTE_CODE_OFFSET {
            let _ = write!(out, " @{}", instr.byte_code_offset);
        }

        if let Some(att) = instr.bail_out_attachment() {
            let info = self.bail_out_info(att.info);
            if instr.has_bail_out() {
                let _ = write!(out, " Bailout: {:?} -> {}", att.kind, info.bail_out_offset);
            } else {
                let _ = write!(out, " AuxBailout: {:?} -> {}", att.aux_kind, info.bail_out_offset);
            }
            if info.shared {
                out.push_str(" (shared)");
            }
        }

        out.push('\n');
    }

    fn fmt_opnd(&self, id: OpndId) -> String {
        let opnd = self.opnd(id);
        match &opnd.data {
            OpndData::IntConst(v) => format!("{v}"),
            OpndData::FloatConst(v) => format!("{v:?}"),
            OpndData::Sym(sym) => format!("s{}.{}", sym.index(), opnd.value_type),
            OpndData::Reg { sym, reg } => {
                if reg.is_assigned() {
                    format!("s{}(r{}).{}", sym.index(), reg.0, opnd.value_type)
                } else {
                    format!("s{}.{}", sym.index(), opnd.value_type)
                }
            }
            OpndData::Indir {
                base,
                index,
                offset,
                scale,
            } => {
                let mut text = format!("[{}", self.fmt_opnd(*base));
                if let Some(index) = index {
                    let _ = write!(text, "+{}*{scale}", self.fmt_opnd(*index));
                }
                if *offset != 0 {
                    let _ = write!(text, "{offset:+}");
                }
                text.push(']');
                text
            }
            OpndData::Addr { addr, .. } => format!("0x{addr:X}"),
            OpndData::MemRef(addr) => format!("[0x{addr:X}]"),
            OpndData::Label(label) => format!("$L{}", label.index()),
            OpndData::List(elems) => {
                let parts: Vec<String> = elems.iter().map(|&e| self.fmt_opnd(e)).collect();
                format!("({})", parts.join(", "))
            }
        }
    }
}

impl std::fmt::Display for Func {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dump())
    }
}

// =============================================================================
// Tests
// =============================================================================
