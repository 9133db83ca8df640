//! Text format for post-RA programs.
//!
//! Output format:
//! ```text
//! BB0: plain
//!   %0:s0, %1:scc = s_and %2:s4, %3:exec_lo
//!   s_cbranch_z %1:scc
//! ```

use std::fmt;

use crate::instruction::{Instruction, Operand, OperandKind, Semantics};
use crate::program::{Block, BlockKind, Program};

fn fmt_operand(op: &Operand, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if op.neg {
        f.write_str("-")?;
    }
    if op.abs {
        f.write_str("|")?;
    }
    match op.kind {
        OperandKind::Reg { temp, reg, .. } => write!(f, "{temp}:{reg}")?,
        OperandKind::Const(v) => write!(f, "{v}")?,
        OperandKind::Undef => f.write_str("undef")?,
    }
    if op.abs {
        f.write_str("|")?;
    }
    Ok(())
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, def) in self.definitions.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", def.temp, def.reg)?;
        }
        if !self.definitions.is_empty() {
            f.write_str(" = ")?;
        }
        f.write_str(self.opcode.name())?;
        for (i, op) in self.operands.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            fmt_operand(op, f)?;
        }
        if !self.sync.storage.is_empty() {
            write!(f, " sync({})", self.sync.semantics)?;
        }
        Ok(())
    }
}

fn block_kind_name(kind: BlockKind) -> &'static str {
    match kind {
        BlockKind::Plain => "plain",
        BlockKind::LoopHeader => "loop_header",
        BlockKind::LoopBody => "loop_body",
        BlockKind::LoopExit => "loop_exit",
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BB{}: {}", self.index, block_kind_name(self.kind))?;
        if !self.linear_preds.is_empty() {
            write!(f, " preds:")?;
            for p in &self.linear_preds {
                write!(f, " BB{p}")?;
            }
        }
        writeln!(f)?;
        for instr in &self.instructions {
            writeln!(f, "  {instr}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        Ok(())
    }
}
