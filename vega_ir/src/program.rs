//! Program and basic-block containers.
//!
//! Blocks keep two predecessor/successor index lists: linear edges follow
//! machine-code control flow only, logical edges additionally account for
//! divergent execution. The post-RA passes only consult linear edges; the
//! logical lists are carried through for the encoder and debug output.

use crate::instruction::Instruction;

/// Structural role of a block in the CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockKind {
    #[default]
    Plain,
    LoopHeader,
    LoopBody,
    LoopExit,
}

/// A basic block: an ordered, owned sequence of instructions plus CFG edges.
#[derive(Debug, Default)]
pub struct Block {
    pub index: u32,
    pub kind: BlockKind,
    pub instructions: Vec<Instruction>,
    pub linear_preds: Vec<u32>,
    pub linear_succs: Vec<u32>,
    pub logical_preds: Vec<u32>,
    pub logical_succs: Vec<u32>,
}

impl Block {
    pub fn new(index: u32, kind: BlockKind) -> Block {
        Block {
            index,
            kind,
            ..Block::default()
        }
    }
}

/// A shader program after register allocation.
#[derive(Debug, Default)]
pub struct Program {
    pub blocks: Vec<Block>,
    /// Upper bound on temp ids; sizes the external use-count table.
    pub temp_count: u32,
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    /// Total instruction count across all blocks.
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }
}
