//! Builder API for constructing post-RA programs.
//!
//! Used by tests and by the lowering stage upstream of the post-RA passes.
//! Temps are handed out sequentially; `finish` records the allocation
//! bound on the program.

use crate::instruction::{Definition, Instruction};
use crate::program::{Block, BlockKind, Program};
use crate::reg::{PhysReg, RegClass, Temp};

/// Builder for a [`Program`].
pub struct ProgramBuilder {
    program: Program,
    current_block: usize,
    next_temp: u32,
}

impl ProgramBuilder {
    /// Start a program with a single plain entry block.
    pub fn new() -> ProgramBuilder {
        let mut program = Program::new();
        program.blocks.push(Block::new(0, BlockKind::Plain));
        ProgramBuilder {
            program,
            current_block: 0,
            next_temp: 0,
        }
    }

    /// Append a new block and return its index.
    pub fn create_block(&mut self, kind: BlockKind) -> u32 {
        let index = self.program.blocks.len() as u32;
        self.program.blocks.push(Block::new(index, kind));
        index
    }

    /// Direct subsequent pushes to `block`.
    pub fn switch_to_block(&mut self, block: u32) {
        assert!(
            (block as usize) < self.program.blocks.len(),
            "switch_to_block: no block {block}"
        );
        self.current_block = block as usize;
    }

    /// Add a linear CFG edge (and keep pred/succ lists symmetric).
    pub fn link_linear(&mut self, from: u32, to: u32) {
        self.program.blocks[from as usize].linear_succs.push(to);
        self.program.blocks[to as usize].linear_preds.push(from);
    }

    /// Add a logical (divergence-aware) CFG edge.
    pub fn link_logical(&mut self, from: u32, to: u32) {
        self.program.blocks[from as usize].logical_succs.push(to);
        self.program.blocks[to as usize].logical_preds.push(from);
    }

    /// Allocate a fresh temp.
    pub fn new_temp(&mut self) -> Temp {
        let t = Temp(self.next_temp);
        self.next_temp += 1;
        t
    }

    /// Definition of a fresh temp at a fixed register.
    pub fn def(&mut self, reg: PhysReg, rc: RegClass) -> Definition {
        Definition::new(self.new_temp(), reg, rc)
    }

    /// Append an instruction to the current block.
    pub fn push(&mut self, instruction: Instruction) {
        self.program.blocks[self.current_block]
            .instructions
            .push(instruction);
    }

    pub fn finish(mut self) -> Program {
        self.program.temp_count = self.next_temp;
        self.program
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        ProgramBuilder::new()
    }
}
