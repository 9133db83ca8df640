//! Register-use tracking for the peephole optimizer.
//!
//! For every block the tracker records, per flat register slot, which
//! instruction last wrote it and whether it has been read since. Writer
//! references are tagged [`Idx`] values so sentinel states (not written in
//! this block, clobbered by a subdword write, disagreeing range) never
//! collide with real instruction positions.
//!
//! Per-block writer state is retained so that resetting for a new block
//! can merge the states of its linear predecessors. Read bits are
//! block-local and reset at block entry: callers must anchor every
//! [`RegisterTracker::was_read`] query at a same-block `Idx::Real` writer
//! (copy propagation does), never at a `NotWrittenInBlock` sentinel,
//! because reads in predecessor blocks are not represented.

use vega_ir::reg::covered_range;
use vega_ir::{Block, BlockKind, Instruction, Operand, OperandKind, PhysReg, Program, RegClass, MAX_REG};

/// Reference to the instruction that last wrote a register, or a sentinel
/// describing why no single writer is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idx {
    Real { block: u32, instr: u32 },
    /// No write seen in this block (the value flows in from outside).
    NotWrittenInBlock,
    /// A subdword definition touched the slot; partial overlaps are not
    /// modeled, so the slot is untrackable.
    ClobberedBySubdword,
    /// The queried operand was a constant or undefined.
    ConstOrUndef,
    /// The queried range has more than one distinct writer.
    WrittenByMultiple,
}

impl Idx {
    pub fn real(block: u32, instr: u32) -> Idx {
        Idx::Real { block, instr }
    }

    pub fn is_real(self) -> bool {
        matches!(self, Idx::Real { .. })
    }

    /// Program-order comparison: any real position is after
    /// `NotWrittenInBlock`; two real positions compare lexicographically.
    /// Sentinels are never "after" anything.
    pub fn is_after(self, other: Idx) -> bool {
        match (self, other) {
            (Idx::Real { .. }, Idx::NotWrittenInBlock) => true,
            (
                Idx::Real { block: a, instr: ai },
                Idx::Real { block: b, instr: bi },
            ) => (a, ai) > (b, bi),
            _ => false,
        }
    }
}

/// 512-bit "read since last write" set.
#[derive(Clone)]
struct ReadSet([u64; MAX_REG / 64]);

impl ReadSet {
    fn new() -> ReadSet {
        ReadSet([0; MAX_REG / 64])
    }

    fn set(&mut self, i: usize) {
        self.0[i / 64] |= 1 << (i % 64);
    }

    fn clear(&mut self, i: usize) {
        self.0[i / 64] &= !(1 << (i % 64));
    }

    fn get(&self, i: usize) -> bool {
        self.0[i / 64] & (1 << (i % 64)) != 0
    }

    fn clear_all(&mut self) {
        self.0 = [0; MAX_REG / 64];
    }
}

struct BlockState {
    writer: Box<[Idx; MAX_REG]>,
    read: ReadSet,
}

impl BlockState {
    fn new() -> BlockState {
        BlockState {
            writer: Box::new([Idx::NotWrittenInBlock; MAX_REG]),
            read: ReadSet::new(),
        }
    }
}

/// Per-block last-writer / read-since-write tracking over the flat
/// register file.
pub struct RegisterTracker {
    blocks: Vec<BlockState>,
    current: usize,
}

impl RegisterTracker {
    pub fn new(block_count: usize) -> RegisterTracker {
        RegisterTracker {
            blocks: (0..block_count).map(|_| BlockState::new()).collect(),
            current: 0,
        }
    }

    /// Initialize tracking for `block`.
    ///
    /// Loop headers and blocks without predecessors start conservative
    /// (`NotWrittenInBlock` everywhere, back-edge writers are not visible
    /// yet); otherwise each register inherits the writer all linear
    /// predecessors agree on. Read bits always start cleared.
    pub fn reset(&mut self, block: &Block) {
        self.current = block.index as usize;

        if block.kind == BlockKind::LoopHeader || block.linear_preds.is_empty() {
            let state = &mut self.blocks[self.current];
            state.writer.fill(Idx::NotWrittenInBlock);
            state.read.clear_all();
            return;
        }

        // Linear predecessors of a non-header block always precede it, so a
        // split at the current index gives us the predecessor states.
        let (before, rest) = self.blocks.split_at_mut(self.current);
        let state = &mut rest[0];
        let preds = &block.linear_preds;
        for &p in preds {
            assert!(
                (p as usize) < before.len(),
                "linear pred BB{p} does not precede BB{}",
                block.index
            );
        }

        let first = &before[preds[0] as usize];
        state.writer.copy_from_slice(&first.writer[..]);
        for &p in &preds[1..] {
            let other = &before[p as usize];
            for r in 0..MAX_REG {
                if state.writer[r] != other.writer[r] {
                    state.writer[r] = Idx::NotWrittenInBlock;
                }
            }
        }
        state.read.clear_all();
    }

    /// Record the definitions of the instruction at `(block, instr)`.
    pub fn save_writes(&mut self, block: u32, instr: u32, instruction: &Instruction) {
        let state = &mut self.blocks[self.current];
        for def in &instruction.definitions {
            let value = if def.rc.is_subdword() {
                Idx::ClobberedBySubdword
            } else {
                Idx::real(block, instr)
            };
            for r in covered_range(def.reg, def.rc) {
                state.writer[r] = value;
                state.read.clear(r);
            }
        }
    }

    /// Mark every register operand of `instruction` as read.
    pub fn save_reads(&mut self, instruction: &Instruction) {
        let state = &mut self.blocks[self.current];
        for op in &instruction.operands {
            if let OperandKind::Reg { reg, rc, .. } = op.kind {
                for r in covered_range(reg, rc) {
                    state.read.set(r);
                }
            }
        }
    }

    /// Last writer of an operand's register range. Constants and undefined
    /// operands report `ConstOrUndef`.
    pub fn last_writer(&self, op: &Operand) -> Idx {
        match op.kind {
            OperandKind::Reg { reg, rc, .. } => self.last_writer_range(reg, rc),
            _ => Idx::ConstOrUndef,
        }
    }

    /// Last writer of a raw register range; disagreeing slots report
    /// `WrittenByMultiple`.
    pub fn last_writer_range(&self, reg: PhysReg, rc: RegClass) -> Idx {
        let state = &self.blocks[self.current];
        let mut range = covered_range(reg, rc);
        let first = range.next().expect("register class covers at least one slot");
        let idx = state.writer[first];
        for r in range {
            if state.writer[r] != idx {
                return Idx::WrittenByMultiple;
            }
        }
        idx
    }

    /// Whether any slot of the range has been read since its last write.
    ///
    /// Only meaningful for windows anchored at a same-block `Idx::Real`
    /// writer; read bits reset at block entry, so predecessor reads are
    /// invisible here.
    pub fn was_read(&self, reg: PhysReg, rc: RegClass) -> bool {
        let state = &self.blocks[self.current];
        covered_range(reg, rc).any(|r| state.read.get(r))
    }

    /// Overwrite the tracked writer for a range, clearing its read bits.
    /// Rules that move a definition use this to keep the block view
    /// consistent (or to poison a range with `WrittenByMultiple`).
    pub fn set_writer_range(&mut self, reg: PhysReg, rc: RegClass, idx: Idx) {
        let state = &mut self.blocks[self.current];
        for r in covered_range(reg, rc) {
            state.writer[r] = idx;
            state.read.clear(r);
        }
    }

    /// Resolve a real `Idx` to its instruction.
    pub fn instr_of<'a>(&self, program: &'a Program, idx: Idx) -> Option<&'a Instruction> {
        match idx {
            Idx::Real { block, instr } => program
                .blocks
                .get(block as usize)
                .and_then(|b| b.instructions.get(instr as usize)),
            _ => None,
        }
    }
}
