//! Post-RA peephole optimizer.
//!
//! One forward pass per block. Each instruction is matched against four
//! local rewrite rules; every rule is best-effort and silently skipped
//! when a precondition fails, since none of them is required for
//! correctness. Surviving instructions then update the register tracker.
//! A final program-wide sweep removes deleted and dead instructions.
//!
//! Use-count bookkeeping is part of each rule's contract:
//!
//! - branch-condition fusion decrements the fused flag temp;
//! - compare elimination moves one use from the compare's flag to the
//!   producer's flag;
//! - modifier folding moves one use from the mover's def to its source;
//! - backward copy propagation zeroes the copied source temp.

use std::ops::Range;

use rustc_hash::FxHashMap;

use vega_ir::reg::{covered_range, EXEC_HI, EXEC_LO, M0, SCC};
use vega_ir::{
    Definition, Format, Instruction, Opcode, Operand, OperandKind, PhysReg, Program, RegClass,
    Temp,
};

use crate::reg_track::{Idx, RegisterTracker};
use crate::UseCounts;

/// A compare-against-zero whose operand came from a flag-setting ALU
/// instruction; consumers of the compare's flag can splice through.
#[derive(Debug, Clone, Copy)]
struct CompareLabel {
    /// Position of the compare itself.
    compare: Idx,
    /// The producer's flag definition the consumer can read instead.
    flag_def: Definition,
    /// Whether the compare inverted the flag (eq-zero test).
    flip: bool,
}

struct OptContext<'a> {
    uses: &'a mut UseCounts,
    tracker: RegisterTracker,
    /// Labels keyed by the compare's flag temp; valid within one block.
    compares: FxHashMap<Temp, CompareLabel>,
    block: u32,
    instr: u32,
}

/// Run the peephole optimizer over `program`, adjusting `uses` in place.
pub fn optimize(program: &mut Program, uses: &mut UseCounts) {
    let mut ctx = OptContext {
        uses,
        tracker: RegisterTracker::new(program.blocks.len()),
        compares: FxHashMap::default(),
        block: 0,
        instr: 0,
    };

    for b in 0..program.blocks.len() {
        ctx.block = b as u32;
        ctx.compares.clear();
        ctx.tracker.reset(&program.blocks[b]);

        for i in 0..program.blocks[b].instructions.len() {
            ctx.instr = i as u32;
            let _ = try_fuse_branch_condition(&mut ctx, program)
                || try_eliminate_compare(&mut ctx, program)
                || try_fold_mov_modifiers(&mut ctx, program)
                || try_propagate_copy_backwards(&mut ctx, program);

            let instr = &program.blocks[b].instructions[i];
            ctx.tracker.save_reads(instr);
            ctx.tracker.save_writes(b as u32, i as u32, instr);
        }
    }

    cleanup(program, ctx.uses);
}

/// Whether `writer` may have changed its range after `since`.
/// Untrackable sentinels (other than "written before this block") count
/// as clobbered.
fn clobbered_since(writer: Idx, since: Idx) -> bool {
    match writer {
        Idx::Real { .. } => writer.is_after(since),
        Idx::NotWrittenInBlock => false,
        _ => true,
    }
}

fn same_block(idx: Idx, block: u32) -> bool {
    matches!(idx, Idx::Real { block: b, .. } if b == block)
}

fn ranges_overlap(a: Range<usize>, b: Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Condition fusion: a branch testing a flag that was produced by
/// `s_and mask, exec` branches on `mask` directly when neither `mask` nor
/// exec changed since the AND.
fn try_fuse_branch_condition(ctx: &mut OptContext, program: &mut Program) -> bool {
    let b = ctx.block as usize;
    let i = ctx.instr as usize;
    let instr = &program.blocks[b].instructions[i];

    if !matches!(instr.opcode, Opcode::SCBranchZ | Opcode::SCBranchNZ) {
        return false;
    }
    if instr.operands.len() != 1 {
        return false;
    }
    let flag_op = instr.operands[0];
    if flag_op.physreg() != Some(SCC) {
        return false;
    }
    let Some(flag_temp) = flag_op.temp() else {
        return false;
    };

    let and_idx = ctx.tracker.last_writer(&flag_op);
    if !same_block(and_idx, ctx.block) {
        return false;
    }
    let Some(and_instr) = ctx.tracker.instr_of(program, and_idx) else {
        return false;
    };
    if and_instr.opcode != Opcode::SAnd
        || and_instr.operands.len() != 2
        || and_instr.definitions.len() != 2
    {
        return false;
    }
    // The branch must be reading the AND's flag definition.
    let scc_def = and_instr.definitions[1];
    if scc_def.temp != flag_temp || scc_def.reg != SCC {
        return false;
    }

    let mask = and_instr.operands[0];
    let exec_op = and_instr.operands[1];
    if exec_op.physreg() != Some(EXEC_LO) {
        return false;
    }
    let Some(mask_reg) = mask.physreg() else {
        return false;
    };
    let mask_rc = mask.rc().expect("register operand has a class");

    if clobbered_since(ctx.tracker.last_writer_range(EXEC_LO, RegClass::S2), and_idx) {
        return false;
    }
    if clobbered_since(ctx.tracker.last_writer_range(mask_reg, mask_rc), and_idx) {
        return false;
    }

    program.blocks[b].instructions[i].operands[0] = mask;
    ctx.uses.dec(flag_temp);
    true
}

/// ALU opcodes whose second definition is a "result != 0" flag.
fn writes_nonzero_flag(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::SAnd | Opcode::SOr | Opcode::SXor | Opcode::SAndn2 | Opcode::SLshl | Opcode::SLshr
    )
}

/// Compare elimination, forward-only: compares against zero are labeled
/// when their operand's producer already set an equivalent flag, and the
/// branch/select consuming the compare's flag splices through to the
/// producer's flag (flipping sense for eq-zero tests). The compare is left
/// for the dead-code sweep.
fn try_eliminate_compare(ctx: &mut OptContext, program: &mut Program) -> bool {
    label_zero_compare(ctx, program);
    splice_compare_consumer(ctx, program)
}

fn label_zero_compare(ctx: &mut OptContext, program: &Program) {
    let instr = &program.blocks[ctx.block as usize].instructions[ctx.instr as usize];
    if !matches!(instr.opcode, Opcode::SCmpEq | Opcode::SCmpLg) {
        return;
    }
    if instr.definitions.len() != 1 || instr.definitions[0].reg != SCC {
        return;
    }
    if instr.operands.len() != 2 {
        return;
    }

    // One side must be the constant zero, the other a register.
    let (x, k) = (instr.operands[0], instr.operands[1]);
    let x = if k.constant_value() == Some(0) && x.temp().is_some() {
        x
    } else if x.constant_value() == Some(0) && k.temp().is_some() {
        k
    } else {
        return;
    };

    let w_idx = ctx.tracker.last_writer(&x);
    if !same_block(w_idx, ctx.block) {
        return;
    }
    let Some(producer) = ctx.tracker.instr_of(program, w_idx) else {
        return;
    };
    if !writes_nonzero_flag(producer.opcode) || producer.definitions.len() != 2 {
        return;
    }
    let flag_def = producer.definitions[1];
    if flag_def.reg != SCC {
        return;
    }
    let value_def = producer.definitions[0];
    if Some(value_def.temp) != x.temp() || Some(value_def.reg) != x.physreg() {
        return;
    }
    // The producer's flag must still be live in scc right before this
    // compare overwrites it.
    if ctx.tracker.last_writer_range(SCC, RegClass::S1) != w_idx {
        return;
    }

    ctx.compares.insert(
        instr.definitions[0].temp,
        CompareLabel {
            compare: Idx::real(ctx.block, ctx.instr),
            flag_def,
            flip: instr.opcode == Opcode::SCmpEq,
        },
    );
}

fn splice_compare_consumer(ctx: &mut OptContext, program: &mut Program) -> bool {
    let b = ctx.block as usize;
    let i = ctx.instr as usize;
    let instr = &program.blocks[b].instructions[i];

    let op_index = match instr.opcode {
        Opcode::SCBranchZ | Opcode::SCBranchNZ if instr.operands.len() == 1 => 0,
        Opcode::SCSelect if instr.operands.len() == 3 => 2,
        _ => return false,
    };
    let flag_op = instr.operands[op_index];
    if flag_op.physreg() != Some(SCC) {
        return false;
    }
    let Some(flag_temp) = flag_op.temp() else {
        return false;
    };
    let Some(label) = ctx.compares.get(&flag_temp).copied() else {
        return false;
    };
    // The compare's flag must have no other consumer, and must still be
    // the live scc value.
    if ctx.uses.get(flag_temp) != 1 {
        return false;
    }
    if ctx.tracker.last_writer_range(SCC, RegClass::S1) != label.compare {
        return false;
    }

    let instr = &mut program.blocks[b].instructions[i];
    instr.operands[op_index] =
        Operand::reg(label.flag_def.temp, label.flag_def.reg, label.flag_def.rc);
    if label.flip {
        match instr.opcode {
            Opcode::SCBranchZ => instr.opcode = Opcode::SCBranchNZ,
            Opcode::SCBranchNZ => instr.opcode = Opcode::SCBranchZ,
            Opcode::SCSelect => instr.operands.swap(0, 1),
            _ => unreachable!("consumer checked above"),
        }
    }
    ctx.uses.dec(flag_temp);
    ctx.uses.inc(label.flag_def.temp);
    true
}

/// VALU opcodes that accept neg/abs input modifiers.
fn supports_input_mods(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::VAdd
            | Opcode::VSub
            | Opcode::VMul
            | Opcode::VMin
            | Opcode::VMax
            | Opcode::VFma
            | Opcode::VCmpEq
            | Opcode::VCmpLt
    )
}

/// Operand fusion: a VALU operand fed by a single-use `v_mov` with input
/// modifiers reads the mover's source directly, composing the modifiers.
fn try_fold_mov_modifiers(ctx: &mut OptContext, program: &mut Program) -> bool {
    let b = ctx.block as usize;
    let i = ctx.instr as usize;

    {
        let instr = &program.blocks[b].instructions[i];
        if instr.format() != Format::VectorAlu || !supports_input_mods(instr.opcode) {
            return false;
        }
    }

    let mut changed = false;
    for oi in 0..program.blocks[b].instructions[i].operands.len() {
        let op = program.blocks[b].instructions[i].operands[oi];
        let Some(temp) = op.temp() else {
            continue;
        };
        if ctx.uses.get(temp) != 1 {
            continue;
        }

        let mov_idx = ctx.tracker.last_writer(&op);
        if !same_block(mov_idx, ctx.block) {
            continue;
        }
        let Some(mov) = ctx.tracker.instr_of(program, mov_idx) else {
            continue;
        };
        if mov.opcode != Opcode::VMov || mov.operands.len() != 1 || mov.definitions.len() != 1 {
            continue;
        }
        let mov_def = mov.definitions[0];
        if mov_def.temp != temp || Some(mov_def.reg) != op.physreg() {
            continue;
        }
        let src = mov.operands[0];
        if !(src.neg || src.abs) {
            continue;
        }
        let Some(src_reg) = src.physreg() else {
            continue;
        };
        let src_rc = src.rc().expect("register operand has a class");
        // A self-clobbering mover destroyed its own source; the source
        // range must also survive untouched up to the consumer.
        if ranges_overlap(
            covered_range(mov_def.reg, mov_def.rc),
            covered_range(src_reg, src_rc),
        ) {
            continue;
        }
        if clobbered_since(ctx.tracker.last_writer_range(src_reg, src_rc), mov_idx) {
            continue;
        }

        // The consumer's own modifiers apply after the mover's: abs
        // swallows an inner negate.
        let (neg, abs) = if op.abs {
            (op.neg, true)
        } else {
            (op.neg ^ src.neg, src.abs)
        };
        let mut folded = src;
        folded.neg = neg;
        folded.abs = abs;
        program.blocks[b].instructions[i].operands[oi] = folded;

        ctx.uses.dec(temp);
        if let Some(src_temp) = src.temp() {
            ctx.uses.inc(src_temp);
        }
        changed = true;
    }
    changed
}

/// Register slots the copy-propagation rule must never retarget.
fn is_reserved(reg: PhysReg, rc: RegClass) -> bool {
    covered_range(reg, rc).any(|r| {
        r == M0.index() || r == EXEC_LO.index() || r == EXEC_HI.index() || r == SCC.index()
    })
}

/// Backward copy propagation: for a parallel-copy pair `dst <- src` where
/// `src` has no other use and neither register is touched in between, the
/// producer of `src` writes `dst` directly and the pair is dropped.
fn try_propagate_copy_backwards(ctx: &mut OptContext, program: &mut Program) -> bool {
    let b = ctx.block as usize;
    let i = ctx.instr as usize;

    {
        let instr = &program.blocks[b].instructions[i];
        if instr.opcode != Opcode::ParallelCopy
            || instr.operands.len() != instr.definitions.len()
        {
            return false;
        }
    }

    let mut changed = false;
    let mut pair = 0;
    while pair < program.blocks[b].instructions[i].definitions.len() {
        if propagate_copy_pair(ctx, program, pair) {
            // Pair removed; the next one shifted into this slot.
            changed = true;
        } else {
            pair += 1;
        }
    }
    changed
}

fn propagate_copy_pair(ctx: &mut OptContext, program: &mut Program, pair: usize) -> bool {
    let b = ctx.block as usize;
    let i = ctx.instr as usize;
    let instr = &program.blocks[b].instructions[i];

    let src = instr.operands[pair];
    let dst = instr.definitions[pair];
    let OperandKind::Reg {
        temp: src_temp,
        reg: src_reg,
        rc,
    } = src.kind
    else {
        return false;
    };
    if src.neg || src.abs || rc != dst.rc || rc.is_subdword() {
        return false;
    }
    if ctx.uses.get(src_temp) != 1 {
        return false;
    }
    if is_reserved(dst.reg, rc) {
        return false;
    }

    // Sibling pairs of the same copy read their sources at the copy's
    // position, which the tracker has not recorded yet. None of them may
    // overlap the destination this pair would start writing at the
    // producer.
    for (other, sibling) in instr.operands.iter().enumerate() {
        if other == pair {
            continue;
        }
        if let (Some(reg), Some(orc)) = (sibling.physreg(), sibling.rc()) {
            if ranges_overlap(covered_range(reg, orc), covered_range(dst.reg, dst.rc)) {
                return false;
            }
        }
    }

    let p_idx = ctx.tracker.last_writer_range(src_reg, rc);
    let Idx::Real {
        block: pb,
        instr: pi,
    } = p_idx
    else {
        return false;
    };
    if pb != ctx.block {
        return false;
    }
    let producer = &program.blocks[pb as usize].instructions[pi as usize];
    if matches!(
        producer.opcode,
        Opcode::Phi | Opcode::LinearPhi | Opcode::StartProgram
    ) {
        return false;
    }
    let Some(dp) = producer
        .definitions
        .iter()
        .position(|d| d.temp == src_temp && d.reg == src_reg && d.rc == rc)
    else {
        return false;
    };

    // No read of src since the producer wrote it (the copy's own read is
    // recorded after the rules run), and dst untouched since before the
    // producer.
    if ctx.tracker.was_read(src_reg, rc) {
        return false;
    }
    let dst_writer = ctx.tracker.last_writer_range(dst.reg, rc);
    match dst_writer {
        Idx::NotWrittenInBlock => {}
        Idx::Real { .. } if dst_writer != p_idx && !dst_writer.is_after(p_idx) => {}
        _ => return false,
    }
    if ctx.tracker.was_read(dst.reg, rc) {
        return false;
    }

    program.blocks[pb as usize].instructions[pi as usize].definitions[dp] =
        Definition::new(dst.temp, dst.reg, rc);
    let instr = &mut program.blocks[b].instructions[i];
    instr.operands.remove(pair);
    instr.definitions.remove(pair);
    ctx.uses.dec(src_temp);

    // Keep the block view consistent: dst is now written by the producer,
    // and src's last writer is no longer known.
    ctx.tracker.set_writer_range(dst.reg, rc, p_idx);
    ctx.tracker.set_writer_range(src_reg, rc, Idx::WrittenByMultiple);
    true
}

fn is_dead(uses: &UseCounts, instr: &Instruction) -> bool {
    if instr.opcode == Opcode::ParallelCopy && instr.definitions.is_empty() {
        return true;
    }
    if instr.definitions.is_empty() || instr.has_side_effects() {
        return false;
    }
    instr.definitions.iter().all(|d| uses.get(d.temp) == 0)
}

/// Program-wide sweep removing emptied parallel-copies and instructions
/// whose every definition has no remaining use.
fn cleanup(program: &mut Program, uses: &UseCounts) {
    for block in &mut program.blocks {
        block.instructions.retain(|instr| !is_dead(uses, instr));
    }
}
