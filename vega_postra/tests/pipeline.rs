//! End-to-end runs of the post-RA pipeline: optimize, then schedule, on
//! multi-block programs.

use std::collections::HashSet;

use vega_ir::builder::ProgramBuilder;
use vega_ir::reg::{covered_range, EXEC_LO, SCC, VCC_LO};
use vega_ir::{
    verifier, Block, BlockKind, Instruction, Opcode, Operand, OperandKind, PhysReg, Program,
    RegClass, Temp, MAX_REG,
};
use vega_postra::{optimize, schedule, LatencyModel, UseCounts};

/// Every register operand must still see the value its temp was given:
/// no reader may run before its in-block writer, and no slot it reads may
/// have been overwritten by a different temp in the meantime.
fn assert_reads_see_their_writes(block: &Block) {
    let defined: HashSet<Temp> = block
        .instructions
        .iter()
        .flat_map(|i| i.definitions.iter().map(|d| d.temp))
        .collect();
    let mut seen: HashSet<Temp> = HashSet::new();
    let mut owner: Vec<Option<Temp>> = vec![None; MAX_REG];

    for (pos, instr) in block.instructions.iter().enumerate() {
        for op in &instr.operands {
            if let OperandKind::Reg { temp, reg, rc } = op.kind {
                assert!(
                    !defined.contains(&temp) || seen.contains(&temp),
                    "BB{}: instr {pos} reads {temp} before its definition",
                    block.index
                );
                for slot in covered_range(reg, rc) {
                    if let Some(o) = owner[slot] {
                        assert_eq!(
                            o, temp,
                            "BB{}: instr {pos} reads {temp} from a slot overwritten by {o}",
                            block.index
                        );
                    }
                }
            }
        }
        for def in &instr.definitions {
            seen.insert(def.temp);
            for slot in covered_range(def.reg, def.rc) {
                owner[slot] = Some(def.temp);
            }
        }
    }
}

fn sorted_lines(block: &Block) -> Vec<String> {
    let mut lines: Vec<String> = block.instructions.iter().map(|i| i.to_string()).collect();
    lines.sort();
    lines
}

/// Diamond-shaped program: a masked branch in the entry block, a memory
/// block on one path, and a shared exit.
fn build_diamond() -> Program {
    let mut b = ProgramBuilder::new();
    let body = b.create_block(BlockKind::Plain);
    let exit = b.create_block(BlockKind::Plain);
    b.link_linear(0, body);
    b.link_linear(0, exit);
    b.link_linear(body, exit);

    let x = b.new_temp();
    let y = b.new_temp();
    let mask = b.def(VCC_LO, RegClass::S2);
    b.push(
        Instruction::new(Opcode::VCmpLt)
            .with_defs([mask])
            .with_operands([
                Operand::reg(x, PhysReg::vgpr(0), RegClass::V1),
                Operand::reg(y, PhysReg::vgpr(1), RegClass::V1),
            ]),
    );
    let dst = b.def(PhysReg(4), RegClass::S2);
    let flag = b.def(SCC, RegClass::S1);
    let exec = b.new_temp();
    b.push(
        Instruction::new(Opcode::SAnd)
            .with_defs([dst, flag])
            .with_operands([
                Operand::of_def(&mask),
                Operand::reg(exec, EXEC_LO, RegClass::S2),
            ]),
    );
    b.push(Instruction::new(Opcode::SCBranchZ).with_operands([Operand::of_def(&flag)]));

    b.switch_to_block(body);
    let addr = b.new_temp();
    let loaded = b.def(PhysReg::vgpr(2), RegClass::V1);
    b.push(
        Instruction::new(Opcode::BufferLoad)
            .with_defs([loaded])
            .with_operands([Operand::reg(addr, PhysReg::vgpr(3), RegClass::V1)]),
    );
    let c = b.new_temp();
    let other = b.def(PhysReg::vgpr(4), RegClass::V1);
    b.push(
        Instruction::new(Opcode::VAdd)
            .with_defs([other])
            .with_operands([Operand::reg(c, PhysReg::vgpr(5), RegClass::V1)]),
    );
    let sum = b.def(PhysReg::vgpr(6), RegClass::V1);
    b.push(
        Instruction::new(Opcode::VMul)
            .with_defs([sum])
            .with_operands([Operand::of_def(&loaded), Operand::of_def(&other)]),
    );
    b.push(Instruction::new(Opcode::Exp).with_operands([Operand::of_def(&sum)]));
    b.push(Instruction::new(Opcode::SBranch));

    b.switch_to_block(exit);
    b.push(Instruction::new(Opcode::SEndpgm));
    b.finish()
}

#[test]
fn pipeline_produces_a_valid_program() {
    let mut program = build_diamond();
    let mut uses = UseCounts::count(&program);

    optimize(&mut program, &mut uses);
    schedule(&mut program, &LatencyModel::default());

    let errors = verifier::verify(&program);
    assert!(errors.is_empty(), "verifier errors: {errors:?}");

    // The entry block lost the AND and branches on the mask directly.
    let entry = &program.blocks[0];
    assert_eq!(entry.instructions.len(), 2);
    assert_eq!(
        entry.instructions[1].operands[0].physreg(),
        Some(VCC_LO)
    );

    // The memory block keeps its count, ends in the branch, and issues the
    // load before the independent add.
    let body = &program.blocks[1];
    let ops: Vec<Opcode> = body.instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(
        ops,
        vec![
            Opcode::BufferLoad,
            Opcode::VAdd,
            Opcode::VMul,
            Opcode::Exp,
            Opcode::SBranch
        ]
    );
}

#[test]
fn scheduling_twice_is_a_fixed_point() {
    let mut program = build_diamond();
    let mut uses = UseCounts::count(&program);
    optimize(&mut program, &mut uses);

    let model = LatencyModel::default();
    schedule(&mut program, &model);
    let once = program.to_string();
    schedule(&mut program, &model);
    assert_eq!(program.to_string(), once);
}

#[test]
fn copy_propagation_survives_scheduling() {
    let mut b = ProgramBuilder::new();
    let a = b.new_temp();
    let t0 = b.def(PhysReg::vgpr(0), RegClass::V1);
    b.push(
        Instruction::new(Opcode::VAdd)
            .with_defs([t0])
            .with_operands([Operand::reg(a, PhysReg::vgpr(1), RegClass::V1)]),
    );
    let t1 = b.def(PhysReg::vgpr(3), RegClass::V1);
    b.push(
        Instruction::new(Opcode::ParallelCopy)
            .with_defs([t1])
            .with_operands([Operand::of_def(&t0)]),
    );
    b.push(Instruction::new(Opcode::Exp).with_operands([Operand::of_def(&t1)]));
    let mut program = b.finish();
    let mut uses = UseCounts::count(&program);

    optimize(&mut program, &mut uses);
    schedule(&mut program, &LatencyModel::default());

    // The producer now writes v3, and the export still reads it after the
    // write.
    let block = &program.blocks[0];
    assert_eq!(block.instructions.len(), 2);
    assert_eq!(block.instructions[0].definitions[0].reg, PhysReg::vgpr(3));
    assert_eq!(block.instructions[1].opcode, Opcode::Exp);
    assert!(verifier::verify(&program).is_empty());
}

#[test]
fn passes_never_break_writer_reader_order() {
    let mut program = build_diamond();
    let mut uses = UseCounts::count(&program);

    optimize(&mut program, &mut uses);
    for block in &program.blocks {
        assert_reads_see_their_writes(block);
    }
    schedule(&mut program, &LatencyModel::default());
    for block in &program.blocks {
        assert_reads_see_their_writes(block);
    }
}

#[test]
fn schedule_only_permutes_each_block() {
    let mut program = build_diamond();
    let before: Vec<Vec<String>> = program.blocks.iter().map(sorted_lines).collect();

    schedule(&mut program, &LatencyModel::default());

    let after: Vec<Vec<String>> = program.blocks.iter().map(sorted_lines).collect();
    assert_eq!(after, before);
}

#[test]
fn optimizer_removals_are_justified_by_use_counts() {
    let mut program = build_diamond();
    let before: Vec<Vec<Instruction>> = program
        .blocks
        .iter()
        .map(|b| b.instructions.clone())
        .collect();
    let mut uses = UseCounts::count(&program);

    optimize(&mut program, &mut uses);

    // The shrinkage per block must equal the number of pre-pass
    // instructions whose definitions all ended with zero remaining uses.
    for (block, pre) in program.blocks.iter().zip(&before) {
        let removable = pre
            .iter()
            .filter(|i| {
                !i.definitions.is_empty()
                    && !i.has_side_effects()
                    && i.definitions.iter().all(|d| uses.get(d.temp) == 0)
            })
            .count();
        assert_eq!(pre.len() - block.instructions.len(), removable);
    }
}

#[test]
fn shuffle_copy_pipeline_keeps_reads_valid() {
    // Multi-pair shuffle through the full pipeline: one pair of the copy
    // folds into its producer, the other must stay put because its source
    // is the first pair's destination.
    let mut b = ProgramBuilder::new();
    let t5 = b.def(PhysReg(5), RegClass::S1);
    b.push(
        Instruction::new(Opcode::SMov)
            .with_defs([t5])
            .with_operands([Operand::constant(7)]),
    );
    let a = b.new_temp();
    let t0 = b.def(PhysReg(0), RegClass::S1);
    b.push(
        Instruction::new(Opcode::SAdd)
            .with_defs([t0])
            .with_operands([
                Operand::reg(a, PhysReg(1), RegClass::S1),
                Operand::constant(1),
            ]),
    );
    let t1 = b.def(PhysReg(5), RegClass::S1);
    let t9 = b.def(PhysReg(9), RegClass::S1);
    b.push(
        Instruction::new(Opcode::ParallelCopy)
            .with_defs([t1, t9])
            .with_operands([Operand::of_def(&t0), Operand::of_def(&t5)]),
    );
    b.push(
        Instruction::new(Opcode::Exp)
            .with_operands([Operand::of_def(&t1), Operand::of_def(&t9)]),
    );
    let mut program = b.finish();
    let mut uses = UseCounts::count(&program);

    optimize(&mut program, &mut uses);
    schedule(&mut program, &LatencyModel::default());

    for block in &program.blocks {
        assert_reads_see_their_writes(block);
    }
    assert!(verifier::verify(&program).is_empty());
}

#[test]
fn optimizer_keeps_verifier_clean_across_blocks() {
    let mut program = build_diamond();
    let before = program.instruction_count();
    let mut uses = UseCounts::count(&program);

    optimize(&mut program, &mut uses);

    assert!(verifier::verify(&program).is_empty());
    // Only the fused AND was removed.
    assert_eq!(program.instruction_count(), before - 1);
}
