//! Tests for the IR builder, display, and verifier.

use crate::builder::ProgramBuilder;
use crate::instruction::{Instruction, Opcode, Operand};
use crate::program::BlockKind;
use crate::reg::{self, PhysReg, RegClass};
use crate::verifier;

#[test]
fn covered_range_spans_class_size() {
    let r = reg::covered_range(PhysReg(4), RegClass::S2);
    assert_eq!(r, 4..6);

    let sub = reg::covered_range(PhysReg::vgpr(0), RegClass::vector_bytes(2));
    assert_eq!(sub, 256..257);
    assert!(RegClass::vector_bytes(2).is_subdword());
    assert!(!RegClass::V1.is_subdword());
}

#[test]
fn physreg_names() {
    assert_eq!(PhysReg(3).to_string(), "s3");
    assert_eq!(PhysReg::vgpr(7).to_string(), "v7");
    assert_eq!(reg::SCC.to_string(), "scc");
    assert_eq!(reg::EXEC_LO.to_string(), "exec_lo");
}

#[test]
fn build_and_display_block() {
    let mut b = ProgramBuilder::new();
    let mask = b.def(PhysReg(4), RegClass::S2);
    let flag = b.def(reg::SCC, RegClass::S1);
    let exec = b.def(reg::EXEC_LO, RegClass::S2);
    b.push(
        Instruction::new(Opcode::SAnd)
            .with_defs([mask, flag])
            .with_operands([Operand::of_def(&exec), Operand::constant(1)]),
    );
    b.push(
        Instruction::new(Opcode::SCBranchZ).with_operands([Operand::of_def(&flag)]),
    );
    let program = b.finish();

    let text = program.blocks[0].instructions[0].to_string();
    assert_eq!(text, "%0:s4, %1:scc = s_and %2:exec_lo, 1");
    let br = program.blocks[0].instructions[1].to_string();
    assert_eq!(br, "s_cbranch_z %1:scc");
}

#[test]
fn display_modifiers() {
    let mut b = ProgramBuilder::new();
    let src = b.def(PhysReg::vgpr(1), RegClass::V1);
    let dst = b.def(PhysReg::vgpr(0), RegClass::V1);
    b.push(
        Instruction::new(Opcode::VMov)
            .with_defs([dst])
            .with_operands([Operand::of_def(&src).with_neg().with_abs()]),
    );
    let program = b.finish();
    assert_eq!(
        program.blocks[0].instructions[0].to_string(),
        "%1:v0 = v_mov -|%0:v1|"
    );
}

#[test]
fn verify_accepts_well_formed_program() {
    let mut b = ProgramBuilder::new();
    let body = b.create_block(BlockKind::Plain);
    b.link_linear(0, body);
    let v = b.def(PhysReg::vgpr(0), RegClass::V1);
    b.push(
        Instruction::new(Opcode::VMov)
            .with_defs([v])
            .with_operands([Operand::constant(0)]),
    );
    let program = b.finish();
    assert!(verifier::verify(&program).is_empty());
}

#[test]
fn verify_rejects_bank_mismatch() {
    let mut b = ProgramBuilder::new();
    // Scalar class placed in the vector bank.
    let bad = b.def(PhysReg::vgpr(0), RegClass::S1);
    b.push(
        Instruction::new(Opcode::SMov)
            .with_defs([bad])
            .with_operands([Operand::constant(0)]),
    );
    let program = b.finish();
    let errors = verifier::verify(&program);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("register bank"));
}

#[test]
fn verify_rejects_asymmetric_edge() {
    let mut b = ProgramBuilder::new();
    let other = b.create_block(BlockKind::Plain);
    let mut program = b.finish();
    program.blocks[0].linear_succs.push(other);
    let errors = verifier::verify(&program);
    assert!(errors
        .iter()
        .any(|e| e.to_string().contains("no matching pred entry")));
}

#[test]
fn verify_rejects_misplaced_branch() {
    let mut b = ProgramBuilder::new();
    b.push(Instruction::new(Opcode::SBranch));
    let v = b.def(PhysReg::vgpr(0), RegClass::V1);
    b.push(
        Instruction::new(Opcode::VMov)
            .with_defs([v])
            .with_operands([Operand::constant(0)]),
    );
    let program = b.finish();
    let errors = verifier::verify(&program);
    assert!(errors
        .iter()
        .any(|e| e.to_string().contains("not the last instruction")));
}

#[test]
fn side_effect_classification() {
    let store = Instruction::new(Opcode::BufferStore);
    assert!(store.has_side_effects());
    let add = Instruction::new(Opcode::VAdd);
    assert!(!add.has_side_effects());
    assert!(add.is_valu());
    let wait = Instruction::new(Opcode::SWaitcnt);
    assert!(wait.has_side_effects());
    assert!(Instruction::new(Opcode::SLoad).accesses_memory());
}
