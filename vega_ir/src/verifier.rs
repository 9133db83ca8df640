//! Structural checks for post-RA programs.
//!
//! Collects all errors rather than stopping at the first one. The passes
//! assume verified input; malformed programs are a lowering bug, so this
//! runs under debug builds and in tests.

use std::fmt;

use crate::instruction::{Format, Instruction, OperandKind};
use crate::program::Program;
use crate::reg::{PhysReg, RegClass, RegKind, MAX_REG, VGPR_BASE};

/// Location context for a verification error.
#[derive(Debug, Clone)]
pub enum Location {
    Block(u32),
    Instruction(u32, u32),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Block(b) => write!(f, "BB{b}"),
            Location::Instruction(b, i) => write!(f, "BB{b}, inst {i}"),
        }
    }
}

/// A single verification error.
#[derive(Debug, Clone)]
pub struct VerifyError {
    pub location: Location,
    pub message: String,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.location, self.message)
    }
}

/// Verify a whole program. Empty result means the program is well-formed.
pub fn verify(program: &Program) -> Vec<VerifyError> {
    let mut errors = Vec::new();
    let block_count = program.blocks.len() as u32;

    for (pos, block) in program.blocks.iter().enumerate() {
        let bi = block.index;
        if bi != pos as u32 {
            errors.push(VerifyError {
                location: Location::Block(bi),
                message: format!("block index {bi} does not match position {pos}"),
            });
        }

        for (name, list) in [
            ("linear_preds", &block.linear_preds),
            ("linear_succs", &block.linear_succs),
            ("logical_preds", &block.logical_preds),
            ("logical_succs", &block.logical_succs),
        ] {
            for &other in list {
                if other >= block_count {
                    errors.push(VerifyError {
                        location: Location::Block(bi),
                        message: format!("{name} references nonexistent block {other}"),
                    });
                }
            }
        }

        for (ii, instr) in block.instructions.iter().enumerate() {
            let loc = Location::Instruction(bi, ii as u32);
            check_instruction(program, instr, &loc, &mut errors);

            if instr.format() == Format::Branch && ii + 1 != block.instructions.len() {
                errors.push(VerifyError {
                    location: loc,
                    message: format!("{} is not the last instruction in its block", instr.opcode.name()),
                });
            }
        }
    }

    check_edge_symmetry(program, &mut errors);
    errors
}

fn check_instruction(
    program: &Program,
    instr: &Instruction,
    loc: &Location,
    errors: &mut Vec<VerifyError>,
) {
    for def in &instr.definitions {
        if def.temp.0 >= program.temp_count {
            errors.push(VerifyError {
                location: loc.clone(),
                message: format!("definition temp {} out of range", def.temp),
            });
        }
        check_assignment(def.reg, def.rc, "definition", loc, errors);
    }
    for op in &instr.operands {
        if let OperandKind::Reg { temp, reg, rc } = op.kind {
            if temp.0 >= program.temp_count {
                errors.push(VerifyError {
                    location: loc.clone(),
                    message: format!("operand temp {temp} out of range"),
                });
            }
            check_assignment(reg, rc, "operand", loc, errors);
        }
        if (op.neg || op.abs) && instr.format() != Format::VectorAlu {
            errors.push(VerifyError {
                location: loc.clone(),
                message: "input modifiers on a non-VALU instruction".to_string(),
            });
        }
    }
}

fn check_assignment(
    reg: PhysReg,
    rc: RegClass,
    what: &str,
    loc: &Location,
    errors: &mut Vec<VerifyError>,
) {
    let start = reg.index();
    let end = start + rc.dwords() as usize;
    let in_bank = match rc.kind {
        RegKind::Scalar => reg.is_scalar() && end <= VGPR_BASE as usize,
        RegKind::Vector => reg.is_vector() && end <= MAX_REG,
    };
    if !in_bank {
        errors.push(VerifyError {
            location: loc.clone(),
            message: format!("{what} {rc} at {reg} does not fit its register bank"),
        });
    }
    if rc.is_subdword() && rc.kind == RegKind::Scalar {
        errors.push(VerifyError {
            location: loc.clone(),
            message: format!("{what} has a subdword scalar class {rc}"),
        });
    }
}

fn check_edge_symmetry(program: &Program, errors: &mut Vec<VerifyError>) {
    for block in &program.blocks {
        for &succ in &block.linear_succs {
            let Some(other) = program.blocks.get(succ as usize) else {
                continue;
            };
            if !other.linear_preds.contains(&block.index) {
                errors.push(VerifyError {
                    location: Location::Block(block.index),
                    message: format!("linear edge BB{} -> BB{succ} has no matching pred entry", block.index),
                });
            }
        }
        for &succ in &block.logical_succs {
            let Some(other) = program.blocks.get(succ as usize) else {
                continue;
            };
            if !other.logical_preds.contains(&block.index) {
                errors.push(VerifyError {
                    location: Location::Block(block.index),
                    message: format!("logical edge BB{} -> BB{succ} has no matching pred entry", block.index),
                });
            }
        }
    }
}
