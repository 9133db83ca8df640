//! vega_ir: post-register-allocation machine IR for the vega shader backend.
//!
//! Everything here describes a program after physical registers have been
//! assigned: operands and definitions carry a fixed `PhysReg` alongside the
//! `Temp` identity that upstream liveness still tracks. The IR is consumed
//! by the post-RA passes in `vega_postra` and then by the binary encoder.

pub mod builder;
pub mod display;
pub mod instruction;
pub mod program;
pub mod reg;
pub mod verifier;

#[cfg(test)]
mod tests;

pub use instruction::{
    Definition, Format, Instruction, MemSync, Opcode, Operand, OperandKind, Semantics,
    StorageClass, StorageSet,
};
pub use program::{Block, BlockKind, Program};
pub use reg::{PhysReg, RegClass, RegKind, Temp, MAX_REG};
