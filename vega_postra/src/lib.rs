//! Post-register-allocation passes for the vega shader backend.
//!
//! Two passes run after physical registers are assigned and before binary
//! encoding:
//!
//! - [`optimize`]: a forward peephole pass over each block applying local
//!   rewrites (branch-condition fusion, compare elimination, modifier
//!   folding, backward copy propagation), followed by a program-wide
//!   dead-code sweep.
//! - [`schedule`]: a per-block list scheduler that builds a dependency DAG
//!   per region between hardware barriers and reorders instructions by a
//!   latency/critical-path heuristic.
//!
//! Both passes mutate the [`vega_ir::Program`] in place and keep all state
//! per invocation, so distinct programs can be compiled on distinct
//! threads.

pub mod optimizer;
pub mod reg_track;
pub mod sched;


pub use optimizer::optimize;
pub use sched::{schedule, LatencyModel};

use vega_ir::{OperandKind, Program, Temp};

/// Remaining-use counts per temp, supplied by upstream liveness analysis
/// and adjusted in place by the optimizer.
///
/// Counts never go negative while a temp is still referenced; a decrement
/// below zero is a pass bug and aborts compilation.
#[derive(Debug, Clone)]
pub struct UseCounts {
    counts: Vec<u16>,
}

impl UseCounts {
    /// All-zero table sized for `temp_count` temps.
    pub fn new(temp_count: u32) -> UseCounts {
        UseCounts {
            counts: vec![0; temp_count as usize],
        }
    }

    /// Count every operand reference in the program.
    pub fn count(program: &Program) -> UseCounts {
        let mut uses = UseCounts::new(program.temp_count);
        for block in &program.blocks {
            for instr in &block.instructions {
                for op in &instr.operands {
                    if let OperandKind::Reg { temp, .. } = op.kind {
                        uses.inc(temp);
                    }
                }
            }
        }
        uses
    }

    pub fn get(&self, temp: Temp) -> u16 {
        self.counts[temp.index()]
    }

    pub fn inc(&mut self, temp: Temp) {
        self.counts[temp.index()] += 1;
    }

    pub fn dec(&mut self, temp: Temp) {
        let c = &mut self.counts[temp.index()];
        assert!(*c > 0, "use-count underflow for {temp}");
        *c -= 1;
    }
}
