//! Post-RA list scheduler.
//!
//! Blocks are cut into regions at instructions that must not move (waits,
//! barriers, branches, control pseudos). Within a region a dependency DAG
//! is built over the physical registers and memory-sync state, node
//! priorities are back-propagated along the critical path, and
//! instructions are emitted greedily by earliest adjusted start cycle.
//!
//! Memory nodes additionally carry an accumulated load latency so that
//! chains of dependent loads are issued as early as possible.

use std::collections::BTreeSet;
use std::mem;

use rustc_hash::FxHashMap;

use vega_ir::reg::{covered_range, exec_range};
use vega_ir::{
    Block, Format, Instruction, Opcode, Program, Semantics, StorageClass, MAX_REG,
};

/// Issue-to-result latencies per hardware unit, in cycles.
#[derive(Debug, Clone)]
pub struct LatencyModel {
    pub scalar_alu: u32,
    pub vector_alu: u32,
    pub scalar_mem: u32,
    pub vector_mem: u32,
    pub lds: u32,
    pub export: u32,
    pub barrier: u32,
    pub pseudo: u32,
}

impl Default for LatencyModel {
    fn default() -> LatencyModel {
        LatencyModel {
            scalar_alu: 2,
            vector_alu: 4,
            scalar_mem: 20,
            vector_mem: 320,
            lds: 20,
            export: 16,
            barrier: 0,
            pseudo: 4,
        }
    }
}

impl LatencyModel {
    pub fn latency(&self, instr: &Instruction) -> u32 {
        match instr.format() {
            Format::ScalarAlu => self.scalar_alu,
            Format::VectorAlu => self.vector_alu,
            Format::Branch => 0,
            Format::ScalarMem => self.scalar_mem,
            Format::VectorMem | Format::FlatMem => self.vector_mem,
            Format::Lds | Format::Interp => self.lds,
            Format::Export => self.export,
            Format::Barrier => self.barrier,
            Format::Pseudo => self.pseudo,
        }
    }
}

/// Instructions that terminate a scheduling region and keep their position.
fn is_unschedulable(instr: &Instruction) -> bool {
    match instr.format() {
        Format::Branch | Format::Barrier => true,
        Format::Pseudo => matches!(
            instr.opcode,
            Opcode::Phi | Opcode::LinearPhi | Opcode::StartProgram
        ),
        _ => false,
    }
}

/// Whether the instruction reads the exec mask without listing it as an
/// operand.
fn reads_exec_implicitly(instr: &Instruction) -> bool {
    match instr.format() {
        Format::VectorAlu => instr.opcode != Opcode::VReadfirstlane,
        Format::VectorMem | Format::FlatMem | Format::Lds | Format::Interp | Format::Export => {
            true
        }
        _ => false,
    }
}

struct Node {
    /// Slot index of the instruction within the block.
    instr: usize,
    latency: u32,
    priority: i64,
    /// Accumulated memory latency along the deepest chain into this node.
    load_latency: u32,
    mem: bool,
    scheduled: bool,
    preds: Vec<u32>,
    succs: Vec<u32>,
    /// Flat register slots read (including implicit exec) and written.
    reads: Vec<u16>,
    writes: Vec<u16>,
}

#[derive(Default)]
struct SyncState {
    /// Most recent acquire operation for this storage class.
    last_acquire: Option<u32>,
    /// Plain accesses since the acquire; a release orders after all of
    /// them.
    acquired: Vec<u32>,
}

/// DAG builder and greedy list scheduler for one region.
struct Region<'a> {
    model: &'a LatencyModel,
    nodes: Vec<Node>,
    ready: BTreeSet<u32>,
    /// Last region-local writer per register slot.
    last_write: Vec<Option<u32>>,
    /// Readers since the last write, per register slot.
    last_reads: Vec<Vec<u32>>,
    sync: FxHashMap<StorageClass, SyncState>,
    /// Cycle at which each register slot's value becomes available.
    reg_ready: Vec<u32>,
    max_load_latency: u32,
}

impl<'a> Region<'a> {
    fn new(model: &'a LatencyModel) -> Region<'a> {
        Region {
            model,
            nodes: Vec::new(),
            ready: BTreeSet::new(),
            last_write: vec![None; MAX_REG],
            last_reads: vec![Vec::new(); MAX_REG],
            sync: FxHashMap::default(),
            reg_ready: vec![0; MAX_REG],
            max_load_latency: 0,
        }
    }

    fn add_edge(&mut self, pred: u32, succ: u32) {
        if pred == succ || self.nodes[pred as usize].succs.contains(&succ) {
            return;
        }
        self.nodes[pred as usize].succs.push(succ);
        self.nodes[succ as usize].preds.push(pred);
    }

    /// Read of a register slot: ordered after its last writer.
    fn handle_read(&mut self, node: u32, slot: usize) {
        if let Some(w) = self.last_write[slot] {
            self.add_edge(w, node);
        }
        self.last_reads[slot].push(node);
        self.nodes[node as usize].reads.push(slot as u16);
    }

    /// Write of a register slot: ordered after its last writer and after
    /// every read since that write.
    fn handle_write(&mut self, node: u32, slot: usize) {
        if let Some(w) = self.last_write[slot] {
            self.add_edge(w, node);
        }
        for r in mem::take(&mut self.last_reads[slot]) {
            self.add_edge(r, node);
        }
        self.last_write[slot] = Some(node);
        self.nodes[node as usize].writes.push(slot as u16);
    }

    /// Memory-ordering edges from the sync descriptor. Plain accesses are
    /// ordered after the open acquire of their storage class; releases are
    /// ordered after the acquire and every access in its section.
    fn handle_sync(&mut self, node: u32, instr: &Instruction) {
        if instr.sync.storage.is_empty() {
            return;
        }
        let semantics = instr.sync.semantics;
        let mut edges = Vec::new();
        for class in instr.sync.storage.iter() {
            let state = self.sync.entry(class).or_default();
            match semantics {
                Semantics::None => {
                    if let Some(a) = state.last_acquire {
                        edges.push(a);
                    }
                    state.acquired.push(node);
                }
                Semantics::Acquire => {
                    state.last_acquire = Some(node);
                }
                Semantics::Release => {
                    if let Some(a) = state.last_acquire.take() {
                        edges.push(a);
                    }
                    edges.append(&mut state.acquired);
                }
                Semantics::Atomic => {
                    if let Some(a) = state.last_acquire.take() {
                        edges.push(a);
                    }
                    edges.append(&mut state.acquired);
                    state.last_acquire = Some(node);
                }
            }
        }
        for pred in edges {
            self.add_edge(pred, node);
        }
    }

    /// Add the instruction in block slot `slot` to the region DAG.
    fn add(&mut self, slot: usize, instr: &Instruction) {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node {
            instr: slot,
            latency: self.model.latency(instr),
            priority: 0,
            load_latency: 0,
            mem: instr.accesses_memory(),
            scheduled: false,
            preds: Vec::new(),
            succs: Vec::new(),
            reads: Vec::new(),
            writes: Vec::new(),
        });

        for op in &instr.operands {
            if let (Some(reg), Some(rc)) = (op.physreg(), op.rc()) {
                for slot in covered_range(reg, rc) {
                    self.handle_read(id, slot);
                }
            }
        }
        if reads_exec_implicitly(instr) {
            for slot in exec_range() {
                self.handle_read(id, slot);
            }
        }
        self.handle_sync(id, instr);
        for def in &instr.definitions {
            for slot in covered_range(def.reg, def.rc) {
                self.handle_write(id, slot);
            }
        }

        // Edges only ever point from earlier to later nodes, so the pred
        // list is final here.
        let mut load_latency = 0;
        for &p in &self.nodes[id as usize].preds {
            load_latency = load_latency.max(self.nodes[p as usize].load_latency);
        }
        let node = &mut self.nodes[id as usize];
        if node.mem {
            load_latency += node.latency;
        }
        node.load_latency = load_latency;
        self.max_load_latency = self.max_load_latency.max(load_latency);

        if self.nodes[id as usize].preds.is_empty() {
            self.ready.insert(id);
        }
    }

    /// Back-propagate priorities: memory nodes whose load chain started
    /// early get a head start proportional to the latency still ahead of
    /// them, and every node inherits its successors' priority plus its own
    /// latency.
    fn set_priorities(&mut self) {
        let max_ll = self.max_load_latency as i64;
        for id in (0..self.nodes.len()).rev() {
            if self.nodes[id].mem {
                let node = &self.nodes[id];
                let p = max_ll - node.load_latency as i64 + node.latency as i64;
                if p > self.nodes[id].priority {
                    self.nodes[id].priority = p;
                }
            }
            let priority = self.nodes[id].priority;
            for pi in 0..self.nodes[id].preds.len() {
                let p = self.nodes[id].preds[pi] as usize;
                let through = priority + self.nodes[p].latency as i64;
                if through > self.nodes[p].priority {
                    self.nodes[p].priority = through;
                }
            }
        }
    }

    /// Pick the ready node minimizing `start - priority`, where `start` is
    /// the first cycle all its register slots are available. Ties go to the
    /// earliest node in original order.
    fn select_candidate(&self) -> (u32, u32) {
        let mut best: Option<(i64, u32, u32)> = None;
        for &id in &self.ready {
            let node = &self.nodes[id as usize];
            let mut avail = 0;
            for &slot in node.reads.iter().chain(node.writes.iter()) {
                avail = avail.max(self.reg_ready[slot as usize]);
            }
            let start = avail + 1;
            let score = start as i64 - node.priority;
            if best.map_or(true, |(s, _, _)| score < s) {
                best = Some((score, id, start));
            }
        }
        let (_, id, start) = best.expect("ready set is non-empty while nodes remain");
        (id, start)
    }

    /// Emit the region in dependency order, then reset for the next one.
    fn flush(&mut self, slots: &mut [Option<Instruction>], out: &mut Vec<Instruction>) {
        if !self.nodes.is_empty() {
            self.set_priorities();
            for _ in 0..self.nodes.len() {
                let (id, start) = self.select_candidate();
                self.ready.remove(&id);
                self.nodes[id as usize].scheduled = true;

                let done = start + self.nodes[id as usize].latency;
                for wi in 0..self.nodes[id as usize].writes.len() {
                    let slot = self.nodes[id as usize].writes[wi] as usize;
                    self.reg_ready[slot] = done;
                }

                let slot = self.nodes[id as usize].instr;
                out.push(slots[slot].take().expect("instruction emitted once"));

                for si in 0..self.nodes[id as usize].succs.len() {
                    let s = self.nodes[id as usize].succs[si] as usize;
                    if !self.nodes[s].scheduled
                        && self.nodes[s]
                            .preds
                            .iter()
                            .all(|&p| self.nodes[p as usize].scheduled)
                    {
                        self.ready.insert(s as u32);
                    }
                }
            }
            assert!(
                self.nodes.iter().all(|n| n.scheduled),
                "dependency graph must be acyclic"
            );
        }

        self.nodes.clear();
        self.ready.clear();
        self.last_write.iter_mut().for_each(|w| *w = None);
        self.last_reads.iter_mut().for_each(Vec::clear);
        self.sync.clear();
        self.reg_ready.iter_mut().for_each(|c| *c = 0);
        self.max_load_latency = 0;
    }
}

fn schedule_block(block: &mut Block, model: &LatencyModel) {
    let count = block.instructions.len();
    let mut slots: Vec<Option<Instruction>> =
        mem::take(&mut block.instructions).into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(count);
    let mut region = Region::new(model);

    for idx in 0..slots.len() {
        let fixed = is_unschedulable(slots[idx].as_ref().expect("slot still filled"));
        if fixed {
            region.flush(&mut slots, &mut out);
            out.push(slots[idx].take().expect("slot still filled"));
        } else {
            region.add(idx, slots[idx].as_ref().expect("slot still filled"));
        }
    }
    region.flush(&mut slots, &mut out);

    assert_eq!(out.len(), count, "scheduling must preserve instruction count");
    block.instructions = out;
}

/// Reorder every block of `program` for latency hiding. Instruction
/// multisets per block are preserved; only order within regions changes.
pub fn schedule(program: &mut Program, model: &LatencyModel) {
    for block in &mut program.blocks {
        schedule_block(block, model);
    }
}
