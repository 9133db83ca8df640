//! Instruction definitions for the post-RA IR.
//!
//! Operands and definitions reference both a `Temp` (the identity upstream
//! liveness counts uses of) and the `PhysReg` the allocator fixed it to.
//! Memory instructions carry a `MemSync` descriptor that drives the
//! scheduler's acquire/release ordering edges.

use std::fmt;

use crate::reg::{PhysReg, RegClass, Temp};

/// Hardware encoding class of an instruction. Drives the latency model and
/// the implicit-operand rules in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    ScalarAlu,
    VectorAlu,
    Branch,
    ScalarMem,
    VectorMem,
    FlatMem,
    Lds,
    Interp,
    Export,
    Barrier,
    Pseudo,
}

/// Instruction opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // -- Scalar ALU --
    SMov,
    /// Bitwise AND; second definition is the scc flag (result != 0).
    SAnd,
    SOr,
    SXor,
    SAndn2,
    SLshl,
    SLshr,
    SAdd,
    /// Scalar compares; single definition is the scc flag.
    SCmpEq,
    SCmpLg,
    SCmpLt,
    SCmpGt,
    SCmpLe,
    SCmpGe,
    /// Conditional select: operands are (a, b, scc).
    SCSelect,

    // -- Vector ALU --
    VMov,
    VAdd,
    VSub,
    VMul,
    VMin,
    VMax,
    VFma,
    /// Vector compares write a wave mask (vcc or another sgpr pair).
    VCmpEq,
    VCmpLt,
    /// Reads one lane into an sgpr; does not depend on exec.
    VReadfirstlane,

    // -- Branches --
    SBranch,
    SCBranchZ,
    SCBranchNZ,

    // -- Memory --
    SLoad,
    BufferLoad,
    BufferStore,
    FlatLoad,
    FlatStore,
    DsRead,
    DsWrite,
    VInterp,
    Exp,

    // -- Barriers / waits --
    SWaitcnt,
    SBarrier,
    SEndpgm,

    // -- Pseudo --
    ParallelCopy,
    Phi,
    LinearPhi,
    StartProgram,
}

impl Opcode {
    pub fn format(self) -> Format {
        use Opcode::*;
        match self {
            SMov | SAnd | SOr | SXor | SAndn2 | SLshl | SLshr | SAdd | SCmpEq | SCmpLg
            | SCmpLt | SCmpGt | SCmpLe | SCmpGe | SCSelect => Format::ScalarAlu,
            VMov | VAdd | VSub | VMul | VMin | VMax | VFma | VCmpEq | VCmpLt
            | VReadfirstlane => Format::VectorAlu,
            SBranch | SCBranchZ | SCBranchNZ => Format::Branch,
            SLoad => Format::ScalarMem,
            BufferLoad | BufferStore => Format::VectorMem,
            FlatLoad | FlatStore => Format::FlatMem,
            DsRead | DsWrite => Format::Lds,
            VInterp => Format::Interp,
            Exp => Format::Export,
            SWaitcnt | SBarrier | SEndpgm => Format::Barrier,
            ParallelCopy | Phi | LinearPhi | StartProgram => Format::Pseudo,
        }
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            SMov => "s_mov",
            SAnd => "s_and",
            SOr => "s_or",
            SXor => "s_xor",
            SAndn2 => "s_andn2",
            SLshl => "s_lshl",
            SLshr => "s_lshr",
            SAdd => "s_add",
            SCmpEq => "s_cmp_eq",
            SCmpLg => "s_cmp_lg",
            SCmpLt => "s_cmp_lt",
            SCmpGt => "s_cmp_gt",
            SCmpLe => "s_cmp_le",
            SCmpGe => "s_cmp_ge",
            SCSelect => "s_cselect",
            VMov => "v_mov",
            VAdd => "v_add",
            VSub => "v_sub",
            VMul => "v_mul",
            VMin => "v_min",
            VMax => "v_max",
            VFma => "v_fma",
            VCmpEq => "v_cmp_eq",
            VCmpLt => "v_cmp_lt",
            VReadfirstlane => "v_readfirstlane",
            SBranch => "s_branch",
            SCBranchZ => "s_cbranch_z",
            SCBranchNZ => "s_cbranch_nz",
            SLoad => "s_load",
            BufferLoad => "buffer_load",
            BufferStore => "buffer_store",
            FlatLoad => "flat_load",
            FlatStore => "flat_store",
            DsRead => "ds_read",
            DsWrite => "ds_write",
            VInterp => "v_interp",
            Exp => "exp",
            SWaitcnt => "s_waitcnt",
            SBarrier => "s_barrier",
            SEndpgm => "s_endpgm",
            ParallelCopy => "p_parallelcopy",
            Phi => "p_phi",
            LinearPhi => "p_linear_phi",
            StartProgram => "p_startpgm",
        }
    }
}

/// Abstract storage classes a memory instruction may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Buffer,
    Image,
    Shared,
    Global,
    Scratch,
}

impl StorageClass {
    pub const ALL: [StorageClass; 5] = [
        StorageClass::Buffer,
        StorageClass::Image,
        StorageClass::Shared,
        StorageClass::Global,
        StorageClass::Scratch,
    ];

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of storage classes, packed into a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageSet(u8);

impl StorageSet {
    pub const EMPTY: StorageSet = StorageSet(0);

    pub fn single(class: StorageClass) -> StorageSet {
        StorageSet(class.bit())
    }

    pub fn with(self, class: StorageClass) -> StorageSet {
        StorageSet(self.0 | class.bit())
    }

    pub fn contains(self, class: StorageClass) -> bool {
        self.0 & class.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = StorageClass> {
        StorageClass::ALL
            .into_iter()
            .filter(move |c| self.contains(*c))
    }
}

/// Memory-ordering semantics of an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Semantics {
    #[default]
    None,
    Acquire,
    Release,
    /// Both acquire and release.
    Atomic,
}

/// Memory-sync descriptor attached to memory instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemSync {
    pub storage: StorageSet,
    pub semantics: Semantics,
}

impl MemSync {
    pub fn new(storage: StorageSet, semantics: Semantics) -> MemSync {
        MemSync { storage, semantics }
    }
}

/// What an operand refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Reg {
        temp: Temp,
        reg: PhysReg,
        rc: RegClass,
    },
    Const(u32),
    Undef,
}

/// An instruction operand, with VALU input-modifier flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    pub neg: bool,
    pub abs: bool,
}

impl Operand {
    pub fn reg(temp: Temp, reg: PhysReg, rc: RegClass) -> Operand {
        Operand {
            kind: OperandKind::Reg { temp, reg, rc },
            neg: false,
            abs: false,
        }
    }

    pub fn constant(value: u32) -> Operand {
        Operand {
            kind: OperandKind::Const(value),
            neg: false,
            abs: false,
        }
    }

    pub fn undef() -> Operand {
        Operand {
            kind: OperandKind::Undef,
            neg: false,
            abs: false,
        }
    }

    /// Operand reading the value a definition produced.
    pub fn of_def(def: &Definition) -> Operand {
        Operand::reg(def.temp, def.reg, def.rc)
    }

    pub fn with_neg(mut self) -> Operand {
        self.neg = true;
        self
    }

    pub fn with_abs(mut self) -> Operand {
        self.abs = true;
        self
    }

    pub fn is_const(&self) -> bool {
        matches!(self.kind, OperandKind::Const(_))
    }

    pub fn constant_value(&self) -> Option<u32> {
        match self.kind {
            OperandKind::Const(v) => Some(v),
            _ => None,
        }
    }

    pub fn physreg(&self) -> Option<PhysReg> {
        match self.kind {
            OperandKind::Reg { reg, .. } => Some(reg),
            _ => None,
        }
    }

    pub fn temp(&self) -> Option<Temp> {
        match self.kind {
            OperandKind::Reg { temp, .. } => Some(temp),
            _ => None,
        }
    }

    pub fn rc(&self) -> Option<RegClass> {
        match self.kind {
            OperandKind::Reg { rc, .. } => Some(rc),
            _ => None,
        }
    }
}

/// An instruction definition: a temp fixed to a physical register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub temp: Temp,
    pub reg: PhysReg,
    pub rc: RegClass,
}

impl Definition {
    pub fn new(temp: Temp, reg: PhysReg, rc: RegClass) -> Definition {
        Definition { temp, reg, rc }
    }
}

/// A machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub definitions: Vec<Definition>,
    pub sync: MemSync,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Instruction {
        Instruction {
            opcode,
            operands: Vec::new(),
            definitions: Vec::new(),
            sync: MemSync::default(),
        }
    }

    pub fn with_operands(mut self, operands: impl IntoIterator<Item = Operand>) -> Instruction {
        self.operands = operands.into_iter().collect();
        self
    }

    pub fn with_defs(mut self, definitions: impl IntoIterator<Item = Definition>) -> Instruction {
        self.definitions = definitions.into_iter().collect();
        self
    }

    pub fn with_sync(mut self, sync: MemSync) -> Instruction {
        self.sync = sync;
        self
    }

    pub fn format(&self) -> Format {
        self.opcode.format()
    }

    pub fn is_salu(&self) -> bool {
        self.format() == Format::ScalarAlu
    }

    pub fn is_valu(&self) -> bool {
        self.format() == Format::VectorAlu
    }

    /// Whether this instruction touches memory (drives load-latency
    /// accounting in the scheduler).
    pub fn accesses_memory(&self) -> bool {
        matches!(
            self.format(),
            Format::ScalarMem | Format::VectorMem | Format::FlatMem | Format::Lds
        )
    }

    /// Instructions the dead-code sweep must never remove even when all
    /// their definitions are unused.
    pub fn has_side_effects(&self) -> bool {
        if matches!(self.format(), Format::Branch | Format::Barrier | Format::Export) {
            return true;
        }
        if !matches!(self.sync.semantics, Semantics::None) {
            return true;
        }
        matches!(
            self.opcode,
            Opcode::BufferStore | Opcode::FlatStore | Opcode::DsWrite | Opcode::StartProgram
        )
    }
}

impl fmt::Display for Semantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Semantics::None => "none",
            Semantics::Acquire => "acquire",
            Semantics::Release => "release",
            Semantics::Atomic => "atomic",
        };
        f.write_str(s)
    }
}
