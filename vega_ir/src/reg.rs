//! Physical registers, register classes, and temp identities.
//!
//! The register file is flat: scalar bank at `[0, 256)`, vector bank at
//! `[256, 512)`. A handful of scalar slots are architectural (vcc, m0,
//! exec, scc) and get symbolic names in the display output.

use std::fmt;
use std::ops::Range;

/// Total addressable register slots (scalar bank + vector bank).
pub const MAX_REG: usize = 512;

/// First slot of the vector bank.
pub const VGPR_BASE: u32 = 256;

/// A fixed hardware register slot assigned by register allocation.
///
/// The value indexes the flat register file directly; vector registers are
/// stored pre-offset by [`VGPR_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysReg(pub u32);

pub const VCC_LO: PhysReg = PhysReg(106);
pub const VCC_HI: PhysReg = PhysReg(107);
pub const M0: PhysReg = PhysReg(124);
pub const EXEC_LO: PhysReg = PhysReg(126);
pub const EXEC_HI: PhysReg = PhysReg(127);
pub const SCC: PhysReg = PhysReg(253);

impl PhysReg {
    /// Vector register `n`, offset into the vector bank.
    pub fn vgpr(n: u32) -> PhysReg {
        PhysReg(VGPR_BASE + n)
    }

    /// Raw index into the flat register file.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_scalar(self) -> bool {
        self.0 < VGPR_BASE
    }

    pub fn is_vector(self) -> bool {
        self.0 >= VGPR_BASE
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            VCC_LO => write!(f, "vcc_lo"),
            VCC_HI => write!(f, "vcc_hi"),
            M0 => write!(f, "m0"),
            EXEC_LO => write!(f, "exec_lo"),
            EXEC_HI => write!(f, "exec_hi"),
            SCC => write!(f, "scc"),
            PhysReg(n) if n >= VGPR_BASE => write!(f, "v{}", n - VGPR_BASE),
            PhysReg(n) => write!(f, "s{n}"),
        }
    }
}

/// Which bank a register class lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegKind {
    Scalar,
    Vector,
}

/// Size and bank of a register-allocated value.
///
/// `bytes` is the byte size of the value; classes whose size is not a
/// multiple of four are subdword and occupy part of a 32-bit slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegClass {
    pub kind: RegKind,
    pub bytes: u16,
}

impl RegClass {
    pub const S1: RegClass = RegClass::scalar(1);
    pub const S2: RegClass = RegClass::scalar(2);
    pub const V1: RegClass = RegClass::vector(1);
    pub const V2: RegClass = RegClass::vector(2);

    /// Scalar class of `dwords` 32-bit slots.
    pub const fn scalar(dwords: u16) -> RegClass {
        RegClass {
            kind: RegKind::Scalar,
            bytes: dwords * 4,
        }
    }

    /// Vector class of `dwords` 32-bit slots.
    pub const fn vector(dwords: u16) -> RegClass {
        RegClass {
            kind: RegKind::Vector,
            bytes: dwords * 4,
        }
    }

    /// Subdword vector class of `bytes` bytes.
    pub const fn vector_bytes(bytes: u16) -> RegClass {
        RegClass {
            kind: RegKind::Vector,
            bytes,
        }
    }

    /// Number of 32-bit slots covered, rounding subdword classes up.
    pub fn dwords(self) -> u32 {
        (self.bytes as u32).div_ceil(4)
    }

    pub fn is_subdword(self) -> bool {
        self.bytes % 4 != 0
    }
}

impl fmt::Display for RegClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bank = match self.kind {
            RegKind::Scalar => 's',
            RegKind::Vector => 'v',
        };
        if self.is_subdword() {
            write!(f, "{bank}{}b", self.bytes)
        } else {
            write!(f, "{bank}{}", self.dwords())
        }
    }
}

/// Opaque value identity carried through from SSA, used post-RA only for
/// use counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Temp(pub u32);

impl Temp {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// The flat register-file slots covered by a value of class `rc` placed at
/// `reg`. Clamped to the register file; the verifier rejects assignments
/// that would actually run past the end.
pub fn covered_range(reg: PhysReg, rc: RegClass) -> Range<usize> {
    let start = reg.index();
    let end = (start + rc.dwords() as usize).min(MAX_REG);
    start..end
}

/// Covered slots for the exec mask (a full wave mask is two dwords).
pub fn exec_range() -> Range<usize> {
    EXEC_LO.index()..EXEC_HI.index() + 1
}
