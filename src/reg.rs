use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An integer register index, `x0`..`x31`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reg(u8);

const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

impl Reg {
    /// # Panics
    ///
    /// Panics if `n >= 32`.
    pub const fn new(n: u8) -> Self {
        assert!(n < 32, "register index out of range");
        Self(n)
    }

    /// Lossy constructor for decoded 5-bit fields.
    pub const fn from_field(bits: u32) -> Self {
        Self((bits & 0x1F) as u8)
    }

    pub const fn num(self) -> u8 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn abi_name(self) -> &'static str {
        ABI_NAMES[self.0 as usize]
    }

    pub const ZERO: Reg = Reg(0);
    pub const RA: Reg = Reg(1);
    pub const SP: Reg = Reg(2);
    pub const GP: Reg = Reg(3);
    pub const TP: Reg = Reg(4);
    pub const T0: Reg = Reg(5);
    pub const T1: Reg = Reg(6);
    pub const T2: Reg = Reg(7);
    pub const S0: Reg = Reg(8);
    pub const S1: Reg = Reg(9);
    pub const A0: Reg = Reg(10);
    pub const A1: Reg = Reg(11);
    pub const A2: Reg = Reg(12);
    pub const A3: Reg = Reg(13);
    pub const A4: Reg = Reg(14);
    pub const A5: Reg = Reg(15);
    pub const A6: Reg = Reg(16);
    pub const A7: Reg = Reg(17);
    pub const S2: Reg = Reg(18);
    pub const S3: Reg = Reg(19);
    pub const S4: Reg = Reg(20);
    pub const S5: Reg = Reg(21);
    pub const S6: Reg = Reg(22);
    pub const S7: Reg = Reg(23);
    pub const S8: Reg = Reg(24);
    pub const S9: Reg = Reg(25);
    pub const S10: Reg = Reg(26);
    pub const S11: Reg = Reg(27);
    pub const T3: Reg = Reg(28);
    pub const T4: Reg = Reg(29);
    pub const T5: Reg = Reg(30);
    pub const T6: Reg = Reg(31);
}

/// Shorthand for `Reg::new(n)`.
pub const fn x(n: u8) -> Reg {
    Reg::new(n)
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown register `{0}`")]
pub struct BadReg(pub String);

impl FromStr for Reg {
    type Err = BadReg;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        if let Some(n) = t.strip_prefix('x').and_then(|n| n.parse::<u8>().ok()) {
            if n < 32 {
                return Ok(Reg(n));
            }
        }
        if t == "fp" {
            return Ok(Reg::S0);
        }
        ABI_NAMES
            .iter()
            .position(|&name| name == t)
            .map(|i| Reg(i as u8))
            .ok_or_else(|| BadReg(s.trim().to_string()))
    }
}

/// The register file: index 0 reads as zero and ignores writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers([i32; 32]);

impl Registers {
    pub fn get(&self, r: Reg) -> i32 {
        if r.is_zero() {
            0
        } else {
            self.0[r.num() as usize]
        }
    }

    pub fn set(&mut self, r: Reg, value: i32) {
        if !r.is_zero() {
            self.0[r.num() as usize] = value;
        }
    }

    pub fn get_u(&self, r: Reg) -> u32 {
        self.get(r) as u32
    }

    pub fn set_u(&mut self, r: Reg, value: u32) {
        self.set(r, value as i32)
    }

    pub fn snapshot(&self) -> [i32; 32] {
        self.0
    }
}
