//! Bipartite `exp(-d)` over Q4.7 distances.
//!
//! The 11-bit distance `d` splits into `x0 = d[10:6]`, `x1 = d[5:3]` and
//! `x2 = d[2:0]`. A coarse table indexed by `{x0, x1}` holds the function at
//! the centre of each `x2` bucket; a small signed correction table indexed by
//! `{x0, x2}` holds the first-order slope term. Their sum is clamped to
//! `[0, 32768]` (Q1.15).

use std::path::Path;

use qfab_core::{hex, Result};

/// Distances at or beyond 16.0 (Q4.7) map to exactly 0.
pub const D_CLIP: u16 = 2048;

/// Q1.15 one.
pub const ONE_Q15: i32 = 32768;

pub const LUT_SIZE: usize = 256;

/// Midpoint of the `x1` bucket in real units: 3.5 / 16.
const DELTA1: f64 = 7.0 / 32.0;
/// Midpoint of the `x2` bucket in real units: 3.5 / 128.
const DELTA2: f64 = 7.0 / 256.0;

/// Split a distance into the three bipartite fields.
#[inline]
pub fn split(d: u16) -> (usize, usize, usize) {
    let d = d as usize;
    ((d >> 6) & 0x1F, (d >> 3) & 0x7, d & 0x7)
}

/// The two bipartite tables.
#[derive(Clone, PartialEq, Eq)]
pub struct ExpLut {
    lut0: Box<[u16; LUT_SIZE]>,
    lut1: Box<[i16; LUT_SIZE]>,
}

impl std::fmt::Debug for ExpLut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpLut")
            .field("lut0[0]", &self.lut0[0])
            .field("lut1[0]", &self.lut1[0])
            .finish()
    }
}

impl Default for ExpLut {
    fn default() -> Self {
        Self::analytical()
    }
}

impl ExpLut {
    /// Compensated analytical tables.
    ///
    /// `lut0[{x0,x1}] = exp(-(x0/2 + x1/16 + δ₂))`
    /// `lut1[{x0,x2}] = -exp(-(x0/2 + δ₁ + δ₂)) · (x2/128 - δ₂)`
    pub fn analytical() -> Self {
        let mut lut0 = Box::new([0u16; LUT_SIZE]);
        let mut lut1 = Box::new([0i16; LUT_SIZE]);
        for x0 in 0..32usize {
            let coarse = x0 as f64 / 2.0;
            for j in 0..8usize {
                let idx = (x0 << 3) | j;

                let v0 = (-(coarse + j as f64 / 16.0 + DELTA2)).exp();
                lut0[idx] = (v0 * ONE_Q15 as f64).round().clamp(0.0, 65535.0) as u16;

                let slope = (-(coarse + DELTA1 + DELTA2)).exp();
                let v1 = -slope * (j as f64 / 128.0 - DELTA2);
                lut1[idx] = (v1 * ONE_Q15 as f64)
                    .round()
                    .clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            }
        }
        Self { lut0, lut1 }
    }

    /// Load from two `$readmemh` texts; `lut1` words are 16-bit two's complement.
    pub fn from_hex(lut0_text: &str, lut1_text: &str) -> Result<Self> {
        let w0 = hex::parse_table("exp_lut0", lut0_text, LUT_SIZE)?;
        let w1 = hex::parse_table("exp_lut1", lut1_text, LUT_SIZE)?;
        let mut lut0 = Box::new([0u16; LUT_SIZE]);
        let mut lut1 = Box::new([0i16; LUT_SIZE]);
        for i in 0..LUT_SIZE {
            lut0[i] = w0[i] as u16;
            lut1[i] = hex::sign_extend(w1[i], 16) as i16;
        }
        Ok(Self { lut0, lut1 })
    }

    pub fn from_hex_files(lut0: &Path, lut1: &Path) -> Result<Self> {
        Self::from_hex(&std::fs::read_to_string(lut0)?, &std::fs::read_to_string(lut1)?)
    }

    pub fn lut0_hex(&self) -> String {
        hex::format_words(self.lut0.iter().map(|&v| v as i64), 4)
    }

    pub fn lut1_hex(&self) -> String {
        hex::format_words(self.lut1.iter().map(|&v| v as i64), 4)
    }

    pub fn lut0(&self) -> &[u16; LUT_SIZE] {
        &self.lut0
    }

    pub fn lut1(&self) -> &[i16; LUT_SIZE] {
        &self.lut1
    }

    /// `exp(-d / 128)` in Q1.15; `d >= D_CLIP` yields 0.
    #[inline]
    pub fn eval(&self, d: u16) -> u16 {
        if d >= D_CLIP {
            return 0;
        }
        let (x0, x1, x2) = split(d);
        let v = self.lut0[(x0 << 3) | x1] as i32 + self.lut1[(x0 << 3) | x2] as i32;
        v.clamp(0, ONE_Q15) as u16
    }
}
