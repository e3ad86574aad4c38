//! Requantization: wide accumulator → int8 via multiply, floor shift, clamp.
//!
//! `scale` encodes a real multiplier `M` as `round(M * 2^shift)`. With
//! `scale = 2^(scale_width - 1)` the primitive degenerates into a plain
//! arithmetic right shift by `shift - (scale_width - 1)`.

use crate::error::QfabError;
use crate::fixed::clamp_i8;
use crate::Result;

/// `clamp((acc * scale) >> shift, -128, 127)` with a floor (arithmetic) shift.
///
/// Signed × unsigned product; the intermediate is 128 bits wide so no
/// accumulator/scale combination can wrap.
#[inline]
pub fn requant(acc: i64, scale: u32, shift: u32) -> i8 {
    let product = acc as i128 * scale as i128;
    let shifted = product >> shift.min(127);
    clamp_i8(shifted.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
}

/// A configured requantizer: fixed scale width and shift, per-tensor scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requant {
    scale: u32,
    scale_width: u32,
    shift: u32,
}

impl Requant {
    /// Create a requantizer, checking that `scale` fits in `scale_width` bits.
    pub fn new(scale: u32, scale_width: u32, shift: u32) -> Result<Self> {
        if scale_width == 0 || scale_width > 32 {
            return Err(QfabError::Config(format!(
                "requant scale width {} outside 1..=32",
                scale_width
            )));
        }
        if scale_width < 32 && scale >= (1u32 << scale_width) {
            return Err(QfabError::Config(format!(
                "requant scale {} does not fit in {} bits",
                scale, scale_width
            )));
        }
        if shift > 64 {
            return Err(QfabError::Config(format!("requant shift {} too large", shift)));
        }
        Ok(Self { scale, scale_width, shift })
    }

    /// Pass-through configuration: `scale = 2^(scale_width - 1)`.
    pub fn shift_only(scale_width: u32, shift: u32) -> Result<Self> {
        if scale_width == 0 || scale_width > 32 {
            return Err(QfabError::Config(format!(
                "requant scale width {} outside 1..=32",
                scale_width
            )));
        }
        Self::new(1u32 << (scale_width - 1), scale_width, shift)
    }

    /// Encode a real multiplier as `round(m * 2^shift)`.
    pub fn from_multiplier(m: f64, scale_width: u32, shift: u32) -> Result<Self> {
        if !(m.is_finite() && m >= 0.0) {
            return Err(QfabError::Config(format!("requant multiplier {} must be finite and >= 0", m)));
        }
        let scale = (m * 2f64.powi(shift as i32)).round();
        if scale > u32::MAX as f64 {
            return Err(QfabError::Config(format!(
                "requant multiplier {} overflows the scale register",
                m
            )));
        }
        Self::new(scale as u32, scale_width, shift)
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn scale_width(&self) -> u32 {
        self.scale_width
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// The real multiplier this configuration encodes.
    pub fn multiplier(&self) -> f64 {
        self.scale as f64 / 2f64.powi(self.shift as i32)
    }

    #[inline]
    pub fn apply(&self, acc: i64) -> i8 {
        requant(acc, self.scale, self.shift)
    }
}
