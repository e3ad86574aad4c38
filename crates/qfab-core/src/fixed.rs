//! Fixed-point formats and saturating narrowing.
//!
//! A [`QFormat`] tags a raw integer with its signedness, integer width and
//! fractional width. `Qm.n` here counts integer bits excluding the sign bit,
//! so Q8.7 signed is a 16-bit word.

use std::fmt;

/// A fixed-point format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QFormat {
    pub signed: bool,
    pub int_bits: u32,
    pub frac_bits: u32,
}

impl QFormat {
    /// Attention logits fed to softmax: Q8.7, 16-bit signed.
    pub const LOGIT: QFormat = QFormat::signed(8, 7);
    /// Softmax distance `max - x`: Q4.7, 11-bit unsigned, range [0, 16).
    pub const DISTANCE: QFormat = QFormat::unsigned(4, 7);
    /// Softmax probability: Q1.15 unsigned, 32768 ≙ 1.0.
    pub const PROB: QFormat = QFormat::unsigned(1, 15);
    /// Reciprocal square root output: Q1.15 unsigned.
    pub const INV_SQRT: QFormat = QFormat::unsigned(1, 15);
    /// Plain int8 activations and cache entries.
    pub const INT8: QFormat = QFormat::signed(7, 0);

    pub const fn signed(int_bits: u32, frac_bits: u32) -> Self {
        Self { signed: true, int_bits, frac_bits }
    }

    pub const fn unsigned(int_bits: u32, frac_bits: u32) -> Self {
        Self { signed: false, int_bits, frac_bits }
    }

    /// Total storage width in bits.
    pub const fn width(&self) -> u32 {
        self.int_bits + self.frac_bits + self.signed as u32
    }

    pub const fn min_raw(&self) -> i64 {
        if self.signed {
            -(1i64 << (self.int_bits + self.frac_bits))
        } else {
            0
        }
    }

    pub const fn max_raw(&self) -> i64 {
        (1i64 << (self.int_bits + self.frac_bits)) - 1
    }

    /// Clamp a wide raw value into this format's representable range.
    pub fn saturate(&self, raw: i64) -> i64 {
        raw.clamp(self.min_raw(), self.max_raw())
    }

    /// Round-to-nearest conversion from a real value, saturating.
    pub fn from_f64(&self, v: f64) -> i64 {
        let scaled = (v * (1u64 << self.frac_bits) as f64).round();
        if scaled.is_nan() {
            return 0;
        }
        self.saturate(scaled.clamp(i64::MIN as f64, i64::MAX as f64) as i64)
    }

    pub fn to_f64(&self, raw: i64) -> f64 {
        raw as f64 / (1u64 << self.frac_bits) as f64
    }
}

impl fmt::Display for QFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.signed { 's' } else { 'u' };
        write!(f, "{}Q{}.{}", tag, self.int_bits, self.frac_bits)
    }
}

/// Saturate a wide signed value to int8.
#[inline]
pub fn clamp_i8(v: i64) -> i8 {
    v.clamp(i8::MIN as i64, i8::MAX as i64) as i8
}

/// Saturate an unsigned accumulator to `bits` bits.
#[inline]
pub fn saturate_unsigned(v: u64, bits: u32) -> u64 {
    v.min(mask(bits))
}

/// Mask with the low `bits` bits set.
#[inline]
pub const fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Leading-one detection: bit index of the most significant set bit.
///
/// Returns `None` for zero; callers decide the degenerate policy.
#[inline]
pub fn leading_one(v: u64) -> Option<u32> {
    if v == 0 {
        None
    } else {
        Some(63 - v.leading_zeros())
    }
}

/// The `bits`-wide field directly below the leading one at index `k`.
///
/// Shifts up when fewer than `bits` bits sit below the leading one, so the
/// missing low bits read as zero.
#[inline]
pub fn mantissa_below(v: u64, k: u32, bits: u32) -> u64 {
    let field = if k >= bits { v >> (k - bits) } else { v << (bits - k) };
    field & mask(bits)
}
