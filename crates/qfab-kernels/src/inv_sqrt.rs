//! Reciprocal square root via leading-one detection, table lookup and shift.
//!
//! For `d` with leading one at bit `k` and the 8 bits below it `m`:
//!
//! ```text
//! 1/sqrt(d) ≈ LUT[k & 1][m] >> floor(k / 2)
//! LUT[0][m] = round(2^15 / sqrt(1 + m/256))
//! LUT[1][m] = round(2^15 / sqrt(2 * (1 + m/256)))
//! ```
//!
//! Output is Q1.15 unsigned. `d = 0` returns the saturated sentinel `0xFFFF`.

use std::path::Path;

use qfab_core::fixed::{leading_one, mantissa_below, mask};
use qfab_core::{hex, Result};

/// Number of table entries: `{k[0], m[7:0]}`.
pub const LUT_SIZE: usize = 512;

/// Returned for `d = 0` instead of dividing by zero.
pub const ZERO_SENTINEL: u16 = 0xFFFF;

/// Mantissa bits kept below the leading one.
const MANTISSA_BITS: u32 = 8;

/// The 512-entry Q1.15 table.
#[derive(Clone, PartialEq, Eq)]
pub struct InvSqrtLut {
    entries: Box<[u16; LUT_SIZE]>,
}

impl std::fmt::Debug for InvSqrtLut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvSqrtLut")
            .field("first", &self.entries[0])
            .field("odd_first", &self.entries[256])
            .finish()
    }
}

impl Default for InvSqrtLut {
    fn default() -> Self {
        Self::generate()
    }
}

impl InvSqrtLut {
    /// Build the table from its closed form.
    pub fn generate() -> Self {
        let mut entries = Box::new([0u16; LUT_SIZE]);
        for (i, e) in entries.iter_mut().enumerate() {
            let odd = (i >> 8) & 1 == 1;
            let m = (i & 0xFF) as f64;
            let normalized = 1.0 + m / 256.0;
            let val = if odd {
                1.0 / (2.0 * normalized).sqrt()
            } else {
                1.0 / normalized.sqrt()
            };
            *e = (val * 32768.0).round().min(65535.0) as u16;
        }
        Self { entries }
    }

    /// Load a table from `$readmemh` text (512 16-bit words).
    pub fn from_hex(text: &str) -> Result<Self> {
        let words = hex::parse_table("inv_sqrt_lut", text, LUT_SIZE)?;
        let mut entries = Box::new([0u16; LUT_SIZE]);
        for (e, w) in entries.iter_mut().zip(words) {
            *e = w as u16;
        }
        Ok(Self { entries })
    }

    pub fn from_hex_file(path: &Path) -> Result<Self> {
        Self::from_hex(&std::fs::read_to_string(path)?)
    }

    pub fn to_hex(&self) -> String {
        hex::format_words(self.entries.iter().map(|&v| v as i64), 4)
    }

    pub fn entries(&self) -> &[u16; LUT_SIZE] {
        &self.entries
    }

    /// Split `d` into the table address and the final shift.
    ///
    /// `d` is first truncated to the `width`-bit input port.
    #[inline]
    pub fn decompose(d: u64, width: u32) -> Option<(usize, u32)> {
        let d = d & mask(width);
        let k = leading_one(d)?;
        let m = mantissa_below(d, k, MANTISSA_BITS) as usize;
        Some(((((k & 1) as usize) << 8) | m, k >> 1))
    }

    /// `LUT[addr] >> shift`. Shifts of 16 or more flush to 0.
    #[inline]
    pub fn lookup(&self, addr: usize, shift: u32) -> u16 {
        self.entries[addr].checked_shr(shift).unwrap_or(0)
    }

    /// `1/sqrt(d)` in Q1.15 for a `width`-bit unsigned input.
    #[inline]
    pub fn eval(&self, d: u64, width: u32) -> u16 {
        match Self::decompose(d, width) {
            Some((addr, shift)) => self.lookup(addr, shift),
            None => ZERO_SENTINEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_table_endpoints() {
        let lut = InvSqrtLut::generate();
        assert_eq!(lut.entries()[0], 32768);
        assert_eq!(lut.entries()[256], 23170); // 2^15 / sqrt(2)
        assert!(lut.entries()[255] > lut.entries()[256]);
    }

    #[test]
    fn test_known_values() {
        let lut = InvSqrtLut::generate();
        assert_eq!(lut.eval(4, 17), 16384);
        assert_eq!(lut.eval(1, 17), 32768);
        assert_eq!(lut.eval(2, 17), 23170);
        assert_eq!(lut.eval(16384, 17), 256);
    }

    #[test]
    fn test_zero_is_sentinel() {
        let lut = InvSqrtLut::generate();
        assert_eq!(lut.eval(0, 17), ZERO_SENTINEL);
        // Bits above the port width are dropped before detection.
        assert_eq!(lut.eval(1 << 17, 17), ZERO_SENTINEL);
    }

    #[test]
    fn test_wide_inputs_flush_to_zero() {
        let lut = InvSqrtLut::generate();
        // k = 30: 32768 >> 15 = 1.
        assert_eq!(lut.eval(1 << 30, 40), 1);
        assert_eq!(lut.eval(1 << 32, 33), 0);
        assert_eq!(lut.eval(1 << 40, 40), 0);
        assert_eq!(lut.eval(1 << 40, 64), 0);
        assert_eq!(lut.eval(u64::MAX, 64), 0);
        assert_eq!(lut.lookup(0, 16), 0);
        assert_eq!(lut.lookup(0, 63), 0);
    }

    #[test]
    fn test_non_increasing() {
        let lut = InvSqrtLut::generate();
        let mut prev = u16::MAX;
        for d in 1..(1u64 << 17) {
            let v = lut.eval(d, 17);
            assert!(v <= prev, "inv_sqrt increased at d={}: {} > {}", d, v, prev);
            prev = v;
        }
    }

    #[test]
    fn test_relative_error() {
        let lut = InvSqrtLut::generate();
        for d in 1..(1u64 << 10) {
            let got = lut.eval(d, 14) as f64 / 32768.0;
            let ideal = 1.0 / (d as f64).sqrt();
            assert!((got - ideal).abs() / ideal < 0.002, "d={} got={} ideal={}", d, got, ideal);
        }
        for d in (1u64 << 10)..(1u64 << 14) {
            let got = lut.eval(d, 14) as f64 / 32768.0;
            let ideal = 1.0 / (d as f64).sqrt();
            assert!((got - ideal).abs() / ideal < 0.005, "d={} got={} ideal={}", d, got, ideal);
        }
    }

    #[test]
    fn test_hex_roundtrip() {
        let lut = InvSqrtLut::generate();
        let back = InvSqrtLut::from_hex(&lut.to_hex()).unwrap();
        assert_eq!(back, lut);
        assert!(InvSqrtLut::from_hex("8000\n").is_err());
    }

    proptest! {
        #[test]
        fn prop_width_independent_when_input_fits(d in 1u64..(1 << 14)) {
            let lut = InvSqrtLut::generate();
            prop_assert_eq!(lut.eval(d, 14), lut.eval(d, 17));
        }
    }
}
