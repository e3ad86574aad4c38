//! Division-free softmax in the log domain.
//!
//! ```text
//! softmax_i = exp(-(d_i + ln Σ exp(-d_j)))      d_i = max - x_i
//! ```
//!
//! The sum is reduced to an additive offset with a leading-one detector and a
//! 16-entry `ln(1 + m/16)` table, so normalization reuses the same bipartite
//! exponent instead of dividing.

use qfab_core::fixed::{leading_one, mantissa_below, saturate_unsigned};

use crate::exp_lut::{ExpLut, D_CLIP};

/// `ln(2)` in Q.7.
pub const LN2_Q7: i32 = 89;

/// `ln(1 + m/16)` in Q.7 for `m = 0..15`, as burned into the hardware table.
///
/// Not the rounded closed form: entries from `m = 7` up sit one or two
/// counts above `round(ln(1 + m/16) * 128)`.
pub const LN1P_Q7: [i32; 16] = [0, 8, 15, 22, 29, 35, 41, 47, 53, 58, 63, 68, 73, 78, 82, 87];

/// The sum's leading-one index that corresponds to `ln = 0` (Q1.15 one).
const SUM_ONE_BIT: i32 = 15;

/// Q4.7 distance `max - x`, clipped to [`D_CLIP`] once its integer part
/// reaches 16. The flag reports whether the clip fired.
#[inline]
pub fn distance(max: i16, x: i16) -> (u16, bool) {
    let raw = max as i32 - x as i32;
    if raw >> 7 >= 16 {
        (D_CLIP, true)
    } else {
        (raw as u16, false)
    }
}

/// Leading-one index of the sum and the 4-bit mantissa below it.
#[inline]
pub fn log_lod(sum: u64) -> Option<(u32, usize)> {
    leading_one(sum).map(|k| (k, mantissa_below(sum, k, 4) as usize))
}

/// `(k - 15) * ln2 + ln1p[m]` clipped to `[0, D_CLIP]`; no leading one
/// gives the clip bound.
#[inline]
pub fn log_from_lod(lod: Option<(u32, usize)>) -> u16 {
    let Some((k, m)) = lod else {
        return D_CLIP;
    };
    let ln = (k as i32 - SUM_ONE_BIT) * LN2_Q7 + LN1P_Q7[m];
    ln.clamp(0, D_CLIP as i32) as u16
}

/// Q.7 log of a Q1.15-scaled sum, clipped to `[0, D_CLIP]`.
///
/// A zero sum has no leading one and returns the clip bound, which drives
/// every normalized output to 0.
pub fn log_offset(sum: u64) -> u16 {
    log_from_lod(log_lod(sum))
}

/// Distance after adding the log offset; anything at or past the clip bound
/// (or already clipped) saturates to [`D_CLIP`].
#[inline]
pub fn normalized_distance(d: u16, clipped: bool, offset: u16) -> u16 {
    let sum = d as u32 + offset as u32;
    if clipped || sum >= D_CLIP as u32 {
        D_CLIP
    } else {
        sum as u16
    }
}

/// Saturating accumulation of bipartite exponents in a `sum_width`-bit register.
pub fn exp_sum(x: &[i16], max: i16, lut: &ExpLut, sum_width: u32) -> u64 {
    x.iter().fold(0u64, |acc, &v| {
        let (d, _) = distance(max, v);
        saturate_unsigned(acc + lut.eval(d) as u64, sum_width)
    })
}

/// Golden model: the exact integer result the streaming engine produces.
pub fn softmax_q15(x: &[i16], lut: &ExpLut, sum_width: u32) -> Vec<u16> {
    let max = x.iter().copied().fold(i16::MIN, i16::max);
    let offset = log_offset(exp_sum(x, max, lut, sum_width));
    x.iter()
        .map(|&v| {
            let (d, clipped) = distance(max, v);
            lut.eval(normalized_distance(d, clipped, offset))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ln1p_table_is_hardware_table() {
        assert_eq!(LN1P_Q7, [0, 8, 15, 22, 29, 35, 41, 47, 53, 58, 63, 68, 73, 78, 82, 87]);
        assert!(LN1P_Q7.windows(2).all(|w| w[0] < w[1]));
        // Within two counts of the closed form, never below it.
        for (m, &v) in LN1P_Q7.iter().enumerate() {
            let ideal = ((1.0 + m as f64 / 16.0).ln() * 128.0).round() as i32;
            assert!((0..=2).contains(&(v - ideal)), "m={} table={} ideal={}", m, v, ideal);
        }
        assert_eq!(LN2_Q7, (2f64.ln() * 128.0).round() as i32);
    }

    #[test]
    fn test_log_split_matches_offset() {
        assert_eq!(log_lod(0), None);
        assert_eq!(log_lod(256 * 32585), Some((22, 15)));
        for sum in [0u64, 1, 100, 1 << 15, 3 << 14, 256 * 32585, (1 << 24) - 1] {
            assert_eq!(log_from_lod(log_lod(sum)), log_offset(sum), "sum={}", sum);
        }
    }

    #[test]
    fn test_distance_clip() {
        assert_eq!(distance(0, 0), (0, false));
        assert_eq!(distance(2047, 0), (2047, false));
        assert_eq!(distance(2048, 0), (D_CLIP, true));
        assert_eq!(distance(i16::MAX, i16::MIN), (D_CLIP, true));
    }

    #[test]
    fn test_log_offset_edges() {
        assert_eq!(log_offset(0), D_CLIP);
        // One Q1.15 unit: ln(1) = 0.
        assert_eq!(log_offset(1 << 15), 0);
        // Below one the log is negative and clips to 0.
        assert_eq!(log_offset(100), 0);
        // 256 * 32585 -> k = 22, m = 15.
        assert_eq!(log_offset(256 * 32585), 7 * 89 + 87);
        assert_eq!(log_offset(u64::MAX >> 4), D_CLIP);
    }

    #[test]
    fn test_uniform_is_flat() {
        let lut = ExpLut::analytical();
        let out = softmax_q15(&[12800; 256], &lut, 24);
        assert!(out.iter().all(|&p| p == 128));
        assert_eq!(out.iter().map(|&p| p as u32).sum::<u32>(), 32768);
    }

    #[test]
    fn test_one_hot() {
        let lut = ExpLut::analytical();
        let mut x = [0i16; 256];
        x[42] = 1280;
        let out = softmax_q15(&x, &lut, 24);
        assert!(out[42] >= 30000, "peak {}", out[42]);
        for (i, &p) in out.iter().enumerate() {
            if i != 42 {
                assert!(p < 200, "out[{}] = {}", i, p);
            }
        }
    }

    #[test]
    fn test_single_element() {
        let lut = ExpLut::analytical();
        assert_eq!(softmax_q15(&[0], &lut, 24), vec![32585]);
        assert_eq!(softmax_q15(&[-32768, 32767], &lut, 24), vec![0, 32585]);
    }

    #[test]
    fn test_empty_input() {
        assert!(softmax_q15(&[], &ExpLut::analytical(), 24).is_empty());
    }

    proptest! {
        #[test]
        fn prop_sum_near_one(x in prop::collection::vec(-4096i16..4096, 1..256)) {
            let lut = ExpLut::analytical();
            let total: i64 = softmax_q15(&x, &lut, 24).iter().map(|&p| p as i64).sum();
            // 4-bit log mantissa truncation (~1/16) plus Q.7 offset rounding.
            prop_assert!((total - 32768).abs() <= 2560, "sum {}", total);
        }

        #[test]
        fn prop_order_preserved(x in prop::collection::vec(any::<i16>(), 2..64)) {
            let lut = ExpLut::analytical();
            let out = softmax_q15(&x, &lut, 24);
            for i in 0..x.len() {
                for j in 0..x.len() {
                    if x[i] > x[j] {
                        prop_assert!(out[i] as i32 + 96 >= out[j] as i32);
                    }
                    if x[i] == x[j] {
                        prop_assert_eq!(out[i], out[j]);
                    }
                }
            }
        }
    }
}
