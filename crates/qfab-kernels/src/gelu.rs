//! Per-block int8 → int8 GELU tables.
//!
//! The feed-forward up projection's int8 output `v` stands for `v * s`, where
//! `s` is that block's activation scale. Each block gets its own 256-entry
//! curve `clamp(round(gelu(v * s) / s))`; the four curves are packed into one
//! 1024-entry table addressed by `{layer[1:0], x[7:0]}`.

use std::path::Path;

use qfab_core::{hex, QfabError, Result};

use crate::reference;

pub const CURVE_SIZE: usize = 256;
pub const LAYERS: usize = 4;
pub const TABLE_SIZE: usize = CURVE_SIZE * LAYERS;

/// Table address for `(layer, x)`.
#[inline]
pub fn address(layer: u8, x: i8) -> usize {
    (((layer & 0x3) as usize) << 8) | (x as u8 as usize)
}

/// Symmetric activation scale from an observed range: `max(|min|, |max|) / 127`.
pub fn scale_from_range(min: f32, max: f32) -> f32 {
    min.abs().max(max.abs()) / 127.0
}

/// One 256-entry curve, indexed by the raw byte of the input.
pub fn build_curve(act_scale: f32) -> [i8; CURVE_SIZE] {
    let s = act_scale as f64;
    let mut curve = [0i8; CURVE_SIZE];
    for (i, c) in curve.iter_mut().enumerate() {
        let v = i as u8 as i8 as f64;
        let y = reference::gelu(v * s) / s;
        *c = y.round_ties_even().clamp(-128.0, 127.0) as i8;
    }
    curve
}

#[derive(Clone, PartialEq, Eq)]
pub struct GeluLut {
    entries: Box<[i8; TABLE_SIZE]>,
}

impl std::fmt::Debug for GeluLut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeluLut").field("entries", &TABLE_SIZE).finish()
    }
}

impl GeluLut {
    /// Calibrate one curve per block. Unused layer slots repeat the last curve.
    pub fn from_scales(act_scales: &[f32]) -> Result<Self> {
        if act_scales.is_empty() || act_scales.len() > LAYERS {
            return Err(QfabError::Config(format!(
                "expected 1..={} gelu activation scales, got {}",
                LAYERS,
                act_scales.len()
            )));
        }
        let mut entries = Box::new([0i8; TABLE_SIZE]);
        for layer in 0..LAYERS {
            let s = act_scales[layer.min(act_scales.len() - 1)];
            if !(s.is_finite() && s > 0.0) {
                return Err(QfabError::Config(format!("gelu activation scale {} for layer {}", s, layer)));
            }
            entries[layer * CURVE_SIZE..(layer + 1) * CURVE_SIZE].copy_from_slice(&build_curve(s));
            tracing::debug!("gelu curve for layer {} calibrated at act_scale={:.6}", layer, s);
        }
        Ok(Self { entries })
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let words = hex::parse_table("gelu_lut", text, TABLE_SIZE)?;
        let mut entries = Box::new([0i8; TABLE_SIZE]);
        for (e, w) in entries.iter_mut().zip(words) {
            *e = hex::sign_extend(w, 8) as i8;
        }
        Ok(Self { entries })
    }

    pub fn from_hex_file(path: &Path) -> Result<Self> {
        Self::from_hex(&std::fs::read_to_string(path)?)
    }

    /// Emit the table with a comment header naming each layer's scale.
    pub fn to_hex(&self, act_scales: &[f32]) -> String {
        let mut out = String::new();
        for (i, s) in act_scales.iter().enumerate() {
            out.push_str(&format!("// layer {} act_scale = {:.10}\n", i, s));
        }
        out.push_str(&hex::format_words(self.entries.iter().map(|&v| v as i64), 2));
        out
    }

    #[inline]
    pub fn lookup(&self, layer: u8, x: i8) -> i8 {
        self.entries[address(layer, x)]
    }

    pub fn entries(&self) -> &[i8; TABLE_SIZE] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_layout() {
        assert_eq!(address(0, 0), 0);
        assert_eq!(address(0, -1), 255);
        assert_eq!(address(2, 5), 517);
        assert_eq!(address(3, -128), 896);
        // Only two layer bits.
        assert_eq!(address(4, 1), 1);
    }

    #[test]
    fn test_curve_shape() {
        let curve = build_curve(1.0 / 32.0);
        assert_eq!(curve[0], 0);
        // Large positive inputs pass through.
        assert_eq!(curve[127], 127);
        // Large negative inputs go to zero.
        assert_eq!(curve[128], 0);
        // gelu(-0.5) / s = -0.154 * 32 ≈ -5
        assert_eq!(curve[(-16i8) as u8 as usize], -5);
        for v in 1..=127i8 {
            assert!(curve[v as usize] <= v && curve[v as usize] >= 0);
        }
    }

    #[test]
    fn test_per_layer_curves_differ() {
        let lut = GeluLut::from_scales(&[0.01, 0.05, 0.1, 0.2]).unwrap();
        assert_ne!(lut.lookup(0, -40), lut.lookup(3, -40));
        assert_eq!(lut.lookup(1, 0), 0);
    }

    #[test]
    fn test_short_scale_list_repeats_last() {
        let lut = GeluLut::from_scales(&[0.05]).unwrap();
        for x in [-100i8, -3, 0, 9, 127] {
            assert_eq!(lut.lookup(0, x), lut.lookup(3, x));
        }
    }

    #[test]
    fn test_rejects_bad_scales() {
        assert!(GeluLut::from_scales(&[]).is_err());
        assert!(GeluLut::from_scales(&[0.1, 0.0]).is_err());
        assert!(GeluLut::from_scales(&[0.1; 5]).is_err());
    }

    #[test]
    fn test_scale_from_range() {
        assert!((scale_from_range(-6.35, 2.0) - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_hex_roundtrip_with_header() {
        let scales = [0.02, 0.03, 0.04, 0.05];
        let lut = GeluLut::from_scales(&scales).unwrap();
        let text = lut.to_hex(&scales);
        assert!(text.starts_with("// layer 0 act_scale"));
        assert_eq!(GeluLut::from_hex(&text).unwrap(), lut);
    }
}
