//! Model geometry and numeric configuration.
//!
//! Defaults describe the 4-block, 128-wide byte-level GPT the fabric was
//! sized for. A JSON file may override any subset of fields.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::QfabError;
use crate::Result;

/// Transformer geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Vocabulary size (byte-level tokens).
    pub vocab_size: usize,
    /// Embedding width; every LayerNorm vector has this many elements.
    pub emb_dim: usize,
    /// Attention heads per block.
    pub n_heads: usize,
    /// Transformer blocks.
    pub n_layers: usize,
    /// Maximum sequence length (KV cache positions).
    pub context_len: usize,
    /// Feed-forward hidden width.
    pub ff_dim: usize,
    /// Fixed-point kernel parameters.
    pub numeric: NumericConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: 256,
            emb_dim: 128,
            n_heads: 8,
            n_layers: 4,
            context_len: 256,
            ff_dim: 512,
            numeric: NumericConfig::default(),
        }
    }
}

/// Bit widths and shifts used by the fixed-point engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericConfig {
    /// Arithmetic right shift applied by the MatVec engine (scale 2^-shift).
    pub matvec_shift: u32,
    /// Input port width of the reciprocal-sqrt unit inside LayerNorm.
    pub inv_sqrt_width: u32,
    /// Width of the saturating softmax exp accumulator.
    pub softmax_sum_width: u32,
    /// Per-block activation scale of the feed-forward up projection, used to
    /// calibrate the GELU tables when no table file is supplied.
    pub gelu_act_scales: Vec<f32>,
}

impl Default for NumericConfig {
    fn default() -> Self {
        Self {
            matvec_shift: 7,
            inv_sqrt_width: 17,
            softmax_sum_width: 24,
            gelu_act_scales: vec![1.0 / 32.0; 4],
        }
    }
}

impl ModelConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg = Self::from_json_str(&text)?;
        tracing::info!(
            "loaded model config from {}: {} blocks, emb_dim={}, heads={}",
            path.display(),
            cfg.n_layers,
            cfg.emb_dim,
            cfg.n_heads
        );
        Ok(cfg)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let cfg: ModelConfig = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Per-head width.
    pub fn head_dim(&self) -> usize {
        self.emb_dim / self.n_heads
    }

    /// `log2(emb_dim)`: the shift that divides a LayerNorm sum by its length.
    pub fn emb_shift(&self) -> u32 {
        self.emb_dim.trailing_zeros()
    }

    /// Number of quantized tensors: two embeddings, eight per block, the
    /// final LayerNorm pair.
    pub fn tensor_count(&self) -> usize {
        2 + 8 * self.n_layers + 2
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(QfabError::Config(msg));
        if self.emb_dim == 0 || !self.emb_dim.is_power_of_two() {
            return fail(format!("emb_dim {} must be a non-zero power of two", self.emb_dim));
        }
        if self.n_heads == 0 || self.emb_dim % self.n_heads != 0 {
            return fail(format!("n_heads {} must divide emb_dim {}", self.n_heads, self.emb_dim));
        }
        if self.n_layers == 0 || self.n_layers > 4 {
            return fail(format!("n_layers {} outside 1..=4 (2-bit layer select)", self.n_layers));
        }
        if self.n_heads > 8 {
            return fail(format!("n_heads {} exceeds the 8 heads per KV layer", self.n_heads));
        }
        if self.head_dim() > 16 {
            return fail(format!("head_dim {} exceeds the 16 dims per KV entry", self.head_dim()));
        }
        if self.vocab_size == 0 || self.vocab_size > 256 {
            return fail(format!("vocab_size {} outside 1..=256 (u8 token ids)", self.vocab_size));
        }
        if self.context_len == 0 || self.context_len > 256 {
            return fail(format!("context_len {} outside 1..=256", self.context_len));
        }
        if self.ff_dim == 0 {
            return fail("ff_dim must be non-zero".into());
        }
        let n = &self.numeric;
        if n.matvec_shift > 31 {
            return fail(format!("matvec_shift {} too large", n.matvec_shift));
        }
        if !(9..=32).contains(&n.inv_sqrt_width) {
            return fail(format!("inv_sqrt_width {} outside 9..=32", n.inv_sqrt_width));
        }
        if !(16..=48).contains(&n.softmax_sum_width) {
            return fail(format!("softmax_sum_width {} outside 16..=48", n.softmax_sum_width));
        }
        if n.gelu_act_scales.len() != self.n_layers {
            return fail(format!(
                "gelu_act_scales has {} entries, expected one per block ({})",
                n.gelu_act_scales.len(),
                self.n_layers
            ));
        }
        if let Some(s) = n.gelu_act_scales.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return fail(format!("gelu activation scale {} must be finite and positive", s));
        }
        Ok(())
    }
}
