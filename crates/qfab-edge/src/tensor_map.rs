//! Static tensor id → (name, shape, layout) map.
//!
//! Ids follow the training model's parameter order:
//!
//! ```text
//! 0            tok_emb.weight        [vocab, emb]
//! 1            pos_emb.weight        [context, emb]
//! 2 + 8b + 0   blocks.b.ln1.weight   [emb]          shared-norm
//! 2 + 8b + 1   blocks.b.ln1.bias     [emb]          shared-norm
//! 2 + 8b + 2   blocks.b.attn.qkv     [3*emb, emb]
//! 2 + 8b + 3   blocks.b.attn.proj    [emb, emb]
//! 2 + 8b + 4   blocks.b.ln2.weight   [emb]          shared-norm
//! 2 + 8b + 5   blocks.b.ln2.bias     [emb]          shared-norm
//! 2 + 8b + 6   blocks.b.ff.net.0     [ff, emb]
//! 2 + 8b + 7   blocks.b.ff.net.2     [emb, ff]
//! 2 + 8L       ln_f.weight           [emb]          shared-norm
//! 3 + 8L       ln_f.bias             [emb]          shared-norm
//! ```
//!
//! The LM head is weight-tied to the token embedding and has no id of its own.

use qfab_core::ModelConfig;

pub const TOK_EMB: u8 = 0;
pub const POS_EMB: u8 = 1;
/// The output projection reads the token embedding matrix.
pub const HEAD: u8 = TOK_EMB;

const PER_BLOCK: u8 = 8;

/// Per-block tensor slots, in id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTensor {
    Ln1Weight = 0,
    Ln1Bias = 1,
    AttnQkv = 2,
    AttnProj = 3,
    Ln2Weight = 4,
    Ln2Bias = 5,
    FfUp = 6,
    FfDown = 7,
}

/// Id of a per-block tensor.
pub const fn block_tensor(layer: u8, slot: BlockTensor) -> u8 {
    2 + PER_BLOCK * layer + slot as u8
}

/// Where a tensor's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Private memory sized to the tensor.
    Dedicated,
    /// A vector packed at `offset` inside the shared normalization memory.
    SharedNorm { offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub id: u8,
    pub name: String,
    pub shape: Vec<usize>,
    pub layout: Layout,
}

impl TensorInfo {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Full id table for one model geometry.
#[derive(Debug, Clone)]
pub struct TensorMap {
    entries: Vec<TensorInfo>,
    shared_len: usize,
}

impl TensorMap {
    pub fn new(cfg: &ModelConfig) -> Self {
        let emb = cfg.emb_dim;
        let mut specs: Vec<(String, Vec<usize>, bool)> = vec![
            ("tok_emb.weight".into(), vec![cfg.vocab_size, emb], false),
            ("pos_emb.weight".into(), vec![cfg.context_len, emb], false),
        ];
        for b in 0..cfg.n_layers {
            let p = format!("blocks.{}", b);
            specs.push((format!("{}.ln1.weight", p), vec![emb], true));
            specs.push((format!("{}.ln1.bias", p), vec![emb], true));
            specs.push((format!("{}.attn.qkv.weight", p), vec![3 * emb, emb], false));
            specs.push((format!("{}.attn.proj.weight", p), vec![emb, emb], false));
            specs.push((format!("{}.ln2.weight", p), vec![emb], true));
            specs.push((format!("{}.ln2.bias", p), vec![emb], true));
            specs.push((format!("{}.ff.net.0.weight", p), vec![cfg.ff_dim, emb], false));
            specs.push((format!("{}.ff.net.2.weight", p), vec![emb, cfg.ff_dim], false));
        }
        specs.push(("ln_f.weight".into(), vec![emb], true));
        specs.push(("ln_f.bias".into(), vec![emb], true));

        let mut shared_len = 0;
        let entries = specs
            .into_iter()
            .enumerate()
            .map(|(id, (name, shape, norm))| {
                let layout = if norm {
                    let offset = shared_len;
                    shared_len += emb;
                    Layout::SharedNorm { offset }
                } else {
                    Layout::Dedicated
                };
                TensorInfo { id: id as u8, name, shape, layout }
            })
            .collect();

        Self { entries, shared_len }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: u8) -> Option<&TensorInfo> {
        self.entries.get(id as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TensorInfo> {
        self.entries.iter()
    }

    /// Bytes in the shared normalization memory.
    pub fn shared_len(&self) -> usize {
        self.shared_len
    }

    /// Offset of a normalization vector inside the shared memory.
    pub fn norm_offset(&self, id: u8) -> Option<usize> {
        match self.get(id)?.layout {
            Layout::SharedNorm { offset } => Some(offset),
            Layout::Dedicated => None,
        }
    }

    /// Final LayerNorm gamma id (beta follows at `+1`).
    pub fn ln_f(&self) -> u8 {
        (self.entries.len() - 2) as u8
    }
}
