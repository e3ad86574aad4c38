//! Fabric session: the weight store, KV cache, lookup tables and every
//! compute block, with a zero-ceremony functional API on top.
//!
//! Each call starts one block, ticks it (and clocks the memory it uses) to
//! completion and reports the tick count alongside the result. Blocks run one
//! at a time, so the store's single read port is never contended.

use std::path::Path;

use qfab_core::pipeline::run_to_done;
use qfab_core::{Block, ModelConfig, Port, QfabError, Result};

use crate::engine::{
    ActivationTable, EmbeddingEngine, InvSqrtUnit, KvCache, KvKey, LayerNormEngine, MatVecEngine,
    SoftmaxEngine,
};
use crate::engine::{activation, inv_sqrt, kv_cache};
use crate::loader::{self, LutSet};
use crate::store::{ReadData, WeightStore};
use crate::tensor_map::HEAD;

/// A block result and the ticks it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Pass<T> {
    pub output: T,
    pub ticks: u64,
}

/// Slack over a block's tick contract before a run is declared hung.
fn budget(expected: u64) -> u64 {
    2 * expected + 16
}

fn drive<B: Block>(block: &mut B, port: &mut B::Port, expected: u64) -> Result<u64> {
    let ticks = run_to_done(block, port, budget(expected))?;
    tracing::debug!("{} done in {} ticks", B::NAME, ticks);
    Ok(ticks)
}

/// Output of a block that has just stopped being busy.
fn finished<T: ToOwned + ?Sized>(name: &'static str, out: Option<&T>, ticks: u64) -> Result<T::Owned> {
    out.map(ToOwned::to_owned).ok_or(QfabError::TickBudget { block: name, limit: ticks })
}

pub struct Fabric {
    cfg: ModelConfig,
    luts: LutSet,
    store: WeightStore,
    kv: KvCache,
    act: ActivationTable,
    embedding: EmbeddingEngine,
    layernorm: LayerNormEngine,
    matvec: MatVecEngine,
    softmax: SoftmaxEngine,
    inv_sqrt: InvSqrtUnit,
    ticks: u64,
}

impl Fabric {
    pub fn new(cfg: ModelConfig, store: WeightStore, luts: LutSet) -> Result<Self> {
        cfg.validate()?;
        let n = &cfg.numeric;
        let fabric = Self {
            act: ActivationTable::new(luts.gelu.clone()),
            embedding: EmbeddingEngine::new(cfg.emb_dim),
            layernorm: LayerNormEngine::new(cfg.emb_dim, luts.inv_sqrt.clone(), n.inv_sqrt_width),
            matvec: MatVecEngine::new(n.matvec_shift),
            softmax: SoftmaxEngine::new(luts.exp.clone(), n.softmax_sum_width),
            inv_sqrt: InvSqrtUnit::new(luts.inv_sqrt.clone(), n.inv_sqrt_width),
            kv: KvCache::new(),
            store,
            luts,
            cfg,
            ticks: 0,
        };
        tracing::info!(
            "fabric ready: {} blocks, emb_dim={}, {} tensors",
            fabric.cfg.n_layers,
            fabric.cfg.emb_dim,
            fabric.store.map().len()
        );
        Ok(fabric)
    }

    /// A fabric over all-zero weights with generated tables.
    pub fn with_zero_weights(cfg: ModelConfig) -> Result<Self> {
        let luts = LutSet::generated(&cfg)?;
        let store = WeightStore::zeroed(&cfg);
        Self::new(cfg, store, luts)
    }

    /// Load weights from a `TFPGA001` container and tables from `lut_dir`
    /// (or the generators when `None`).
    pub fn open(cfg: ModelConfig, weights: &Path, lut_dir: Option<&Path>) -> Result<Self> {
        let store = loader::load_weights(weights, &cfg)?;
        let luts = match lut_dir {
            Some(dir) => LutSet::from_dir(dir, &cfg)?,
            None => LutSet::generated(&cfg)?,
        };
        Self::new(cfg, store, luts)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.cfg
    }

    pub fn store(&self) -> &WeightStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut WeightStore {
        &mut self.store
    }

    pub fn kv_cache(&self) -> &KvCache {
        &self.kv
    }

    pub fn luts(&self) -> &LutSet {
        &self.luts
    }

    /// Ticks consumed by every call since construction.
    pub fn total_ticks(&self) -> u64 {
        self.ticks
    }

    fn pass<T>(&mut self, output: T, ticks: u64) -> Pass<T> {
        self.ticks += ticks;
        Pass { output, ticks }
    }

    /// One read through the store port.
    pub fn store_read(&mut self, tensor_id: u8, offset: usize) -> Pass<ReadData> {
        self.store.issue(tensor_id, offset);
        self.store.clock();
        let data = self.store.data();
        self.pass(data, 1)
    }

    pub fn embed(&mut self, token: u8, position: u8) -> Result<Pass<Vec<i8>>> {
        self.embedding.start(token, position)?;
        let expected = EmbeddingEngine::expected_ticks(self.cfg.emb_dim);
        let ticks = drive(&mut self.embedding, &mut self.store, expected)?;
        let out = finished(EmbeddingEngine::NAME, self.embedding.output(), ticks)?;
        Ok(self.pass(out, ticks))
    }

    /// LayerNorm with gamma at `gamma_id` and beta at `gamma_id + 1`.
    pub fn layernorm(&mut self, x: &[i8], gamma_id: u8) -> Result<Pass<Vec<i8>>> {
        self.layernorm.start(x, gamma_id)?;
        let expected = LayerNormEngine::expected_ticks(self.cfg.emb_dim);
        let ticks = drive(&mut self.layernorm, &mut self.store, expected)?;
        let out = finished(LayerNormEngine::NAME, self.layernorm.output(), ticks)?;
        Ok(self.pass(out, ticks))
    }

    pub fn matvec(&mut self, tensor_id: u8, x: &[i8], out_dim: usize) -> Result<Pass<Vec<i8>>> {
        self.matvec.start(tensor_id, x, out_dim)?;
        let expected = MatVecEngine::expected_ticks(x.len(), out_dim);
        let ticks = drive(&mut self.matvec, &mut self.store, expected)?;
        let out = finished(MatVecEngine::NAME, self.matvec.output(), ticks)?;
        Ok(self.pass(out, ticks))
    }

    /// Output projection through the weight-tied token embedding.
    pub fn logits(&mut self, x: &[i8]) -> Result<Pass<Vec<i8>>> {
        let vocab = self.cfg.vocab_size;
        self.matvec(HEAD, x, vocab)
    }

    pub fn softmax(&mut self, x: &[i16]) -> Result<Pass<Vec<u16>>> {
        self.softmax.start(x)?;
        let ticks = drive(&mut self.softmax, &mut (), SoftmaxEngine::expected_ticks(x.len()))?;
        let out = finished(SoftmaxEngine::NAME, self.softmax.output(), ticks)?;
        Ok(self.pass(out, ticks))
    }

    pub fn inv_sqrt(&mut self, d: u64) -> Result<Pass<u16>> {
        self.inv_sqrt.start(d)?;
        let ticks = drive(&mut self.inv_sqrt, &mut (), inv_sqrt::LATENCY)?;
        let out = self
            .inv_sqrt
            .result()
            .ok_or(QfabError::TickBudget { block: InvSqrtUnit::NAME, limit: ticks })?;
        Ok(self.pass(out, ticks))
    }

    /// Stream `xs` through one block's GELU curve, one lookup per tick.
    pub fn activate(&mut self, layer: u8, xs: &[i8]) -> Pass<Vec<i8>> {
        let mut out = Vec::with_capacity(xs.len());
        for &x in xs {
            self.act.issue(layer, x);
            self.act.clock();
            out.extend(self.act.data());
        }
        let ticks = xs.len() as u64 * activation::LATENCY;
        self.pass(out, ticks)
    }

    pub fn kv_write(&mut self, key: KvKey, value: i8) -> Pass<()> {
        self.kv.write(key, value);
        self.kv.clock();
        self.pass((), 1)
    }

    pub fn kv_read(&mut self, key: KvKey) -> Pass<i8> {
        self.kv.read(key);
        let mut value = None;
        for _ in 0..kv_cache::READ_LATENCY {
            self.kv.clock();
            value = self.kv.data();
        }
        self.pass(value.unwrap_or_default(), kv_cache::READ_LATENCY)
    }

    /// Return every compute block to idle and drop every in-flight request.
    /// Weights and KV cache contents persist.
    pub fn reset(&mut self) {
        self.embedding.reset();
        self.layernorm.reset();
        self.matvec.reset();
        self.softmax.reset();
        self.inv_sqrt.reset();
        self.store.flush();
        self.act.flush();
        self.kv.flush();
        tracing::debug!("compute blocks reset");
    }

    /// Start a new session: reset compute state and zero the KV cache.
    pub fn clear_session(&mut self) {
        self.reset();
        self.kv.clear();
    }
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("cfg", &self.cfg)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}
