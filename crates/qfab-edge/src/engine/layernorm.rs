//! Three-pass integer LayerNorm.
//!
//! ```text
//! pass 1  mean    = (Σ x) >> log2(n)
//! pass 2  diff_i  = x_i - mean,  var = Σ diff_i²,  inv_std = inv_sqrt(var >> log2(n))
//! pass 3  y_i     = clamp_i8(((diff_i * inv_std * gamma_i + 2^14) >> 15) + beta_i)
//! ```
//!
//! Gamma is streamed from the weight store at `gamma_id`, beta at
//! `gamma_id + 1`. A constant input gives `var = 0`, `inv_std = 0xFFFF`,
//! `diff = 0` and therefore `y = beta`.

use std::sync::Arc;

use qfab_core::fixed::clamp_i8;
use qfab_core::{Block, QfabError, Result};
use qfab_kernels::InvSqrtLut;

use super::inv_sqrt::{self, InvSqrtUnit};
use super::matvec::FILL_LATENCY;
use super::stream::StoreStream;
use crate::store::WeightStore;

const ROUND: i64 = 1 << 14;
const NORM_SHIFT: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Mean,
    Variance,
    Rsqrt,
    Gamma,
    Beta,
    Done,
}

#[derive(Debug, Clone)]
pub struct LayerNormEngine {
    dim: usize,
    shift: u32,
    rsqrt: InvSqrtUnit,
    phase: Phase,
    index: usize,
    gamma_id: u8,
    x: Vec<i8>,
    diff: Vec<i32>,
    gamma: Vec<i8>,
    output: Vec<i8>,
    sum: i64,
    mean: i64,
    var: u64,
    inv_std: u16,
    stream: StoreStream,
}

impl LayerNormEngine {
    /// `dim` must be a power of two.
    pub fn new(dim: usize, lut: Arc<InvSqrtLut>, rsqrt_width: u32) -> Self {
        Self {
            dim,
            shift: dim.trailing_zeros(),
            rsqrt: InvSqrtUnit::new(lut, rsqrt_width),
            phase: Phase::Idle,
            index: 0,
            gamma_id: 0,
            x: vec![0; dim],
            diff: vec![0; dim],
            gamma: vec![0; dim],
            output: vec![0; dim],
            sum: 0,
            mean: 0,
            var: 0,
            inv_std: 0,
            stream: StoreStream::default(),
        }
    }

    /// Two accumulate passes, the rsqrt unit, then gamma and beta fetches.
    pub fn expected_ticks(dim: usize) -> u64 {
        4 * dim as u64 + inv_sqrt::LATENCY + 2 * FILL_LATENCY
    }

    pub fn start(&mut self, x: &[i8], gamma_id: u8) -> Result<()> {
        if self.busy() {
            return Err(QfabError::Busy(Self::NAME));
        }
        if x.len() != self.dim {
            return Err(QfabError::Config(format!(
                "layernorm expects {} elements, got {}",
                self.dim,
                x.len()
            )));
        }
        self.x.copy_from_slice(x);
        self.gamma_id = gamma_id;
        self.sum = 0;
        self.var = 0;
        self.index = 0;
        self.phase = Phase::Mean;
        tracing::debug!("layernorm start: gamma={} beta={}", gamma_id, gamma_id.wrapping_add(1));
        Ok(())
    }

    pub fn output(&self) -> Option<&[i8]> {
        (self.phase == Phase::Done).then_some(self.output.as_slice())
    }

    /// `(mean, var_acc, inv_std)` of the last completed statistics pass.
    pub fn stats(&self) -> (i64, u64, u16) {
        (self.mean, self.var, self.inv_std)
    }

    fn normalize(&self, i: usize, beta: i8) -> i8 {
        let scaled = self.diff[i] as i64 * self.inv_std as i64 * self.gamma[i] as i64;
        clamp_i8(((scaled + ROUND) >> NORM_SHIFT) + beta as i64)
    }
}

impl Block for LayerNormEngine {
    type Port = WeightStore;
    const NAME: &'static str = "layernorm";

    fn tick(&mut self, store: &mut WeightStore) {
        match self.phase {
            Phase::Idle | Phase::Done => {}
            Phase::Mean => {
                self.sum += self.x[self.index] as i64;
                self.index += 1;
                if self.index == self.dim {
                    self.mean = self.sum >> self.shift;
                    self.index = 0;
                    self.phase = Phase::Variance;
                }
            }
            Phase::Variance => {
                let d = self.x[self.index] as i32 - self.mean as i32;
                self.diff[self.index] = d;
                self.var += (d as i64 * d as i64) as u64;
                self.index += 1;
                if self.index == self.dim {
                    self.rsqrt.load(self.var >> self.shift);
                    self.phase = Phase::Rsqrt;
                }
            }
            Phase::Rsqrt => {
                self.rsqrt.tick(&mut ());
                if let Some(v) = self.rsqrt.result() {
                    self.inv_std = v;
                    tracing::trace!("layernorm mean={} var={} inv_std={}", self.mean, self.var, v);
                    self.stream = StoreStream::new(self.gamma_id, 0, self.dim);
                    self.phase = Phase::Gamma;
                }
            }
            Phase::Gamma => {
                if let Some(e) = self.stream.step(store) {
                    self.gamma[e.index] = e.byte;
                    if e.last {
                        self.stream = StoreStream::new(self.gamma_id.wrapping_add(1), 0, self.dim);
                        self.phase = Phase::Beta;
                    }
                }
            }
            Phase::Beta => {
                if let Some(e) = self.stream.step(store) {
                    self.output[e.index] = self.normalize(e.index, e.byte);
                    if e.last {
                        self.phase = Phase::Done;
                    }
                }
            }
        }
    }

    fn busy(&self) -> bool {
        !matches!(self.phase, Phase::Idle | Phase::Done)
    }

    fn done(&self) -> bool {
        self.phase == Phase::Done
    }

    fn reset(&mut self) {
        self.rsqrt.reset();
        self.stream = StoreStream::default();
        self.phase = Phase::Idle;
        self.index = 0;
        self.sum = 0;
        self.var = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qfab_core::pipeline::run_to_done;
    use qfab_core::ModelConfig;
    use qfab_kernels::reference;

    fn setup(gamma: &[i8], beta: &[i8]) -> (WeightStore, LayerNormEngine) {
        let mut store = WeightStore::zeroed(&ModelConfig::default());
        store.load_tensor(2, gamma, 0.01).unwrap();
        store.load_tensor(3, beta, 0.01).unwrap();
        let ln = LayerNormEngine::new(128, Arc::new(InvSqrtLut::generate()), 17);
        (store, ln)
    }

    #[test]
    fn test_constant_input_yields_beta() {
        let beta: Vec<i8> = (0..128).map(|i| (i as i8).wrapping_mul(3)).collect();
        let (mut store, mut ln) = setup(&[100; 128], &beta);
        ln.start(&[42; 128], 2).unwrap();
        let ticks = run_to_done(&mut ln, &mut store, 10_000).unwrap();
        assert_eq!(ticks, LayerNormEngine::expected_ticks(128));
        assert_eq!(ln.output().unwrap(), beta.as_slice());
        assert_eq!(ln.stats(), (42, 0, 0xFFFF));
    }

    #[test]
    fn test_tracks_float_reference() {
        // gamma = 64 ≙ 0.5 in Q.7, beta = 0.
        let (mut store, mut ln) = setup(&[64; 128], &[0; 128]);
        let x: Vec<i8> = (0..128).map(|i| ((i * 37) % 200) as i8).collect();
        ln.start(&x, 2).unwrap();
        run_to_done(&mut ln, &mut store, 10_000).unwrap();

        let xf: Vec<f64> = x.iter().map(|&v| v as f64).collect();
        // y = diff * inv_std * gamma / 2^15 with inv_std in Q1.15 and gamma raw,
        // i.e. normalized * 64.
        let ideal = reference::layernorm(&xf, &[64.0; 128], &[0.0; 128], 0.0);
        for (i, (&got, want)) in ln.output().unwrap().iter().zip(ideal).enumerate() {
            let want = want.clamp(-128.0, 127.0);
            assert!((got as f64 - want).abs() <= 2.5, "i={} got={} want={}", i, got, want);
        }
    }

    #[test]
    fn test_reads_gamma_then_beta() {
        let (mut store, mut ln) = setup(&[0; 128], &[5; 128]);
        ln.start(&[1; 128], 2).unwrap();
        run_to_done(&mut ln, &mut store, 10_000).unwrap();
        assert_eq!(store.reads(), 256);
    }

    #[test]
    fn test_wrong_length_and_reset() {
        let (mut store, mut ln) = setup(&[0; 128], &[0; 128]);
        assert!(ln.start(&[0; 64], 2).is_err());
        ln.start(&[0; 128], 2).unwrap();
        for _ in 0..200 {
            ln.tick(&mut store);
        }
        assert!(ln.busy());
        ln.reset();
        assert!(!ln.busy() && ln.output().is_none());
    }

    #[test]
    fn test_restart_from_rsqrt_phase() {
        let beta: Vec<i8> = (0..128).map(|i| (i % 9) as i8).collect();
        let (mut store, mut ln) = setup(&[32; 128], &beta);
        let x: Vec<i8> = (0..128).map(|i| ((i * 13) % 90) as i8 - 45).collect();
        ln.start(&x, 2).unwrap();
        run_to_done(&mut ln, &mut store, 10_000).unwrap();
        let want = ln.output().unwrap().to_vec();
        let stats = ln.stats();

        // Both statistics passes are over; the rsqrt unit holds a token.
        ln.start(&[7; 128], 2).unwrap();
        for _ in 0..257 {
            ln.tick(&mut store);
        }
        assert_eq!(ln.phase, Phase::Rsqrt);
        ln.reset();

        ln.start(&x, 2).unwrap();
        let ticks = run_to_done(&mut ln, &mut store, 10_000).unwrap();
        assert_eq!(ticks, LayerNormEngine::expected_ticks(128));
        assert_eq!(ln.output().unwrap(), want.as_slice());
        assert_eq!(ln.stats(), stats);
    }
}
