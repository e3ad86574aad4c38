//! Quantized matrix-vector engine.
//!
//! Streams a row-major `[out_dim, in_dim]` int8 matrix from the weight store,
//! one element per tick:
//!
//! ```text
//! acc      = Σ_c in[c] * W[row, c]
//! out[row] = clamp_i8(acc >> shift)
//! ```

use qfab_core::fixed::clamp_i8;
use qfab_core::{Block, QfabError, Result};

use super::stream::StoreStream;
use crate::store::WeightStore;

/// Ticks between the first request and the first accumulate.
pub const FILL_LATENCY: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Run,
    Done,
}

#[derive(Debug, Clone)]
pub struct MatVecEngine {
    shift: u32,
    input: Vec<i8>,
    output: Vec<i8>,
    stream: StoreStream,
    acc: i64,
    state: State,
}

impl MatVecEngine {
    pub fn new(shift: u32) -> Self {
        Self {
            shift,
            input: Vec::new(),
            output: Vec::new(),
            stream: StoreStream::default(),
            acc: 0,
            state: State::Idle,
        }
    }

    /// Tick count from `start` to `done` for one invocation.
    pub fn expected_ticks(in_dim: usize, out_dim: usize) -> u64 {
        if in_dim == 0 || out_dim == 0 {
            0
        } else {
            (in_dim * out_dim) as u64 + FILL_LATENCY
        }
    }

    pub fn start(&mut self, tensor: u8, input: &[i8], out_dim: usize) -> Result<()> {
        if self.state == State::Run {
            return Err(QfabError::Busy(Self::NAME));
        }
        self.input = input.to_vec();
        self.output = vec![0; out_dim];
        self.acc = 0;
        self.stream = StoreStream::new(tensor, 0, input.len() * out_dim);
        self.state = if input.is_empty() || out_dim == 0 { State::Done } else { State::Run };
        tracing::debug!("matvec start: tensor {} [{} x {}]", tensor, out_dim, input.len());
        Ok(())
    }

    /// Result vector, available once `done`.
    pub fn output(&self) -> Option<&[i8]> {
        (self.state == State::Done).then_some(self.output.as_slice())
    }
}

impl Block for MatVecEngine {
    type Port = WeightStore;
    const NAME: &'static str = "matvec";

    fn tick(&mut self, store: &mut WeightStore) {
        if self.state != State::Run {
            return;
        }
        let Some(e) = self.stream.step(store) else {
            return;
        };
        let in_dim = self.input.len();
        let (row, col) = (e.index / in_dim, e.index % in_dim);
        self.acc += self.input[col] as i64 * e.byte as i64;
        if col + 1 == in_dim {
            self.output[row] = clamp_i8(self.acc >> self.shift);
            tracing::trace!("matvec row {} acc={} out={}", row, self.acc, self.output[row]);
            self.acc = 0;
        }
        if e.last {
            self.state = State::Done;
        }
    }

    fn busy(&self) -> bool {
        self.state == State::Run
    }

    fn done(&self) -> bool {
        self.state == State::Done
    }

    fn reset(&mut self) {
        self.stream = StoreStream::default();
        self.acc = 0;
        self.state = State::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qfab_core::pipeline::run_to_done;
    use qfab_core::ModelConfig;

    use crate::tensor_map::{block_tensor, BlockTensor};

    fn store_with_proj(w: &[i8]) -> (WeightStore, u8) {
        let mut store = WeightStore::zeroed(&ModelConfig::default());
        let id = block_tensor(0, BlockTensor::AttnProj);
        store.load_tensor(id, w, 0.01).unwrap();
        (store, id)
    }

    #[test]
    fn test_identity_shift() {
        // W = 128 * I would overflow int8; use 64 * I and input 2x.
        let mut w = vec![0i8; 128 * 128];
        for i in 0..128 {
            w[i * 128 + i] = 64;
        }
        let (mut store, id) = store_with_proj(&w);
        let input: Vec<i8> = (0..128).map(|i| (i as i8).wrapping_sub(64)).collect();

        let mut mv = MatVecEngine::new(7);
        mv.start(id, &input, 128).unwrap();
        assert!(mv.output().is_none());
        let ticks = run_to_done(&mut mv, &mut store, 1 << 20).unwrap();
        assert_eq!(ticks, MatVecEngine::expected_ticks(128, 128));

        let out = mv.output().unwrap();
        for i in 0..128 {
            // (x * 64) >> 7 = floor(x / 2)
            assert_eq!(out[i] as i32, (input[i] as i32 * 64) >> 7, "row {}", i);
        }
    }

    #[test]
    fn test_saturates() {
        let w = vec![127i8; 128 * 128];
        let (mut store, id) = store_with_proj(&w);
        let mut mv = MatVecEngine::new(7);

        mv.start(id, &[127; 128], 4).unwrap();
        run_to_done(&mut mv, &mut store, 1 << 20).unwrap();
        assert_eq!(mv.output().unwrap(), &[127; 4]);

        mv.start(id, &[-128; 128], 4).unwrap();
        run_to_done(&mut mv, &mut store, 1 << 20).unwrap();
        assert_eq!(mv.output().unwrap(), &[-128; 4]);
    }

    #[test]
    fn test_busy_rejects_start_and_reset_clears() {
        let (mut store, id) = store_with_proj(&vec![1; 128 * 128]);
        let mut mv = MatVecEngine::new(7);
        mv.start(id, &[1; 128], 2).unwrap();
        mv.tick(&mut store);
        assert!(mv.busy());
        assert!(matches!(mv.start(id, &[1; 128], 2), Err(QfabError::Busy("matvec"))));
        mv.reset();
        assert!(!mv.busy() && !mv.done());
        assert!(mv.output().is_none());
    }

    #[test]
    fn test_empty_is_immediately_done() {
        let (mut store, id) = store_with_proj(&vec![0; 128 * 128]);
        let mut mv = MatVecEngine::new(7);
        mv.start(id, &[], 3).unwrap();
        assert_eq!(run_to_done(&mut mv, &mut store, 10).unwrap(), 0);
        assert_eq!(mv.output().unwrap(), &[0, 0, 0]);
    }
}
