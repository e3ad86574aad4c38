//! Token + position embedding lookup.
//!
//! Reads the token row, then the position row (back to back, never
//! overlapped on the store port), and emits `(tok[i] + pos[i]) >> 1`.

use qfab_core::{Block, QfabError, Result};

use super::matvec::FILL_LATENCY;
use super::stream::StoreStream;
use crate::store::WeightStore;
use crate::tensor_map::{POS_EMB, TOK_EMB};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Token,
    Position,
    Done,
}

#[derive(Debug, Clone)]
pub struct EmbeddingEngine {
    dim: usize,
    phase: Phase,
    position: u8,
    tok: Vec<i8>,
    output: Vec<i8>,
    stream: StoreStream,
}

impl EmbeddingEngine {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            phase: Phase::Idle,
            position: 0,
            tok: vec![0; dim],
            output: vec![0; dim],
            stream: StoreStream::default(),
        }
    }

    pub fn expected_ticks(dim: usize) -> u64 {
        2 * (dim as u64 + FILL_LATENCY)
    }

    pub fn start(&mut self, token: u8, position: u8) -> Result<()> {
        if self.busy() {
            return Err(QfabError::Busy(Self::NAME));
        }
        self.position = position;
        self.stream = StoreStream::new(TOK_EMB, token as usize * self.dim, self.dim);
        self.phase = Phase::Token;
        tracing::debug!("embedding start: token={} pos={}", token, position);
        Ok(())
    }

    pub fn output(&self) -> Option<&[i8]> {
        (self.phase == Phase::Done).then_some(self.output.as_slice())
    }
}

impl Block for EmbeddingEngine {
    type Port = WeightStore;
    const NAME: &'static str = "embedding";

    fn tick(&mut self, store: &mut WeightStore) {
        match self.phase {
            Phase::Idle | Phase::Done => {}
            Phase::Token => {
                if let Some(e) = self.stream.step(store) {
                    self.tok[e.index] = e.byte;
                    if e.last {
                        self.stream = StoreStream::new(POS_EMB, self.position as usize * self.dim, self.dim);
                        self.phase = Phase::Position;
                    }
                }
            }
            Phase::Position => {
                if let Some(e) = self.stream.step(store) {
                    let sum = self.tok[e.index] as i16 + e.byte as i16;
                    self.output[e.index] = (sum >> 1) as i8;
                    if e.last {
                        self.phase = Phase::Done;
                    }
                }
            }
        }
    }

    fn busy(&self) -> bool {
        matches!(self.phase, Phase::Token | Phase::Position)
    }

    fn done(&self) -> bool {
        self.phase == Phase::Done
    }

    fn reset(&mut self) {
        self.stream = StoreStream::default();
        self.phase = Phase::Idle;
    }
}
