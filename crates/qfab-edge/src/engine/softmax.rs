//! Streaming SafeSoftmax engine.
//!
//! Passes, one element per tick:
//!
//! | pass       | ticks  | work                                                 |
//! |------------|--------|------------------------------------------------------|
//! | load       | N      | buffer input, track running max                      |
//! | accumulate | N + 2  | distance → bipartite exp → 24-bit saturating sum     |
//! | log        | 2      | LOD + mantissa, then `(k-15)·ln2 + ln1p[m]`          |
//! | normalize  | N + 1  | distance + offset → bipartite exp → output           |
//!
//! Output is bit-identical to [`qfab_kernels::softmax::softmax_q15`].

use std::sync::Arc;

use qfab_core::fixed::saturate_unsigned;
use qfab_core::{Block, DelayLine, QfabError, Result, Token};
use qfab_kernels::softmax::{distance, log_from_lod, log_lod, normalized_distance};
use qfab_kernels::ExpLut;

/// Distance register + exp table read in the accumulate pass.
const ACC_DEPTH: usize = 2;
/// Exp table read in the normalize pass.
const NORM_DEPTH: usize = 1;
const LOG_TICKS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Load,
    Accumulate,
    LogLod,
    LogSum,
    Normalize,
    Done,
}

#[derive(Debug, Clone)]
pub struct SoftmaxEngine {
    lut: Arc<ExpLut>,
    sum_width: u32,
    phase: Phase,
    pending: Vec<i16>,
    buf: Vec<i16>,
    max: i16,
    index: usize,
    sum: u64,
    lod: Option<(u32, usize)>,
    offset: u16,
    acc_pipe: DelayLine<u16, ACC_DEPTH>,
    norm_pipe: DelayLine<(usize, u16), NORM_DEPTH>,
    output: Vec<u16>,
}

impl SoftmaxEngine {
    pub fn new(lut: Arc<ExpLut>, sum_width: u32) -> Self {
        Self {
            lut,
            sum_width,
            phase: Phase::Idle,
            pending: Vec::new(),
            buf: Vec::new(),
            max: i16::MIN,
            index: 0,
            sum: 0,
            lod: None,
            offset: 0,
            acc_pipe: DelayLine::new(),
            norm_pipe: DelayLine::new(),
            output: Vec::new(),
        }
    }

    /// Ticks from the last admitted input to `done`.
    pub fn drain_ticks(n: usize) -> u64 {
        2 * n as u64 + ACC_DEPTH as u64 + LOG_TICKS + NORM_DEPTH as u64
    }

    /// Ticks from `start` to `done`, including the load pass.
    pub fn expected_ticks(n: usize) -> u64 {
        if n == 0 {
            0
        } else {
            n as u64 + Self::drain_ticks(n)
        }
    }

    /// Begin a pass over `x` (Q8.7). Inputs are admitted one per tick.
    pub fn start(&mut self, x: &[i16]) -> Result<()> {
        if self.busy() {
            return Err(QfabError::Busy(Self::NAME));
        }
        self.pending = x.to_vec();
        self.buf.clear();
        self.output = vec![0; x.len()];
        self.max = i16::MIN;
        self.sum = 0;
        self.index = 0;
        self.phase = if x.is_empty() { Phase::Done } else { Phase::Load };
        tracing::debug!("softmax start: n={}", x.len());
        Ok(())
    }

    pub fn output(&self) -> Option<&[u16]> {
        (self.phase == Phase::Done).then_some(self.output.as_slice())
    }

    /// Saturated exp sum and log offset of the last pass.
    pub fn sum_and_offset(&self) -> (u64, u16) {
        (self.sum, self.offset)
    }

    /// Next buffered element as a token, or a bubble once all have issued.
    fn next_element(&mut self) -> Option<(usize, i16, bool)> {
        let n = self.buf.len();
        (self.index < n).then(|| {
            let i = self.index;
            self.index += 1;
            (i, self.buf[i], i + 1 == n)
        })
    }
}

impl Block for SoftmaxEngine {
    type Port = ();
    const NAME: &'static str = "softmax";

    fn tick(&mut self, _port: &mut ()) {
        match self.phase {
            Phase::Idle | Phase::Done => {}
            Phase::Load => {
                let x = self.pending[self.buf.len()];
                self.max = self.max.max(x);
                self.buf.push(x);
                if self.buf.len() == self.pending.len() {
                    self.index = 0;
                    self.phase = Phase::Accumulate;
                }
            }
            Phase::Accumulate => {
                let input = match self.next_element() {
                    Some((_, x, last)) => {
                        let (d, _) = distance(self.max, x);
                        Token::new(self.lut.eval(d), last)
                    }
                    None => Token::bubble(),
                };
                let out = self.acc_pipe.shift(input);
                if let Some(&e) = out.get() {
                    self.sum = saturate_unsigned(self.sum + e as u64, self.sum_width);
                    if out.last {
                        self.phase = Phase::LogLod;
                    }
                }
            }
            Phase::LogLod => {
                self.lod = log_lod(self.sum);
                self.phase = Phase::LogSum;
            }
            Phase::LogSum => {
                self.offset = log_from_lod(self.lod);
                tracing::trace!("softmax max={} sum={} offset={}", self.max, self.sum, self.offset);
                self.index = 0;
                self.phase = Phase::Normalize;
            }
            Phase::Normalize => {
                let input = match self.next_element() {
                    Some((i, x, last)) => {
                        let (d, clipped) = distance(self.max, x);
                        let p = self.lut.eval(normalized_distance(d, clipped, self.offset));
                        Token::new((i, p), last)
                    }
                    None => Token::bubble(),
                };
                let out = self.norm_pipe.shift(input);
                if let Some(&(i, p)) = out.get() {
                    self.output[i] = p;
                    if out.last {
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
        self.acc_pipe.flush();
        self.norm_pipe.flush();
        self.pending.clear();
        self.buf.clear();
        self.index = 0;
        self.sum = 0;
        self.lod = None;
        self.phase = Phase::Idle;
    }
}
