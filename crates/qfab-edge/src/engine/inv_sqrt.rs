//! Two-stage reciprocal square root unit.
//!
//! Stage 1 registers the leading-one decomposition `(addr, shift)`; stage 2
//! registers `LUT[addr] >> shift`. Result valid two ticks after `start`.

use std::sync::Arc;

use qfab_core::{Block, QfabError, Result, Token};
use qfab_kernels::inv_sqrt::{InvSqrtLut, ZERO_SENTINEL};

pub const LATENCY: u64 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Decomposed {
    /// `None` when the input was zero.
    lookup: Option<(usize, u32)>,
}

#[derive(Debug, Clone)]
pub struct InvSqrtUnit {
    lut: Arc<InvSqrtLut>,
    width: u32,
    input: Token<u64>,
    stage1: Token<Decomposed>,
    result: Token<u16>,
}

impl InvSqrtUnit {
    pub fn new(lut: Arc<InvSqrtLut>, width: u32) -> Self {
        Self {
            lut,
            width,
            input: Token::bubble(),
            stage1: Token::bubble(),
            result: Token::bubble(),
        }
    }

    pub fn start(&mut self, d: u64) -> Result<()> {
        if self.busy() {
            return Err(QfabError::Busy(Self::NAME));
        }
        self.load(d);
        Ok(())
    }

    /// Latch `d` into the input register, discarding anything in flight.
    pub(crate) fn load(&mut self, d: u64) {
        self.input = Token::new(d, true);
        self.stage1 = Token::bubble();
        self.result = Token::bubble();
    }

    pub fn result(&self) -> Option<u16> {
        self.result.get().copied()
    }
}

impl Block for InvSqrtUnit {
    type Port = ();
    const NAME: &'static str = "inv_sqrt";

    fn tick(&mut self, _port: &mut ()) {
        if let Some(d) = self.stage1.get() {
            let v = match d.lookup {
                Some((addr, shift)) => self.lut.lookup(addr, shift),
                None => ZERO_SENTINEL,
            };
            self.result = Token::new(v, true);
        }
        self.stage1 = match self.input.get() {
            Some(&d) => Token::new(Decomposed { lookup: InvSqrtLut::decompose(d, self.width) }, true),
            None => Token::bubble(),
        };
        self.input = Token::bubble();
    }

    fn busy(&self) -> bool {
        self.input.valid || self.stage1.valid
    }

    fn done(&self) -> bool {
        self.result.valid
    }

    fn reset(&mut self) {
        self.input = Token::bubble();
        self.stage1 = Token::bubble();
        self.result = Token::bubble();
    }
}
