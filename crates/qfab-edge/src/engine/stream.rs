//! Sequential reads through the weight store's port.

use qfab_core::{DelayLine, Token};

use crate::store::WeightStore;

/// One byte returned by a [`StoreStream`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element {
    pub index: usize,
    pub byte: i8,
    pub last: bool,
}

/// Issues `len` consecutive reads of one tensor, one per tick, and pairs each
/// returned byte with its index one tick later.
#[derive(Debug, Clone, Default)]
pub struct StoreStream {
    tensor: u8,
    base: usize,
    len: usize,
    issued: usize,
    inflight: DelayLine<usize, 1>,
}

impl StoreStream {
    pub fn new(tensor: u8, base: usize, len: usize) -> Self {
        Self { tensor, base, len, issued: 0, inflight: DelayLine::new() }
    }

    /// Advance one tick: consume last tick's byte, issue the next request.
    pub fn step(&mut self, store: &mut WeightStore) -> Option<Element> {
        let next = if self.issued < self.len {
            store.issue(self.tensor, self.base + self.issued);
            let tok = Token::new(self.issued, self.issued + 1 == self.len);
            self.issued += 1;
            tok
        } else {
            Token::bubble()
        };
        let arrived = self.inflight.shift(next);
        arrived.get().map(|&index| Element {
            index,
            byte: store.data().byte,
            last: arrived.last,
        })
    }

    pub fn finished(&self) -> bool {
        self.issued == self.len && !self.inflight.in_flight()
    }
}
