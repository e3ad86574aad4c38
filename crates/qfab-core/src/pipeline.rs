//! Tick-level pipeline primitives.
//!
//! Every block in the fabric is a synchronous state machine that advances
//! exactly one step per [`Block::tick`]. Data in flight between stages travels
//! as a [`Token`] carrying `valid` and `last` flags; a [`DelayLine`] models a
//! chain of registered stages with fixed latency.

use crate::error::QfabError;
use crate::Result;

/// A datum in flight through a multi-stage block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<T> {
    pub valid: bool,
    /// Last element of the current pass.
    pub last: bool,
    pub data: T,
}

impl<T: Default> Token<T> {
    /// An empty (bubble) slot.
    pub fn bubble() -> Self {
        Self { valid: false, last: false, data: T::default() }
    }
}

impl<T: Default> Default for Token<T> {
    fn default() -> Self {
        Self::bubble()
    }
}

impl<T> Token<T> {
    pub fn new(data: T, last: bool) -> Self {
        Self { valid: true, last, data }
    }

    /// The payload if the slot holds a valid datum.
    pub fn get(&self) -> Option<&T> {
        self.valid.then_some(&self.data)
    }
}

/// A chain of `D` registered stages.
///
/// Each [`DelayLine::shift`] admits one token and returns the token that was
/// admitted `D` shifts earlier.
#[derive(Debug, Clone)]
pub struct DelayLine<T, const D: usize> {
    stages: [Token<T>; D],
}

impl<T: Copy + Default, const D: usize> DelayLine<T, D> {
    pub fn new() -> Self {
        Self { stages: [Token::bubble(); D] }
    }

    /// Advance one tick.
    pub fn shift(&mut self, input: Token<T>) -> Token<T> {
        if D == 0 {
            return input;
        }
        let out = self.stages[D - 1];
        for i in (1..D).rev() {
            self.stages[i] = self.stages[i - 1];
        }
        self.stages[0] = input;
        out
    }

    /// True when any stage holds a valid token.
    pub fn in_flight(&self) -> bool {
        self.stages.iter().any(|t| t.valid)
    }

    /// Drop every token in flight.
    pub fn flush(&mut self) {
        self.stages = [Token::bubble(); D];
    }

    pub const fn latency(&self) -> usize {
        D
    }
}

impl<T: Copy + Default, const D: usize> Default for DelayLine<T, D> {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared resource a block touches every tick (e.g. the weight store's
/// read port). `clock` registers the resource's outputs at the tick edge,
/// after every block attached to it has ticked.
pub trait Port {
    fn clock(&mut self) {}

    /// Drop pending requests and registered outputs. Stored contents persist.
    fn flush(&mut self) {}
}

/// Blocks that need no shared resource.
impl Port for () {}

/// A tick-driven block with start/busy/done handshaking.
pub trait Block {
    type Port: Port;

    /// Short name used in logs and errors.
    const NAME: &'static str;

    /// Advance the state machine by one tick.
    fn tick(&mut self, port: &mut Self::Port);

    /// High from the tick after `start` until `done`.
    fn busy(&self) -> bool;

    /// High once the pass has completed and results are observable.
    fn done(&self) -> bool;

    /// Return to idle, discarding in-flight tokens and partial accumulators.
    fn reset(&mut self);
}

/// Tick a block (and clock its port) until it reports `done`.
///
/// Returns the number of ticks taken. A block that is not busy is already
/// done and takes zero ticks.
pub fn run_to_done<B: Block>(block: &mut B, port: &mut B::Port, limit: u64) -> Result<u64> {
    let mut ticks = 0u64;
    while block.busy() {
        if ticks == limit {
            return Err(QfabError::TickBudget { block: B::NAME, limit });
        }
        block.tick(port);
        port.clock();
        ticks += 1;
    }
    Ok(ticks)
}
