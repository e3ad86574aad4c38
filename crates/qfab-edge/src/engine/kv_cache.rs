//! Banked int8 key/value cache.
//!
//! 64 banks indexed by `{layer[1:0], sel, head[2:0]}`; within a bank the
//! address is `{pos[7:0], dim[3:0]}`. Reads return two clocks after issue.
//! A write and a read of the same key in the same tick return the written
//! value. Contents persist across compute resets.

use qfab_core::{Port, QfabError, Result, Token};

pub const LAYERS: usize = 4;
pub const HEADS: usize = 8;
pub const POSITIONS: usize = 256;
pub const DIMS: usize = 16;
pub const BANKS: usize = LAYERS * 2 * HEADS;
pub const BANK_DEPTH: usize = POSITIONS * DIMS;
pub const READ_LATENCY: u64 = 2;

/// Key or value half of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KvSel {
    #[default]
    Key = 0,
    Value = 1,
}

/// A validated cache coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KvKey {
    layer: u8,
    sel: KvSel,
    head: u8,
    pos: u8,
    dim: u8,
}

impl KvKey {
    pub fn new(layer: usize, sel: KvSel, head: usize, pos: usize, dim: usize) -> Result<Self> {
        let check = |what: &str, v: usize, n: usize| {
            if v < n {
                Ok(v as u8)
            } else {
                Err(QfabError::KeyOutOfRange(format!("{} {} not below {}", what, v, n)))
            }
        };
        Ok(Self {
            layer: check("layer", layer, LAYERS)?,
            sel,
            head: check("head", head, HEADS)?,
            pos: check("position", pos, POSITIONS)?,
            dim: check("dim", dim, DIMS)?,
        })
    }

    pub fn bank(&self) -> usize {
        ((self.layer as usize) << 4) | ((self.sel as usize) << 3) | self.head as usize
    }

    pub fn addr(&self) -> usize {
        ((self.pos as usize) << 4) | self.dim as usize
    }
}

#[derive(Debug, Clone)]
pub struct KvCache {
    banks: Vec<Box<[i8; BANK_DEPTH]>>,
    write: Option<(KvKey, i8)>,
    read: Option<KvKey>,
    stage1: Token<i8>,
    out: Token<i8>,
}

impl Default for KvCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KvCache {
    pub fn new() -> Self {
        Self {
            banks: (0..BANKS).map(|_| Box::new([0i8; BANK_DEPTH])).collect(),
            write: None,
            read: None,
            stage1: Token::bubble(),
            out: Token::bubble(),
        }
    }

    /// Present a write for this tick.
    pub fn write(&mut self, key: KvKey, value: i8) {
        self.write = Some((key, value));
    }

    /// Present a read for this tick.
    pub fn read(&mut self, key: KvKey) {
        self.read = Some(key);
    }

    /// Read data issued two clocks ago.
    pub fn data(&self) -> Option<i8> {
        self.out.get().copied()
    }

    /// Combinational read, bypassing the read pipeline.
    pub fn peek(&self, key: KvKey) -> i8 {
        self.banks[key.bank()][key.addr()]
    }

    /// Zero every entry (session reset).
    pub fn clear(&mut self) {
        for bank in &mut self.banks {
            bank.fill(0);
        }
        self.flush();
        tracing::debug!("kv cache cleared");
    }
}

impl Port for KvCache {
    fn clock(&mut self) {
        // The write lands before the same-tick read samples the array.
        if let Some((key, value)) = self.write.take() {
            self.banks[key.bank()][key.addr()] = value;
        }
        self.out = self.stage1;
        self.stage1 = match self.read.take() {
            Some(key) => Token::new(self.peek(key), true),
            None => Token::bubble(),
        };
    }

    fn flush(&mut self) {
        self.write = None;
        self.read = None;
        self.stage1 = Token::bubble();
        self.out = Token::bubble();
    }
}
