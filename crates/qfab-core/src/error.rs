//! Error type for the I/O and configuration boundary.
//!
//! The numeric kernels never fail: every edge case there is a saturation
//! policy. Errors only come from loading containers and tables, validating
//! configuration, and driving blocks under a tick budget.

/// Errors raised outside the numeric core.
#[derive(Debug, thiserror::Error)]
pub enum QfabError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: String, found: String },

    #[error("container truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated { offset: usize, needed: usize, available: usize },

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("table '{table}' has {got} entries, expected {expected}")]
    TableSize { table: String, expected: usize, got: usize },

    #[error("hex parse error on line {line}: {msg}")]
    HexParse { line: usize, msg: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("tensor {id} ('{name}'): expected {expected} elements, got {got}")]
    TensorSize { id: usize, name: String, expected: usize, got: usize },

    #[error("KV key out of range: {0}")]
    KeyOutOfRange(String),

    #[error("block '{block}' did not finish within {limit} ticks")]
    TickBudget { block: &'static str, limit: u64 },

    #[error("block '{0}' started while busy")]
    Busy(&'static str),
}
