//! # qfab-edge
//!
//! Tick-accurate model of a quantized GPT inference fabric.
//!
//! ## Key Features
//! - `TFPGA001` int8 weight container with manifest and canonical tensor ids
//! - Weight store with a single registered read port and shared LayerNorm memory
//! - Streaming engines: matvec, LayerNorm, SafeSoftmax, embedding, reciprocal sqrt
//! - 64-bank KV cache and per-block GELU table with fixed read latencies
//! - [`Fabric`] session that drives blocks to completion and counts ticks

pub mod engine;
pub mod fabric;
pub mod format;
pub mod loader;
pub mod store;
pub mod tensor_map;

pub use engine::{KvKey, KvSel};
pub use fabric::{Fabric, Pass};
pub use format::{Container, RawTensor};
pub use loader::LutSet;
pub use store::{ReadData, WeightStore};
pub use tensor_map::{TensorMap, TensorInfo};
