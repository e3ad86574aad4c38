//! Tick-driven compute blocks and memories.

pub mod activation;
pub mod embedding;
pub mod inv_sqrt;
pub mod kv_cache;
pub mod layernorm;
pub mod matvec;
pub mod softmax;
pub mod stream;

pub use activation::ActivationTable;
pub use embedding::EmbeddingEngine;
pub use inv_sqrt::InvSqrtUnit;
pub use kv_cache::{KvCache, KvKey, KvSel};
pub use layernorm::LayerNormEngine;
pub use matvec::MatVecEngine;
pub use softmax::SoftmaxEngine;
