//! # qfab-core
//!
//! Numeric foundation for the qfab quantized inference fabric.
//!
//! Provides:
//! - Fixed-point formats (Q8.7 logits, Q4.7 distances, Q1.15 probabilities) with saturation
//! - Leading-one detection used by the log and reciprocal-sqrt kernels
//! - The generic requantization primitive (multiply, floor shift, clamp to int8)
//! - Pipeline tokens, fixed-depth delay lines and the tick-driven [`Block`] trait
//! - Model and numeric configuration (serde/JSON)
//! - `$readmemh`-style hex table I/O

pub mod error;
pub mod fixed;
pub mod requant;
pub mod pipeline;
pub mod config;
pub mod hex;

pub use config::{ModelConfig, NumericConfig};
pub use error::QfabError;
pub use fixed::QFormat;
pub use pipeline::{Block, DelayLine, Port, Token};
pub use requant::Requant;

pub type Result<T> = std::result::Result<T, QfabError>;
