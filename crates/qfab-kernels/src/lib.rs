//! # qfab-kernels
//!
//! Bit-exact, division-free numeric kernels and the tables that drive them.
//!
//! Provides:
//! - LOD-LUT-shift reciprocal square root (512-entry Q1.15 table)
//! - Bipartite `exp(-d)` over Q4.7 distances (two 256-entry tables)
//! - Log-domain softmax normalization (LOD + 16-entry `ln(1+m/16)` table)
//! - Per-block GELU lookup tables calibrated from activation scales
//! - Floating-point reference models used to bound approximation error
//!
//! Everything here is a pure function of its inputs and tables; the tick
//! engines in `qfab-edge` wrap these kernels with latency and handshaking.

pub mod inv_sqrt;
pub mod exp_lut;
pub mod softmax;
pub mod gelu;
pub mod reference;

pub use exp_lut::ExpLut;
pub use gelu::GeluLut;
pub use inv_sqrt::InvSqrtLut;
