//! Benchmark: wall-clock cost of simulating each block, and simulated ticks.

use std::time::Instant;

use qfab_core::ModelConfig;
use qfab_edge::tensor_map::{block_tensor, BlockTensor};
use qfab_edge::Fabric;
use qfab_kernels::softmax::softmax_q15;
use qfab_kernels::ExpLut;

fn time<F: FnMut() -> u64>(iters: usize, mut f: F) -> (f64, u64) {
    let start = Instant::now();
    let mut ticks = 0;
    for _ in 0..iters {
        ticks = f();
    }
    (start.elapsed().as_secs_f64() / iters as f64, ticks)
}

fn report(name: &str, secs: f64, ticks: u64) {
    let mtps = if secs > 0.0 { ticks as f64 / secs / 1e6 } else { 0.0 };
    println!("{:<28} {:>10.1} us  {:>8} ticks  {:>8.1} Mtick/s", name, secs * 1e6, ticks, mtps);
}

fn main() {
    let cfg = ModelConfig::default();
    let mut fab = match Fabric::with_zero_weights(cfg) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("failed to build fabric: {}", e);
            return;
        }
    };

    println!("=== qfab Fabric Benchmark ===\n");

    let x: Vec<i8> = (0..128).map(|i| (i as i8).wrapping_mul(5)).collect();
    let logits: Vec<i16> = (0..256).map(|i| ((i * 97) % 4096) as i16 - 2048).collect();

    let (s, t) = time(20, || fab.embed(17, 3).map(|p| p.ticks).unwrap_or(0));
    report("embedding", s, t);

    let gamma = block_tensor(0, BlockTensor::Ln1Weight);
    let (s, t) = time(20, || fab.layernorm(&x, gamma).map(|p| p.ticks).unwrap_or(0));
    report("layernorm 128", s, t);

    for (name, id, out) in [
        ("matvec qkv 384x128", block_tensor(0, BlockTensor::AttnQkv), 384),
        ("matvec ff_up 512x128", block_tensor(0, BlockTensor::FfUp), 512),
        ("matvec head 256x128", 0, 256),
    ] {
        let (s, t) = time(5, || fab.matvec(id, &x, out).map(|p| p.ticks).unwrap_or(0));
        report(name, s, t);
    }

    let (s, t) = time(20, || fab.softmax(&logits).map(|p| p.ticks).unwrap_or(0));
    report("softmax 256 (engine)", s, t);

    let lut = ExpLut::analytical();
    let start = Instant::now();
    for _ in 0..200 {
        std::hint::black_box(softmax_q15(std::hint::black_box(&logits), &lut, 24));
    }
    report("softmax 256 (golden)", start.elapsed().as_secs_f64() / 200.0, 0);

    println!("\ntotal simulated ticks: {}", fab.total_ticks());
}
