//! Benchmark: self vs cross attention forward passes, and the cost of the
//! first call (scratch allocation) vs steady state.

use std::time::Instant;

use turbine_core::Tensor;
use turbine_layers::{padding_mask, AttentionKind, AttentionWeights, MultiHeadedAttention};

fn synth(n: usize, seed: usize) -> Vec<f32> {
    (0..n)
        .map(|i| ((i * 7 + seed) % 13) as f32 * 0.1 - 0.6)
        .collect()
}

fn build_module(hidden: usize, heads: usize) -> MultiHeadedAttention {
    let w = |seed| Tensor::from_f32(&synth(hidden * hidden, seed), &[hidden, hidden]);
    let b = |seed| Tensor::from_f32(&synth(hidden, seed), &[hidden]);
    let mut weights = AttentionWeights::new(
        w(3),
        b(5),
        w(7),
        b(11),
        w(13),
        b(17),
        w(19),
        b(23),
    );
    weights.fuse_qkv().unwrap();
    MultiHeadedAttention::new(weights, heads)
        .unwrap()
        .with_private_scratch()
}

fn bench_forward(
    attn: &MultiHeadedAttention,
    kind: AttentionKind,
    batch: usize,
    seq: usize,
    hidden: usize,
    iters: usize,
) -> f64 {
    let x = Tensor::from_f32(&synth(batch * seq * hidden, 29), &[batch, seq, hidden]);
    let mask = padding_mask(&vec![seq; batch], seq);
    let mut out = Tensor::empty(x.device_ctx());

    let start = Instant::now();
    for _ in 0..iters {
        attn.forward(&x, &x, &x, &mask, kind, false, false, &mut out)
            .unwrap();
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn main() {
    let (hidden, heads, batch) = (256, 8, 4);
    println!("=== Turbine Attention Benchmark ===");
    println!("hidden={hidden} heads={heads} batch={batch}\n");

    println!(
        "{:<12} {:>12} {:>12} {:>12}",
        "SeqLen", "First (ms)", "Self (ms)", "Cross (ms)"
    );
    println!("{}", "-".repeat(52));

    for &seq in &[16usize, 32, 64, 128] {
        let iters = if seq <= 32 { 50 } else { 10 };

        // fresh module: the first call pays for every scratch allocation
        let attn = build_module(hidden, heads);
        let first_s = bench_forward(&attn, AttentionKind::SelfAttention, batch, seq, hidden, 1);

        let self_s = bench_forward(&attn, AttentionKind::SelfAttention, batch, seq, hidden, iters);
        let cross_s = bench_forward(&attn, AttentionKind::CrossAttention, batch, seq, hidden, iters);

        println!(
            "{:<12} {:>10.3}ms {:>10.3}ms {:>10.3}ms",
            format!("seq={}", seq),
            first_s * 1000.0,
            self_s * 1000.0,
            cross_s * 1000.0,
        );
    }
}
