//! Additive attention masks.
//!
//! All masks are f32 tensors in the additive convention the score kernel
//! expects: 0.0 keeps a position, a large negative value excludes it.

use turbine_core::Tensor;

const MASKED: f32 = -1e9;

/// Padding mask `[batch, max_len]` from per-sequence lengths.
///
/// Positions `>= lengths[b]` are excluded. Lengths longer than `max_len`
/// are clamped.
pub fn padding_mask(lengths: &[usize], max_len: usize) -> Tensor {
    let batch = lengths.len();
    let mut data = vec![MASKED; batch * max_len];
    for (b, &len) in lengths.iter().enumerate() {
        let keep = len.min(max_len);
        data[b * max_len..b * max_len + keep].fill(0.0);
    }
    Tensor::from_f32(&data, &[batch, max_len])
}

/// Causal mask `[batch, seq_len, seq_len]`: query position `q` may attend
/// to key positions `<= q`.
pub fn causal_mask(batch: usize, seq_len: usize) -> Tensor {
    let mut data = vec![MASKED; batch * seq_len * seq_len];
    for b in 0..batch {
        for q in 0..seq_len {
            let start = (b * seq_len + q) * seq_len;
            data[start..start + q + 1].fill(0.0);
        }
    }
    Tensor::from_f32(&data, &[batch, seq_len, seq_len])
}
