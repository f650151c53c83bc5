//! In-place masked softmax over the last axis of a score tensor.

use turbine_core::{Result, Tensor, TurbineError};

use crate::common::{check_f32, check_same_ctx, f32_slice, f32_slice_mut};

/// `scores = softmax(scores * scale + mask)` over the last axis.
///
/// `scores` is `[batch, heads, q_len, k_len]`. The mask is additive: 0.0
/// keeps a position, a large negative value (-1e9 or -inf) excludes it.
/// Accepted mask shapes:
/// - `[batch, k_len]` — broadcast over heads and query positions
/// - `[batch, q_len, k_len]` — broadcast over heads
///
/// A fully-masked row softmaxes to all zeros rather than NaN.
pub fn apply_mask_and_softmax(scores: &mut Tensor, mask: &Tensor, scale: f32) -> Result<()> {
    check_same_ctx(&[&*scores, mask])?;
    check_f32(&[&*scores, mask])?;

    if scores.ndim() != 4 {
        return Err(TurbineError::RankMismatch {
            what: "attention scores",
            expected: 4,
            got: scores.ndim(),
        });
    }
    let batch = scores.dim(0)?;
    let heads = scores.dim(1)?;
    let q_len = scores.dim(2)?;
    let k_len = scores.dim(3)?;

    let per_query = match mask.shape().dims() {
        [b, k] if *b == batch && *k == k_len => false,
        [b, q, k] if *b == batch && *q == q_len && *k == k_len => true,
        _ => {
            return Err(TurbineError::ShapeMismatch {
                expected: vec![batch, q_len, k_len],
                got: mask.shape().dims().to_vec(),
            });
        }
    };

    let mask_data = f32_slice(mask)?;
    let data = f32_slice_mut(scores)?;

    for b in 0..batch {
        for h in 0..heads {
            for q in 0..q_len {
                let start = ((b * heads + h) * q_len + q) * k_len;
                let row = &mut data[start..start + k_len];
                let m_start = if per_query {
                    (b * q_len + q) * k_len
                } else {
                    b * k_len
                };
                let m_row = &mask_data[m_start..m_start + k_len];

                let mut max = f32::NEG_INFINITY;
                for (v, &m) in row.iter_mut().zip(m_row) {
                    *v = *v * scale + m;
                    max = max.max(*v);
                }

                // Every position excluded: attend to nothing.
                if max == f32::NEG_INFINITY {
                    row.fill(0.0);
                    continue;
                }

                let mut sum = 0.0f32;
                for v in row.iter_mut() {
                    *v = (*v - max).exp();
                    sum += *v;
                }
                if sum > 0.0 {
                    let inv = 1.0 / sum;
                    for v in row.iter_mut() {
                        *v *= inv;
                    }
                }
            }
        }
    }
    Ok(())
}
