//! Head-split and head-merge layout transforms, fused with bias add.
//!
//! Attention needs projections in head-major layout
//! `[batch, heads, seq, head_size]` for the per-head batched products, and
//! the weighted sum back in `[batch, seq, hidden]` for the output
//! projection. These kernels move the data once and fold the projection
//! bias into the same pass.

use turbine_core::{Result, Tensor, TurbineError};

use crate::common::{check_f32, check_same_ctx, f32_slice, f32_slice_mut};

/// `out[b][n][s][d] = input[b][s][n][d] + bias[n*hs + d]`
///
/// `input` is a projected tensor re-labeled `[batch, seq, heads, head_size]`,
/// `bias` is the flat `[hidden]` projection bias, `out` is head-major
/// `[batch, heads, seq, head_size]`.
pub fn add_bias_transpose_for_score(input: &Tensor, bias: &Tensor, out: &mut Tensor) -> Result<()> {
    check_same_ctx(&[input, bias, &*out])?;
    check_f32(&[input, bias, &*out])?;

    if input.ndim() != 4 || out.ndim() != 4 {
        return Err(TurbineError::RankMismatch {
            what: "add_bias_transpose_for_score operand",
            expected: 4,
            got: input.ndim().min(out.ndim()),
        });
    }
    let (b, s, heads, hs) = (input.dim(0)?, input.dim(1)?, input.dim(2)?, input.dim(3)?);
    if out.shape().dims() != [b, heads, s, hs] {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![b, heads, s, hs],
            got: out.shape().dims().to_vec(),
        });
    }
    if bias.numel() != heads * hs {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![heads * hs],
            got: vec![bias.numel()],
        });
    }

    let in_data = f32_slice(input)?;
    let bias_data = f32_slice(bias)?;
    let out_data = f32_slice_mut(out)?;

    for bi in 0..b {
        for si in 0..s {
            for n in 0..heads {
                let src = ((bi * s + si) * heads + n) * hs;
                let dst = ((bi * heads + n) * s + si) * hs;
                let bias_off = n * hs;
                for d in 0..hs {
                    out_data[dst + d] = in_data[src + d] + bias_data[bias_off + d];
                }
            }
        }
    }
    Ok(())
}

/// Split the fused QKV projection, add biases, and transpose to head-major.
///
/// `input` is the fused projection labeled `[3, batch, seq, hidden]`; its
/// storage holds the GEMM result row-major `[batch*seq, 3*hidden]` with the
/// columns grouped q|k|v (see `AttentionWeights::fuse_qkv`). `bias` is the
/// fused `[3*hidden]` bias in the same grouping. `out` becomes
/// `[3, batch, heads, seq, head_size]`; its leading-dimension slices are
/// the head-major query, key, and value.
pub fn split_add_bias_transpose_for_score(
    input: &Tensor,
    bias: &Tensor,
    out: &mut Tensor,
) -> Result<()> {
    check_same_ctx(&[input, bias, &*out])?;
    check_f32(&[input, bias, &*out])?;

    if input.ndim() != 4 || out.ndim() != 5 {
        return Err(TurbineError::RankMismatch {
            what: "split_add_bias_transpose_for_score operand",
            expected: 4,
            got: input.ndim(),
        });
    }
    let (three, b, s, hidden) = (input.dim(0)?, input.dim(1)?, input.dim(2)?, input.dim(3)?);
    let (heads, hs) = (out.dim(2)?, out.dim(4)?);
    if three != 3 || out.shape().dims() != [3, b, heads, s, hs] || heads * hs != hidden {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![3, b, heads, s, hidden / heads.max(1)],
            got: out.shape().dims().to_vec(),
        });
    }
    if bias.numel() != 3 * hidden {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![3 * hidden],
            got: vec![bias.numel()],
        });
    }

    let in_data = f32_slice(input)?;
    let bias_data = f32_slice(bias)?;
    let out_data = f32_slice_mut(out)?;

    for j in 0..3 {
        for bi in 0..b {
            for si in 0..s {
                // fused GEMM row for (bi, si), column group j
                let src = (bi * s + si) * 3 * hidden + j * hidden;
                let bias_off = j * hidden;
                for n in 0..heads {
                    let dst = (((j * b + bi) * heads + n) * s + si) * hs;
                    for d in 0..hs {
                        let col = n * hs + d;
                        out_data[dst + d] = in_data[src + col] + bias_data[bias_off + col];
                    }
                }
            }
        }
    }
    Ok(())
}

/// Inverse head transpose: merge heads back into the hidden dimension.
///
/// `input` is `[batch, heads, seq, head_size]`, `out` becomes
/// `[batch, seq, hidden]` with `out[b][s][n*hs + d] = input[b][n][s][d]`.
pub fn transpose_for_score(input: &Tensor, out: &mut Tensor) -> Result<()> {
    check_same_ctx(&[input, &*out])?;
    check_f32(&[input, &*out])?;

    if input.ndim() != 4 || out.ndim() != 3 {
        return Err(TurbineError::RankMismatch {
            what: "transpose_for_score operand",
            expected: 4,
            got: input.ndim(),
        });
    }
    let (b, heads, s, hs) = (input.dim(0)?, input.dim(1)?, input.dim(2)?, input.dim(3)?);
    if out.shape().dims() != [b, s, heads * hs] {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![b, s, heads * hs],
            got: out.shape().dims().to_vec(),
        });
    }

    let in_data = f32_slice(input)?;
    let out_data = f32_slice_mut(out)?;
    let hidden = heads * hs;

    for bi in 0..b {
        for n in 0..heads {
            for si in 0..s {
                let src = ((bi * heads + n) * s + si) * hs;
                let dst = (bi * s + si) * hidden + n * hs;
                out_data[dst..dst + hs].copy_from_slice(&in_data[src..src + hs]);
            }
        }
    }
    Ok(())
}
