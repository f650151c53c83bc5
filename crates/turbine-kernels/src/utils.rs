//! Small elementwise helpers shared by the layer pipelines.

use turbine_core::{Result, Tensor, TurbineError};

use crate::common::{check_f32, check_same_ctx, f32_slice, f32_slice_mut};

/// `out += bias`, broadcasting the bias over every row of the last axis.
pub fn add_bias(bias: &Tensor, out: &mut Tensor) -> Result<()> {
    check_same_ctx(&[bias, &*out])?;
    check_f32(&[bias, &*out])?;

    let last_dim = out.shape().last_dim();
    if bias.ndim() != 1 || bias.numel() != last_dim {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![last_dim],
            got: bias.shape().dims().to_vec(),
        });
    }

    let b = f32_slice(bias)?;
    let data = f32_slice_mut(out)?;
    for row in data.chunks_mut(last_dim) {
        for (v, &bi) in row.iter_mut().zip(b) {
            *v += bi;
        }
    }
    Ok(())
}

/// `out += residual + bias`, the residual connection fused with the bias
/// add. `residual` matches `out` elementwise, the bias broadcasts over the
/// last axis.
pub fn add_input_bias(residual: &Tensor, bias: &Tensor, out: &mut Tensor) -> Result<()> {
    check_same_ctx(&[residual, bias, &*out])?;
    check_f32(&[residual, bias, &*out])?;

    let last_dim = out.shape().last_dim();
    if residual.numel() != out.numel() {
        return Err(TurbineError::ShapeMismatch {
            expected: out.shape().dims().to_vec(),
            got: residual.shape().dims().to_vec(),
        });
    }
    if bias.ndim() != 1 || bias.numel() != last_dim {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![last_dim],
            got: bias.shape().dims().to_vec(),
        });
    }

    let r = f32_slice(residual)?;
    let b = f32_slice(bias)?;
    let data = f32_slice_mut(out)?;
    for (row_idx, row) in data.chunks_mut(last_dim).enumerate() {
        let r_row = &r[row_idx * last_dim..(row_idx + 1) * last_dim];
        for i in 0..last_dim {
            row[i] += r_row[i] + b[i];
        }
    }
    Ok(())
}

/// Elementwise copy of `src` into `dst`. Shapes may differ as long as the
/// element counts match.
pub fn copy(src: &Tensor, dst: &mut Tensor) -> Result<()> {
    check_same_ctx(&[src, &*dst])?;
    check_f32(&[src, &*dst])?;

    if src.numel() != dst.numel() {
        return Err(TurbineError::ShapeMismatch {
            expected: dst.shape().dims().to_vec(),
            got: src.shape().dims().to_vec(),
        });
    }
    let s = f32_slice(src)?;
    let d = f32_slice_mut(dst)?;
    d.copy_from_slice(s);
    Ok(())
}
