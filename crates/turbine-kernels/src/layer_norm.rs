//! In-place layer normalization over the last axis.

use turbine_core::{Result, Tensor, TurbineError};

use crate::common::{check_f32, check_same_ctx, f32_slice, f32_slice_mut};

/// `x = (x - mean) / sqrt(var + eps) * gamma + beta`, rowwise over the
/// last axis. Mean and variance come from Welford's single-pass update.
pub fn layer_norm(gamma: &Tensor, beta: &Tensor, x: &mut Tensor, eps: f32) -> Result<()> {
    check_same_ctx(&[gamma, beta, x])?;
    check_f32(&[gamma, beta, x])?;

    let last_dim = x.shape().last_dim();
    if gamma.ndim() != 1 || beta.ndim() != 1 {
        return Err(TurbineError::RankMismatch {
            what: "layer_norm gamma/beta",
            expected: 1,
            got: gamma.ndim().max(beta.ndim()),
        });
    }
    if gamma.numel() != last_dim || beta.numel() != last_dim {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![last_dim],
            got: vec![gamma.numel(), beta.numel()],
        });
    }

    let g = f32_slice(gamma)?;
    let b = f32_slice(beta)?;
    let data = f32_slice_mut(x)?;

    for row in data.chunks_mut(last_dim) {
        // Welford's online mean/variance in one pass
        let mut mean = 0.0f32;
        let mut m2 = 0.0f32;
        for (i, &v) in row.iter().enumerate() {
            let delta = v - mean;
            mean += delta / (i + 1) as f32;
            m2 += delta * (v - mean);
        }
        let var = m2 / last_dim as f32;
        let inv_std = 1.0 / (var + eps).sqrt();

        for i in 0..last_dim {
            row[i] = (row[i] - mean) * inv_std * g[i] + b[i];
        }
    }
    Ok(())
}
