//! GEMM kernels: `out = alpha * op(A) * op(B) + beta * out`.
//!
//! Scalar loops with the cache-friendly i-p-j ordering (the B row stays hot
//! in the inner loop). `matmul` is the projection workhorse: A may carry
//! leading batch dimensions which are flattened into rows, B is a 2-D
//! weight. `batch_matmul` runs one GEMM per leading-dimension batch entry
//! and is used for the per-head score and context products.

use turbine_core::{Result, Tensor, TurbineError};

use crate::common::{check_f32, check_same_ctx, f32_slice, f32_slice_mut};

/// Matrix multiply into `out`.
///
/// `a` is treated as `[rows, k]` with all leading dimensions flattened
/// into `rows` (rank ≥ 2); `b` must be rank 2. `trans_a` is only valid for
/// rank-2 `a`. `out` must hold exactly `rows_op * n` elements; it is
/// addressed row-major regardless of its logical shape, which lets the
/// fused-QKV buffer keep its `[3, batch, seq, hidden]` label while the
/// GEMM writes `[batch*seq, 3*hidden]`.
pub fn matmul(
    a: &Tensor,
    trans_a: bool,
    b: &Tensor,
    trans_b: bool,
    alpha: f32,
    out: &mut Tensor,
    beta: f32,
) -> Result<()> {
    check_same_ctx(&[a, b, out])?;
    check_f32(&[a, b, out])?;

    if a.ndim() < 2 {
        return Err(TurbineError::RankMismatch {
            what: "matmul lhs",
            expected: 2,
            got: a.ndim(),
        });
    }
    if b.ndim() != 2 {
        return Err(TurbineError::RankMismatch {
            what: "matmul rhs",
            expected: 2,
            got: b.ndim(),
        });
    }
    if trans_a && a.ndim() != 2 {
        return Err(TurbineError::InvalidArgument(
            "matmul: trans_a requires a rank-2 lhs".into(),
        ));
    }

    let a_last = a.shape().last_dim();
    let (m, k) = if trans_a {
        (a_last, a.dim(0)?)
    } else {
        (a.numel() / a_last, a_last)
    };
    let (bk, n) = if trans_b {
        (b.dim(1)?, b.dim(0)?)
    } else {
        (b.dim(0)?, b.dim(1)?)
    };
    if k != bk {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![m, k],
            got: vec![bk, n],
        });
    }
    if out.numel() != m * n {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![m, n],
            got: out.shape().dims().to_vec(),
        });
    }

    let a_data = f32_slice(a)?;
    let b_data = f32_slice(b)?;
    let out_data = f32_slice_mut(out)?;

    gemm(
        a_data, trans_a, b_data, trans_b, m, n, k, alpha, out_data, beta,
    );
    Ok(())
}

/// Batched matrix multiply: one GEMM per entry of the leading dimensions.
///
/// `a`, `b`, and `out` must share rank (≥ 3) and leading (batch)
/// dimensions; the last two dimensions of each are the per-batch matrices.
pub fn batch_matmul(
    a: &Tensor,
    trans_a: bool,
    b: &Tensor,
    trans_b: bool,
    alpha: f32,
    out: &mut Tensor,
    beta: f32,
) -> Result<()> {
    check_same_ctx(&[a, b, out])?;
    check_f32(&[a, b, out])?;

    let rank = a.ndim();
    if rank < 3 {
        return Err(TurbineError::RankMismatch {
            what: "batch_matmul lhs",
            expected: 3,
            got: rank,
        });
    }
    if b.ndim() != rank || out.ndim() != rank {
        return Err(TurbineError::RankMismatch {
            what: "batch_matmul rhs/out",
            expected: rank,
            got: b.ndim().min(out.ndim()),
        });
    }

    let a_dims = a.shape().dims();
    let b_dims = b.shape().dims();
    let out_dims = out.shape().dims();
    let batch_dims = &a_dims[..rank - 2];
    if &b_dims[..rank - 2] != batch_dims || &out_dims[..rank - 2] != batch_dims {
        return Err(TurbineError::ShapeMismatch {
            expected: a_dims.to_vec(),
            got: b_dims.to_vec(),
        });
    }
    let batch: usize = batch_dims.iter().product();

    let (m, k) = if trans_a {
        (a_dims[rank - 1], a_dims[rank - 2])
    } else {
        (a_dims[rank - 2], a_dims[rank - 1])
    };
    let (bk, n) = if trans_b {
        (b_dims[rank - 1], b_dims[rank - 2])
    } else {
        (b_dims[rank - 2], b_dims[rank - 1])
    };
    if k != bk {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![m, k],
            got: vec![bk, n],
        });
    }
    if out_dims[rank - 2] != m || out_dims[rank - 1] != n {
        return Err(TurbineError::ShapeMismatch {
            expected: vec![m, n],
            got: out_dims[rank - 2..].to_vec(),
        });
    }

    let a_data = f32_slice(a)?;
    let b_data = f32_slice(b)?;
    let out_data = f32_slice_mut(out)?;

    let a_stride = a_dims[rank - 2] * a_dims[rank - 1];
    let b_stride = b_dims[rank - 2] * b_dims[rank - 1];
    let out_stride = m * n;

    for bi in 0..batch {
        gemm(
            &a_data[bi * a_stride..(bi + 1) * a_stride],
            trans_a,
            &b_data[bi * b_stride..(bi + 1) * b_stride],
            trans_b,
            m,
            n,
            k,
            alpha,
            &mut out_data[bi * out_stride..(bi + 1) * out_stride],
            beta,
        );
    }
    Ok(())
}

/// Single-matrix GEMM on validated slices.
fn gemm(
    a: &[f32],
    trans_a: bool,
    b: &[f32],
    trans_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    out: &mut [f32],
    beta: f32,
) {
    if beta == 0.0 {
        out.fill(0.0);
    } else if beta != 1.0 {
        for v in out.iter_mut() {
            *v *= beta;
        }
    }
    for i in 0..m {
        for p in 0..k {
            let a_val = alpha * if trans_a { a[p * m + i] } else { a[i * k + p] };
            if a_val == 0.0 {
                continue;
            }
            let row = &mut out[i * n..(i + 1) * n];
            if trans_b {
                for (j, o) in row.iter_mut().enumerate() {
                    *o += a_val * b[j * k + p];
                }
            } else {
                let b_row = &b[p * n..(p + 1) * n];
                for (o, &bv) in row.iter_mut().zip(b_row) {
                    *o += a_val * bv;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turbine_core::{DType, DeviceContext};

    fn out_for(dims: &[usize]) -> Tensor {
        Tensor::zeros(dims, DType::F32, DeviceContext::cpu())
    }

    #[test]
    fn test_matmul_basic() {
        // [2,3] x [3,2]
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = Tensor::from_f32(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &[3, 2]);
        let mut out = out_for(&[2, 2]);
        matmul(&a, false, &b, false, 1.0, &mut out, 0.0).unwrap();
        assert_eq!(out.as_f32().unwrap(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_alpha_beta() {
        let a = Tensor::from_f32(&[1.0, 0.0, 0.0, 1.0], &[2, 2]);
        let b = Tensor::from_f32(&[2.0, 0.0, 0.0, 2.0], &[2, 2]);
        let mut out = Tensor::from_f32(&[10.0, 10.0, 10.0, 10.0], &[2, 2]);
        matmul(&a, false, &b, false, 0.5, &mut out, 1.0).unwrap();
        assert_eq!(out.as_f32().unwrap(), &[11.0, 10.0, 10.0, 11.0]);
    }

    #[test]
    fn test_matmul_trans_b() {
        let a = Tensor::from_f32(&[1.0, 2.0], &[1, 2]);
        // b stored [2,2]: rows become columns under trans_b
        let b = Tensor::from_f32(&[1.0, 3.0, 2.0, 4.0], &[2, 2]);
        let mut out = out_for(&[1, 2]);
        matmul(&a, false, &b, true, 1.0, &mut out, 0.0).unwrap();
        // out[j] = sum_p a[p] * b[j][p]
        assert_eq!(out.as_f32().unwrap(), &[7.0, 10.0]);
    }

    #[test]
    fn test_matmul_flattens_leading_dims() {
        // [2, 2, 2] lhs acts as [4, 2]
        let a = Tensor::from_f32(&[1.0; 8], &[2, 2, 2]);
        let b = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let mut out = out_for(&[2, 2, 2]);
        matmul(&a, false, &b, false, 1.0, &mut out, 0.0).unwrap();
        let data = out.as_f32().unwrap();
        for row in data.chunks(2) {
            assert_eq!(row, &[4.0, 6.0]);
        }
    }

    #[test]
    fn test_matmul_dim_mismatch() {
        let a = Tensor::from_f32(&[1.0; 6], &[2, 3]);
        let b = Tensor::from_f32(&[1.0; 4], &[2, 2]);
        let mut out = out_for(&[2, 2]);
        let err = matmul(&a, false, &b, false, 1.0, &mut out, 0.0).unwrap_err();
        assert!(matches!(err, TurbineError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_batch_matmul_score_shape() {
        // q [1, 2, 2, 3] x k^T [1, 2, 2, 3] -> [1, 2, 2, 2]
        let q = Tensor::from_f32(&(0..12).map(|i| i as f32).collect::<Vec<_>>(), &[1, 2, 2, 3]);
        let k = q.clone();
        let mut out = out_for(&[1, 2, 2, 2]);
        batch_matmul(&q, false, &k, true, 1.0, &mut out, 0.0).unwrap();
        let data = out.as_f32().unwrap();
        // head 0, row 0: dot([0,1,2],[0,1,2])=5, dot([0,1,2],[3,4,5])=14
        assert_eq!(&data[..4], &[5.0, 14.0, 14.0, 50.0]);
        // head 1, row 0: dot([6,7,8],[6,7,8])=149
        assert_eq!(data[4], 149.0);
    }

    #[test]
    fn test_batch_matmul_batches_independent() {
        let a = Tensor::from_f32(&[1.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 2.0], &[2, 2, 2]);
        let b = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0], &[2, 2, 2]);
        let mut out = out_for(&[2, 2, 2]);
        batch_matmul(&a, false, &b, false, 1.0, &mut out, 0.0).unwrap();
        let data = out.as_f32().unwrap();
        assert_eq!(&data[..4], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&data[4..], &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_batch_matmul_batch_mismatch() {
        let a = Tensor::from_f32(&[0.0; 8], &[2, 2, 2]);
        let b = Tensor::from_f32(&[0.0; 12], &[3, 2, 2]);
        let mut out = out_for(&[2, 2, 2]);
        assert!(batch_matmul(&a, false, &b, false, 1.0, &mut out, 0.0).is_err());
    }

    #[test]
    fn test_device_mismatch() {
        use turbine_core::Device;
        let a = Tensor::from_f32(&[0.0; 4], &[2, 2]);
        let b = Tensor::from_f32_on(
            &[0.0; 4],
            &[2, 2],
            DeviceContext::new(Device::Cuda(0)),
        );
        let mut out = out_for(&[2, 2]);
        let err = matmul(&a, false, &b, false, 1.0, &mut out, 0.0).unwrap_err();
        assert!(matches!(err, TurbineError::DeviceMismatch { .. }));
    }
}
