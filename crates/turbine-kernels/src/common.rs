//! Shared operand validation for all kernels.

use turbine_core::{DType, Result, Tensor, TurbineError};

/// All operands must share one device context.
pub(crate) fn check_same_ctx(tensors: &[&Tensor]) -> Result<()> {
    let Some(first) = tensors.first() else {
        return Ok(());
    };
    let ctx = first.device_ctx();
    for t in &tensors[1..] {
        if t.device_ctx() != ctx {
            return Err(TurbineError::DeviceMismatch {
                left: ctx,
                right: t.device_ctx(),
            });
        }
    }
    Ok(())
}

/// Kernels compute in f32 only.
pub(crate) fn check_f32(tensors: &[&Tensor]) -> Result<()> {
    for t in tensors {
        if t.dtype() != DType::F32 {
            return Err(TurbineError::UnsupportedDType(t.dtype()));
        }
    }
    Ok(())
}

/// Read-only f32 access after validation.
pub(crate) fn f32_slice(t: &Tensor) -> Result<&[f32]> {
    t.as_f32().ok_or(TurbineError::UnsupportedDType(t.dtype()))
}

/// Mutable f32 access after validation.
pub(crate) fn f32_slice_mut(t: &mut Tensor) -> Result<&mut [f32]> {
    let dtype = t.dtype();
    t.as_f32_mut().ok_or(TurbineError::UnsupportedDType(dtype))
}
