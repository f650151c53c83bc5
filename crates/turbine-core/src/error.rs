use crate::device::DeviceContext;
use crate::dtype::DType;

/// Error taxonomy for the turbine workspace.
///
/// Validation errors (`InvalidShape` through `InvalidArgument`) are raised
/// before any output tensor is written; `Kernel` wraps opaque numeric-kernel
/// failures surfaced unmodified. No layer retries.
#[derive(Debug, thiserror::Error)]
pub enum TurbineError {
    #[error("invalid shape {dims:?}: every dimension must be positive")]
    InvalidShape { dims: Vec<usize> },

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("{what} has rank {got}, expected rank {expected}")]
    RankMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("hidden size {hidden_size} is not divisible by {num_heads} attention heads")]
    HiddenNotDivisible {
        hidden_size: usize,
        num_heads: usize,
    },

    #[error("device context mismatch: {left} vs {right}")]
    DeviceMismatch {
        left: DeviceContext,
        right: DeviceContext,
    },

    #[error("unsupported dtype {0}")]
    UnsupportedDType(DType),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("kernel failure: {0}")]
    Kernel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e = TurbineError::HiddenNotDivisible {
            hidden_size: 10,
            num_heads: 3,
        };
        assert!(e.to_string().contains("not divisible"));

        let e = TurbineError::DeviceMismatch {
            left: DeviceContext::cpu(),
            right: DeviceContext::new(crate::Device::Cuda(0)),
        };
        assert!(e.to_string().contains("cpu"));
        assert!(e.to_string().contains("cuda:0"));
    }
}
