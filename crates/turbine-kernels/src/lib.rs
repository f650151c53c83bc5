//! # turbine-kernels
//!
//! CPU numeric kernels consumed by the attention orchestrator.
//!
//! Provides:
//! - GEMM with alpha/beta accumulation and transpose flags, plus the
//!   batched variant used for per-head score/context products
//! - In-place layer normalization (Welford single pass)
//! - In-place masked softmax with additive masks
//! - Fused bias-add + head-split/merge transposes
//! - Elementwise bias, bias+residual, and tensor copy
//!
//! Every kernel validates device-context equality, dtype, and shape
//! congruence of all operands before touching data, and writes its output
//! region fully — callers reuse scratch buffers across calls and rely on
//! complete overwrite instead of clearing.

mod common;

pub mod layer_norm;
pub mod matmul;
pub mod softmax;
pub mod transpose;
pub mod utils;

pub use layer_norm::layer_norm;
pub use matmul::{batch_matmul, matmul};
pub use softmax::apply_mask_and_softmax;
pub use transpose::{
    add_bias_transpose_for_score, split_add_bias_transpose_for_score, transpose_for_score,
};
pub use utils::{add_bias, add_input_bias, copy};
