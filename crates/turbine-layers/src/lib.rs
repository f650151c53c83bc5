//! # turbine-layers
//!
//! Transformer layer pipelines built on the turbine kernels.
//!
//! Provides:
//! - Multi-headed self and cross attention with scratch-buffer reuse
//! - Additive padding and causal masks

pub mod mask;
pub mod multi_headed_attention;

pub use mask::{causal_mask, padding_mask};
pub use multi_headed_attention::{
    AttentionKind, AttentionWeights, LayerNormParams, MultiHeadedAttention,
};
