//! Multi-headed self and cross attention.
//!
//! One forward pass runs the full pipeline: optional pre-layernorm, the
//! Q/K/V projections (fused for self attention), head split, scaled
//! scores, masked softmax, weighted sum, head merge, and the output
//! projection with either a plain bias or a fused residual add.
//!
//! Every intermediate lives in a [`ScratchArena`] slot, so a module that
//! runs the same shapes repeatedly allocates only on the first call.

use std::fmt;
use std::str::FromStr;

use log::trace;

use turbine_core::{
    DType, DeviceContext, Result, ScratchArena, ScratchSlot, SharedScratch, Tensor, TurbineError,
};
use turbine_kernels::{
    add_bias, add_bias_transpose_for_score, add_input_bias, apply_mask_and_softmax, batch_matmul,
    copy, layer_norm, matmul, split_add_bias_transpose_for_score, transpose_for_score,
};

const LAYER_NORM_EPS: f32 = 1e-6;

/// Which inputs feed the key/value projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionKind {
    /// Query, key, and value all come from the query input, projected in
    /// one fused QKV matmul.
    SelfAttention,
    /// Key and value come from a second sequence (encoder-decoder
    /// attention), projected separately from the query.
    CrossAttention,
}

impl FromStr for AttentionKind {
    type Err = TurbineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "self" => Ok(AttentionKind::SelfAttention),
            "context" => Ok(AttentionKind::CrossAttention),
            other => Err(TurbineError::InvalidArgument(format!(
                "unknown attention kind {other:?}, expected \"self\" or \"context\""
            ))),
        }
    }
}

impl fmt::Display for AttentionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttentionKind::SelfAttention => write!(f, "self"),
            AttentionKind::CrossAttention => write!(f, "context"),
        }
    }
}

/// Scale and shift of a layer normalization, each `[hidden]`.
#[derive(Debug)]
pub struct LayerNormParams {
    pub gamma: Tensor,
    pub beta: Tensor,
}

impl LayerNormParams {
    pub fn new(gamma: Tensor, beta: Tensor) -> Self {
        Self { gamma, beta }
    }
}

/// Parameters of one attention module.
///
/// Projection weights are `[hidden, hidden]` applied as `x @ W`, biases
/// are `[hidden]`. The fused QKV weight is `[hidden, 3*hidden]` with the
/// columns grouped query|key|value and the fused bias `[3*hidden]` in the
/// same order; self attention requires it (build one with
/// [`AttentionWeights::fuse_qkv`] when only per-projection weights exist).
#[derive(Debug)]
pub struct AttentionWeights {
    pub query_weight: Tensor,
    pub query_bias: Tensor,
    pub key_weight: Tensor,
    pub key_bias: Tensor,
    pub value_weight: Tensor,
    pub value_bias: Tensor,
    pub dense_weight: Tensor,
    pub dense_bias: Tensor,
    pub qkv_weight: Option<Tensor>,
    pub qkv_bias: Option<Tensor>,
    pub layer_norm: Option<LayerNormParams>,
}

impl AttentionWeights {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        query_weight: Tensor,
        query_bias: Tensor,
        key_weight: Tensor,
        key_bias: Tensor,
        value_weight: Tensor,
        value_bias: Tensor,
        dense_weight: Tensor,
        dense_bias: Tensor,
    ) -> Self {
        Self {
            query_weight,
            query_bias,
            key_weight,
            key_bias,
            value_weight,
            value_bias,
            dense_weight,
            dense_bias,
            qkv_weight: None,
            qkv_bias: None,
            layer_norm: None,
        }
    }

    pub fn with_layer_norm(mut self, params: LayerNormParams) -> Self {
        self.layer_norm = Some(params);
        self
    }

    pub fn with_fused_qkv(mut self, weight: Tensor, bias: Tensor) -> Self {
        self.qkv_weight = Some(weight);
        self.qkv_bias = Some(bias);
        self
    }

    /// Hidden size implied by the query projection.
    pub fn hidden_size(&self) -> usize {
        self.query_weight.shape().last_dim()
    }

    /// Build the fused QKV weight and bias from the per-projection ones.
    ///
    /// Concatenates the q, k, v weight columns into `[hidden, 3*hidden]`
    /// and the biases into `[3*hidden]`, so one GEMM covers all three
    /// projections.
    pub fn fuse_qkv(&mut self) -> Result<()> {
        let h = self.hidden_size();
        let ctx = self.query_weight.device_ctx();
        let (Some(qw), Some(kw), Some(vw)) = (
            self.query_weight.as_f32(),
            self.key_weight.as_f32(),
            self.value_weight.as_f32(),
        ) else {
            return Err(TurbineError::UnsupportedDType(self.query_weight.dtype()));
        };

        let mut fused_w = vec![0.0f32; h * 3 * h];
        for r in 0..h {
            let dst = r * 3 * h;
            fused_w[dst..dst + h].copy_from_slice(&qw[r * h..(r + 1) * h]);
            fused_w[dst + h..dst + 2 * h].copy_from_slice(&kw[r * h..(r + 1) * h]);
            fused_w[dst + 2 * h..dst + 3 * h].copy_from_slice(&vw[r * h..(r + 1) * h]);
        }

        let mut fused_b = Vec::with_capacity(3 * h);
        for bias in [&self.query_bias, &self.key_bias, &self.value_bias] {
            let Some(b) = bias.as_f32() else {
                return Err(TurbineError::UnsupportedDType(bias.dtype()));
            };
            fused_b.extend_from_slice(b);
        }

        self.qkv_weight = Some(Tensor::from_f32_on(&fused_w, &[h, 3 * h], ctx));
        self.qkv_bias = Some(Tensor::from_f32_on(&fused_b, &[3 * h], ctx));
        Ok(())
    }
}

/// Head-major projected query, key, and value, each
/// `[batch, heads, seq, head_size]`.
///
/// These are snapshots into arena storage, valid only while the current
/// forward pass holds the arena lock.
struct ProjectedQkv {
    query: Tensor,
    key: Tensor,
    value: Tensor,
}

/// Multi-headed attention module.
///
/// Construction validates every parameter shape once; `forward` then only
/// validates the per-call inputs. Modules share the process-wide scratch
/// arena by default and can opt into a private one.
#[derive(Debug)]
pub struct MultiHeadedAttention {
    weights: AttentionWeights,
    num_heads: usize,
    hidden_size: usize,
    head_size: usize,
    scratch: SharedScratch,
}

impl MultiHeadedAttention {
    pub fn new(weights: AttentionWeights, num_heads: usize) -> Result<Self> {
        if num_heads == 0 {
            return Err(TurbineError::InvalidArgument(
                "num_heads must be positive".into(),
            ));
        }
        let hidden_size = weights.hidden_size();
        if hidden_size == 0 || hidden_size % num_heads != 0 {
            return Err(TurbineError::HiddenNotDivisible {
                hidden_size,
                num_heads,
            });
        }

        for w in [
            &weights.query_weight,
            &weights.key_weight,
            &weights.value_weight,
            &weights.dense_weight,
        ] {
            if w.shape().dims() != [hidden_size, hidden_size] {
                return Err(TurbineError::ShapeMismatch {
                    expected: vec![hidden_size, hidden_size],
                    got: w.shape().dims().to_vec(),
                });
            }
        }
        for b in [
            &weights.query_bias,
            &weights.key_bias,
            &weights.value_bias,
            &weights.dense_bias,
        ] {
            if b.shape().dims() != [hidden_size] {
                return Err(TurbineError::ShapeMismatch {
                    expected: vec![hidden_size],
                    got: b.shape().dims().to_vec(),
                });
            }
        }
        match (&weights.qkv_weight, &weights.qkv_bias) {
            (None, None) => {}
            (Some(w), Some(b)) => {
                if w.shape().dims() != [hidden_size, 3 * hidden_size] {
                    return Err(TurbineError::ShapeMismatch {
                        expected: vec![hidden_size, 3 * hidden_size],
                        got: w.shape().dims().to_vec(),
                    });
                }
                if b.shape().dims() != [3 * hidden_size] {
                    return Err(TurbineError::ShapeMismatch {
                        expected: vec![3 * hidden_size],
                        got: b.shape().dims().to_vec(),
                    });
                }
            }
            _ => {
                return Err(TurbineError::InvalidArgument(
                    "fused qkv weight and bias must be set together".into(),
                ));
            }
        }
        if let Some(ln) = &weights.layer_norm {
            for p in [&ln.gamma, &ln.beta] {
                if p.shape().dims() != [hidden_size] {
                    return Err(TurbineError::ShapeMismatch {
                        expected: vec![hidden_size],
                        got: p.shape().dims().to_vec(),
                    });
                }
            }
        }

        Ok(Self {
            weights,
            num_heads,
            hidden_size,
            head_size: hidden_size / num_heads,
            scratch: ScratchArena::shared(),
        })
    }

    /// Use a private scratch arena instead of the process-wide one.
    pub fn with_private_scratch(mut self) -> Self {
        self.scratch = ScratchArena::private();
        self
    }

    /// Use a specific scratch arena, e.g. one shared by a group of modules
    /// or held by a caller that wants to inspect buffer usage.
    pub fn with_scratch(mut self, scratch: SharedScratch) -> Self {
        self.scratch = scratch;
        self
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Run one attention forward pass into `output`.
    ///
    /// `query` is `[batch, q_len, hidden]`; `key` and `value` are
    /// `[batch, k_len, hidden]` (for self attention, pass the query as
    /// both). `mask` is an additive mask, `[batch, k_len]` or
    /// `[batch, q_len, k_len]`. `output` is resized to
    /// `[batch, q_len, hidden]`, reusing its storage when it fits.
    ///
    /// `pre_layernorm` normalizes a copy of the query before the
    /// projections; the residual of `add_input` still uses the raw query.
    /// `add_input` fuses `output += query` into the final bias add.
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: &Tensor,
        kind: AttentionKind,
        pre_layernorm: bool,
        add_input: bool,
        output: &mut Tensor,
    ) -> Result<()> {
        self.validate_inputs(query, key, value, mask, kind, pre_layernorm)?;

        let ctx = query.device_ctx();
        let batch = query.dim(0)?;
        let q_len = query.dim(1)?;
        let k_len = key.dim(1)?;
        trace!(
            "attention forward: kind={kind} batch={batch} q_len={q_len} k_len={k_len} \
             heads={} pre_layernorm={pre_layernorm} add_input={add_input}",
            self.num_heads
        );

        let mut arena = self.scratch.lock();

        let qkv = match kind {
            AttentionKind::CrossAttention => {
                self.project_cross(&mut arena, query, key, value, pre_layernorm, &ctx)?
            }
            AttentionKind::SelfAttention => {
                self.project_fused(&mut arena, query, pre_layernorm, &ctx)?
            }
        };

        let (heads, hs) = (self.num_heads, self.head_size);
        let [score, context, unshaped] = arena.tensors(
            [ScratchSlot::Score, ScratchSlot::Context, ScratchSlot::Unshaped],
            &ctx,
        )?;

        // scores = Q @ K^T / sqrt(head_size), then masked softmax
        score.reshape(&[batch, heads, q_len, k_len], DType::F32, ctx)?;
        let scale = 1.0 / (hs as f32).sqrt();
        batch_matmul(&qkv.query, false, &qkv.key, true, scale, score, 0.0)?;
        apply_mask_and_softmax(score, mask, 1.0)?;

        // weighted sum per head, then merge heads
        context.reshape(&[batch, heads, q_len, hs], DType::F32, ctx)?;
        batch_matmul(score, false, &qkv.value, false, 1.0, context, 0.0)?;
        unshaped.reshape(&[batch, q_len, self.hidden_size], DType::F32, ctx)?;
        transpose_for_score(context, unshaped)?;

        // output projection
        output.reshape(&[batch, q_len, self.hidden_size], DType::F32, ctx)?;
        matmul(unshaped, false, &self.weights.dense_weight, false, 1.0, output, 0.0)?;
        if add_input {
            add_input_bias(query, &self.weights.dense_bias, output)?;
        } else {
            add_bias(&self.weights.dense_bias, output)?;
        }
        Ok(())
    }

    /// Separate q/k/v projections for cross attention.
    fn project_cross(
        &self,
        arena: &mut ScratchArena,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        pre_layernorm: bool,
        ctx: &DeviceContext,
    ) -> Result<ProjectedQkv> {
        let w = &self.weights;
        let (h, heads, hs) = (self.hidden_size, self.num_heads, self.head_size);
        let (batch, q_len) = (query.dim(0)?, query.dim(1)?);
        let k_len = key.dim(1)?;

        let [q_out, k_out, v_out, q_heads, k_heads, v_heads, normed] = arena.tensors(
            [
                ScratchSlot::QueryProj,
                ScratchSlot::KeyProj,
                ScratchSlot::ValueProj,
                ScratchSlot::QueryHeads,
                ScratchSlot::KeyHeads,
                ScratchSlot::ValueHeads,
                ScratchSlot::NormedQuery,
            ],
            ctx,
        )?;

        q_out.reshape(&[batch, q_len, h], DType::F32, *ctx)?;
        if pre_layernorm {
            let ln = w.layer_norm.as_ref().expect("validated");
            normed.reshape(&[batch, q_len, h], DType::F32, *ctx)?;
            copy(query, normed)?;
            layer_norm(&ln.gamma, &ln.beta, normed, LAYER_NORM_EPS)?;
            matmul(normed, false, &w.query_weight, false, 1.0, q_out, 0.0)?;
        } else {
            matmul(query, false, &w.query_weight, false, 1.0, q_out, 0.0)?;
        }

        k_out.reshape(&[batch, k_len, h], DType::F32, *ctx)?;
        matmul(key, false, &w.key_weight, false, 1.0, k_out, 0.0)?;
        v_out.reshape(&[batch, k_len, h], DType::F32, *ctx)?;
        matmul(value, false, &w.value_weight, false, 1.0, v_out, 0.0)?;

        // relabel for the head split; within capacity this keeps contents
        q_out.reshape(&[batch, q_len, heads, hs], DType::F32, *ctx)?;
        k_out.reshape(&[batch, k_len, heads, hs], DType::F32, *ctx)?;
        v_out.reshape(&[batch, k_len, heads, hs], DType::F32, *ctx)?;

        q_heads.reshape(&[batch, heads, q_len, hs], DType::F32, *ctx)?;
        add_bias_transpose_for_score(q_out, &w.query_bias, q_heads)?;
        k_heads.reshape(&[batch, heads, k_len, hs], DType::F32, *ctx)?;
        add_bias_transpose_for_score(k_out, &w.key_bias, k_heads)?;
        v_heads.reshape(&[batch, heads, k_len, hs], DType::F32, *ctx)?;
        add_bias_transpose_for_score(v_out, &w.value_bias, v_heads)?;

        Ok(ProjectedQkv {
            query: q_heads.clone(),
            key: k_heads.clone(),
            value: v_heads.clone(),
        })
    }

    /// Fused QKV projection for self attention.
    fn project_fused(
        &self,
        arena: &mut ScratchArena,
        query: &Tensor,
        pre_layernorm: bool,
        ctx: &DeviceContext,
    ) -> Result<ProjectedQkv> {
        let w = &self.weights;
        let (h, heads, hs) = (self.hidden_size, self.num_heads, self.head_size);
        let (batch, q_len) = (query.dim(0)?, query.dim(1)?);
        let qkv_weight = w.qkv_weight.as_ref().expect("validated");
        let qkv_bias = w.qkv_bias.as_ref().expect("validated");

        let [qkv_proj, qkv_heads, normed] = arena.tensors(
            [
                ScratchSlot::QkvProj,
                ScratchSlot::QkvHeads,
                ScratchSlot::NormedQuery,
            ],
            ctx,
        )?;

        // The GEMM writes [batch*q_len, 3*hidden] row-major; the label
        // records the logical split the transpose kernel reads.
        qkv_proj.reshape(&[3, batch, q_len, h], DType::F32, *ctx)?;
        if pre_layernorm {
            let ln = w.layer_norm.as_ref().expect("validated");
            normed.reshape(&[batch, q_len, h], DType::F32, *ctx)?;
            copy(query, normed)?;
            layer_norm(&ln.gamma, &ln.beta, normed, LAYER_NORM_EPS)?;
            matmul(normed, false, qkv_weight, false, 1.0, qkv_proj, 0.0)?;
        } else {
            matmul(query, false, qkv_weight, false, 1.0, qkv_proj, 0.0)?;
        }

        qkv_heads.reshape(&[3, batch, heads, q_len, hs], DType::F32, *ctx)?;
        split_add_bias_transpose_for_score(qkv_proj, qkv_bias, qkv_heads)?;

        Ok(ProjectedQkv {
            query: qkv_heads.index(0)?,
            key: qkv_heads.index(1)?,
            value: qkv_heads.index(2)?,
        })
    }

    fn validate_inputs(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: &Tensor,
        kind: AttentionKind,
        pre_layernorm: bool,
    ) -> Result<()> {
        for (what, t) in [("query", query), ("key", key), ("value", value)] {
            if t.ndim() != 3 {
                return Err(TurbineError::RankMismatch {
                    what,
                    expected: 3,
                    got: t.ndim(),
                });
            }
            if t.dtype() != DType::F32 {
                return Err(TurbineError::UnsupportedDType(t.dtype()));
            }
        }

        let ctx = query.device_ctx();
        for t in [key, value, mask] {
            if t.device_ctx() != ctx {
                return Err(TurbineError::DeviceMismatch {
                    left: ctx,
                    right: t.device_ctx(),
                });
            }
        }

        if key.shape().dims() != value.shape().dims() {
            return Err(TurbineError::ShapeMismatch {
                expected: key.shape().dims().to_vec(),
                got: value.shape().dims().to_vec(),
            });
        }
        if query.dim(0)? != key.dim(0)? || query.dim(2)? != self.hidden_size {
            return Err(TurbineError::ShapeMismatch {
                expected: vec![key.dim(0)?, query.dim(1)?, self.hidden_size],
                got: query.shape().dims().to_vec(),
            });
        }
        if key.dim(2)? != self.hidden_size {
            return Err(TurbineError::ShapeMismatch {
                expected: vec![key.dim(0)?, key.dim(1)?, self.hidden_size],
                got: key.shape().dims().to_vec(),
            });
        }

        match kind {
            AttentionKind::SelfAttention => {
                if self.weights.qkv_weight.is_none() {
                    return Err(TurbineError::InvalidArgument(
                        "self attention requires fused qkv weights".into(),
                    ));
                }
                // the fused projection reads only the query
                if key.shape().dims() != query.shape().dims() {
                    return Err(TurbineError::ShapeMismatch {
                        expected: query.shape().dims().to_vec(),
                        got: key.shape().dims().to_vec(),
                    });
                }
            }
            AttentionKind::CrossAttention => {}
        }

        if pre_layernorm && self.weights.layer_norm.is_none() {
            return Err(TurbineError::InvalidArgument(
                "pre_layernorm requires layer norm parameters".into(),
            ));
        }
        Ok(())
    }
}
