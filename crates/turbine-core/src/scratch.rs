//! Scratch-tensor arena: per-call-site buffer reuse across invocations.
//!
//! Each pipeline call site owns a [`ScratchSlot`]; the arena caches one
//! tensor per (slot, device context) pair, created lazily and grown in
//! place on later calls. Nothing is ever freed or shrunk, so a steady-state
//! inference loop performs zero scratch allocations.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::device::DeviceContext;
use crate::error::TurbineError;
use crate::tensor::Tensor;
use crate::Result;

/// Identity of one scratch-buffer call site in the attention pipeline.
///
/// A slot's tensor is only valid for the duration of the call that fetched
/// it; code that needs several simultaneously-live scratch tensors must
/// fetch them from distinct slots in one [`ScratchArena::tensors`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScratchSlot {
    /// Projected query, pre-transpose: [batch, q_len, hidden]
    QueryProj,
    /// Projected key, pre-transpose: [batch, k_len, hidden]
    KeyProj,
    /// Projected value, pre-transpose: [batch, k_len, hidden]
    ValueProj,
    /// Head-major query: [batch, heads, q_len, head_size]
    QueryHeads,
    /// Head-major key: [batch, heads, k_len, head_size]
    KeyHeads,
    /// Head-major value: [batch, heads, k_len, head_size]
    ValueHeads,
    /// Fused QKV projection: [3, batch, q_len, hidden]
    QkvProj,
    /// Fused head-major QKV: [3, batch, heads, q_len, head_size]
    QkvHeads,
    /// Layer-normed copy of the query: [batch, q_len, hidden]
    NormedQuery,
    /// Attention scores: [batch, heads, q_len, k_len]
    Score,
    /// Per-head weighted sum: [batch, heads, q_len, head_size]
    Context,
    /// Head-merged context: [batch, q_len, hidden]
    Unshaped,
}

impl ScratchSlot {
    /// Number of slots (array backing size).
    pub const COUNT: usize = 12;
}

type SlotEntries = Vec<(DeviceContext, Tensor)>;

/// Handle to an arena shared between modules. Lock it for the duration of
/// a forward pass.
pub type SharedScratch = Arc<Mutex<ScratchArena>>;

/// Cache of reusable scratch tensors, keyed by slot and device context.
///
/// This is deliberately mutable shared state: every attention module that
/// shares one arena contends for the same buffers, and callers serialize
/// access through the `Mutex` that wraps the arena (see
/// [`ScratchArena::shared`]). Kernel failures may leave slot contents in an
/// unspecified state; that is harmless because every consumer reshapes and
/// fully overwrites a slot before reading it.
#[derive(Debug)]
pub struct ScratchArena {
    slots: [SlotEntries; ScratchSlot::COUNT],
}

impl ScratchArena {
    /// Create an empty arena. No buffers are allocated until first use.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// The process-wide shared arena.
    ///
    /// Modules that use this instance are serialized against each other for
    /// the full duration of every forward pass — the simple, bounded-memory
    /// default. Modules wanting parallel throughput own a private arena
    /// instead.
    pub fn shared() -> SharedScratch {
        static SHARED: OnceLock<SharedScratch> = OnceLock::new();
        SHARED
            .get_or_init(|| Arc::new(Mutex::new(ScratchArena::new())))
            .clone()
    }

    /// A fresh arena not shared with any other module. Trades the shared
    /// arena's bounded memory for contention-free forward passes.
    pub fn private() -> SharedScratch {
        Arc::new(Mutex::new(ScratchArena::new()))
    }

    /// The cached tensor for `slot` on `ctx`, created unallocated on first
    /// use. The caller must `reshape` it before reading.
    pub fn tensor(&mut self, slot: ScratchSlot, ctx: &DeviceContext) -> &mut Tensor {
        Self::entry(&mut self.slots[slot as usize], ctx)
    }

    /// Fetch `N` distinct slots at once, all mutably borrowed together.
    ///
    /// This is how a pipeline stage holds several live scratch buffers:
    /// the borrow checker sees one disjoint borrow per slot. Duplicate
    /// slots fail with `InvalidArgument`.
    pub fn tensors<const N: usize>(
        &mut self,
        slots: [ScratchSlot; N],
        ctx: &DeviceContext,
    ) -> Result<[&mut Tensor; N]> {
        let indices = slots.map(|s| s as usize);
        let entries = self.slots.get_disjoint_mut(indices).map_err(|_| {
            TurbineError::InvalidArgument(format!(
                "scratch slots must be distinct, got {slots:?}"
            ))
        })?;
        Ok(entries.map(|e| Self::entry(e, ctx)))
    }

    /// Number of (slot, context) pairs with allocated buffers.
    pub fn allocated_slots(&self) -> usize {
        self.slots
            .iter()
            .flat_map(|entries| entries.iter())
            .filter(|(_, t)| t.capacity() > 0)
            .count()
    }

    fn entry<'a>(entries: &'a mut SlotEntries, ctx: &DeviceContext) -> &'a mut Tensor {
        if let Some(pos) = entries.iter().position(|(c, _)| c == ctx) {
            return &mut entries[pos].1;
        }
        entries.push((*ctx, Tensor::empty(*ctx)));
        &mut entries.last_mut().expect("just pushed").1
    }
}

impl Default for ScratchArena {
    fn default() -> Self {
        Self::new()
    }
}
