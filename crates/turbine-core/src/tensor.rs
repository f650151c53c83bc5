use std::fmt;

use crate::device::DeviceContext;
use crate::dtype::DType;
use crate::error::TurbineError;
use crate::shape::Shape;
use crate::storage::Storage;
use crate::Result;

/// A contiguous multi-dimensional buffer bound to a device context.
///
/// Tensors are built for inference reuse: `reshape` re-labels the existing
/// storage whenever the requested element count fits its capacity, and only
/// reallocates when it does not. Capacity never shrinks, so a scratch
/// tensor reshaped across calls with varying sizes settles at the high-water
/// mark and then stops allocating.
///
/// `index` produces a *view* of one sub-tensor of the leading dimension,
/// sharing the owner's storage. A view is valid until its owner is next
/// reallocated; views cannot themselves be reshaped.
#[derive(Clone)]
pub struct Tensor {
    storage: Storage,
    shape: Shape,
    /// Element offset into storage (non-zero only for views).
    offset: usize,
    view: bool,
    ctx: DeviceContext,
}

impl Tensor {
    /// Create an unallocated tensor bound to a context.
    ///
    /// The first `reshape` gives it a real shape and storage; until then it
    /// holds zero elements. Scratch-arena slots begin life this way.
    pub fn empty(ctx: DeviceContext) -> Self {
        Self {
            storage: Storage::empty(DType::F32),
            shape: Shape::new(&[0]),
            offset: 0,
            view: false,
            ctx,
        }
    }

    /// Create a CPU tensor from f32 data with the given shape.
    pub fn from_f32(data: &[f32], dims: &[usize]) -> Self {
        Self::from_f32_on(data, dims, DeviceContext::cpu())
    }

    /// Create a tensor from f32 data bound to a specific context.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the shape's element count.
    pub fn from_f32_on(data: &[f32], dims: &[usize], ctx: DeviceContext) -> Self {
        let shape = Shape::new(dims);
        assert_eq!(
            shape.numel(),
            data.len(),
            "shape {:?} requires {} elements, got {}",
            dims,
            shape.numel(),
            data.len()
        );
        Self {
            storage: Storage::from_f32(data),
            shape,
            offset: 0,
            view: false,
            ctx,
        }
    }

    /// Create a zero-filled tensor.
    pub fn zeros(dims: &[usize], dtype: DType, ctx: DeviceContext) -> Self {
        let shape = Shape::new(dims);
        Self {
            storage: Storage::zeros(dtype, shape.numel()),
            shape,
            offset: 0,
            view: false,
            ctx,
        }
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Shape of the tensor.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Size of dimension `axis`.
    pub fn dim(&self, axis: usize) -> Result<usize> {
        self.shape
            .dim(axis)
            .ok_or_else(|| TurbineError::RankMismatch {
                what: "tensor",
                expected: axis + 1,
                got: self.ndim(),
            })
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Device context this tensor is bound to.
    pub fn device_ctx(&self) -> DeviceContext {
        self.ctx
    }

    /// Whether this tensor is a view into another tensor's storage.
    pub fn is_view(&self) -> bool {
        self.view
    }

    /// Allocated element capacity of the backing storage.
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    // =========================================================================
    // Reshape / views
    // =========================================================================

    /// Re-shape this tensor, allocating storage only when needed.
    ///
    /// Fails with `InvalidShape` if any dimension is zero. If the requested
    /// element count fits the existing capacity and the dtype and context
    /// are unchanged, only the shape label changes: no data is copied and
    /// prior contents are left as-is (callers overwrite before reading).
    /// Otherwise fresh zeroed storage of exactly the requested count is
    /// allocated. Capacity never shrinks. Views cannot be reshaped.
    pub fn reshape(&mut self, dims: &[usize], dtype: DType, ctx: DeviceContext) -> Result<()> {
        if dims.is_empty() || dims.contains(&0) {
            return Err(TurbineError::InvalidShape {
                dims: dims.to_vec(),
            });
        }
        if self.view {
            return Err(TurbineError::InvalidArgument(
                "cannot reshape a view tensor".into(),
            ));
        }
        let shape = Shape::new(dims);
        let needed = shape.numel();
        if needed > self.storage.capacity() || dtype != self.storage.dtype() || ctx != self.ctx {
            self.storage = Storage::zeros(dtype, needed);
            self.ctx = ctx;
        }
        self.shape = shape;
        Ok(())
    }

    /// View of sub-tensor `i` of the leading dimension, sharing storage.
    ///
    /// The view's shape drops the leading dimension. It must not be used
    /// past the owner's next reallocation.
    pub fn index(&self, i: usize) -> Result<Tensor> {
        let leading = self.dim(0)?;
        if i >= leading {
            return Err(TurbineError::InvalidArgument(format!(
                "index {i} out of range for leading dimension {leading}"
            )));
        }
        let inner_dims = &self.shape.dims()[1..];
        let inner: Shape = Shape::new(inner_dims);
        let stride = inner.numel();
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: inner,
            offset: self.offset + i * stride,
            view: true,
            ctx: self.ctx,
        })
    }

    // =========================================================================
    // Data access
    // =========================================================================

    /// The tensor's elements as an f32 slice.
    /// Returns None if the dtype is not F32.
    pub fn as_f32(&self) -> Option<&[f32]> {
        let slice = self.storage.as_f32_slice()?;
        Some(&slice[self.offset..self.offset + self.numel()])
    }

    /// The tensor's elements as a mutable f32 slice (copy-on-write if the
    /// storage is aliased by a live view).
    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        let numel = self.numel();
        let offset = self.offset;
        let slice = self.storage.as_f32_slice_mut()?;
        Some(&mut slice[offset..offset + numel])
    }

    /// One element by flat (row-major) index.
    pub fn get_f32(&self, flat_index: usize) -> Option<f32> {
        self.as_f32()?.get(flat_index).copied()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, ctx={}, capacity={}, view={})",
            self.shape,
            self.dtype(),
            self.ctx,
            self.capacity(),
            self.view,
        )
    }
}
