use std::sync::Arc;

use crate::dtype::DType;

/// Typed backing buffer for tensor data.
#[derive(Debug, Clone)]
pub enum StorageData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Shared, reference-counted tensor storage.
///
/// Storage is `Arc`-shared so views (sub-tensors of a leading dimension)
/// alias the owning buffer without copying. Mutation goes through
/// `Arc::make_mut`: unique owners mutate in place, aliased buffers are
/// copied first (copy-on-write). The element *capacity* is fixed at
/// allocation; tensors reshaped into a storage may use any prefix of it.
#[derive(Debug, Clone)]
pub struct Storage {
    data: Arc<StorageData>,
    dtype: DType,
    capacity: usize,
}

impl Storage {
    /// Zero-capacity placeholder storage (scratch slots start this way).
    pub fn empty(dtype: DType) -> Self {
        Self::zeros(dtype, 0)
    }

    /// Allocate zero-filled storage for `numel` elements.
    pub fn zeros(dtype: DType, numel: usize) -> Self {
        let data = match dtype {
            DType::F32 => StorageData::F32(vec![0.0; numel]),
            DType::F64 => StorageData::F64(vec![0.0; numel]),
        };
        Self {
            data: Arc::new(data),
            dtype,
            capacity: numel,
        }
    }

    /// Create storage from a slice of f32 values.
    pub fn from_f32(data: &[f32]) -> Self {
        Self {
            data: Arc::new(StorageData::F32(data.to_vec())),
            dtype: DType::F32,
            capacity: data.len(),
        }
    }

    /// Create storage from a slice of f64 values.
    pub fn from_f64(data: &[f64]) -> Self {
        Self {
            data: Arc::new(StorageData::F64(data.to_vec())),
            dtype: DType::F64,
            capacity: data.len(),
        }
    }

    /// Element type of this storage.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Allocated element capacity (may exceed any tensor's logical size).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size in bytes.
    pub fn nbytes(&self) -> usize {
        self.dtype.storage_bytes(self.capacity)
    }

    /// Whether this storage is uniquely owned (no live views).
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.data) == 1
    }

    /// Interpret storage as a slice of f32 values.
    /// Returns None if dtype is not F32.
    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        match self.data.as_ref() {
            StorageData::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Interpret storage as a mutable slice of f32 values (copy-on-write).
    pub fn as_f32_slice_mut(&mut self) -> Option<&mut [f32]> {
        match Arc::make_mut(&mut self.data) {
            StorageData::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Interpret storage as a slice of f64 values.
    pub fn as_f64_slice(&self) -> Option<&[f64]> {
        match self.data.as_ref() {
            StorageData::F64(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let s = Storage::zeros(DType::F32, 10);
        assert_eq!(s.dtype(), DType::F32);
        assert_eq!(s.capacity(), 10);
        assert_eq!(s.nbytes(), 40);
        assert!(s.as_f32_slice().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_from_f32() {
        let s = Storage::from_f32(&[1.0, 2.0, 3.0]);
        assert_eq!(s.capacity(), 3);
        assert_eq!(s.as_f32_slice().unwrap(), &[1.0, 2.0, 3.0]);
        assert!(s.as_f64_slice().is_none());
    }

    #[test]
    fn test_copy_on_write() {
        let s1 = Storage::from_f32(&[1.0, 2.0, 3.0]);
        let mut s2 = s1.clone();
        assert!(!s1.is_unique());

        s2.as_f32_slice_mut().unwrap()[0] = 99.0;
        assert_eq!(s1.as_f32_slice().unwrap()[0], 1.0);
        assert_eq!(s2.as_f32_slice().unwrap()[0], 99.0);
    }

    #[test]
    fn test_empty() {
        let s = Storage::empty(DType::F32);
        assert_eq!(s.capacity(), 0);
    }
}
