//! # turbine-core
//!
//! Core tensor data model for the turbine attention engine.
//!
//! Provides:
//! - The `Tensor` type with reshape-into-capacity semantics (buffers are
//!   grown, never shrunk, so repeated inference calls reallocate nothing)
//! - `Device` / `DeviceContext` placement identity
//! - The `ScratchArena`: a slot-keyed cache of reusable scratch tensors
//! - The shared error taxonomy for the whole workspace

pub mod device;
pub mod dtype;
pub mod error;
pub mod scratch;
pub mod shape;
pub mod storage;
pub mod tensor;

pub use device::{Device, DeviceContext};
pub use dtype::DType;
pub use error::TurbineError;
pub use scratch::{ScratchArena, ScratchSlot, SharedScratch};
pub use shape::Shape;
pub use storage::Storage;
pub use tensor::Tensor;

pub type Result<T> = std::result::Result<T, TurbineError>;
