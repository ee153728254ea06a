//! `nx-tensor` - Tensors, execution targets and compute backends for nx-runtime.
//!
//! This crate provides:
//! - A `Tensor` type holding contiguous f32 data in host (NCHW) order
//! - A `Target` descriptor selecting host or accelerator execution
//! - `Layout` conversions between host order and device order
//! - A `ComputeBackend` trait covering the convolutional-network operator set
//! - A reference `CpuBackend` and a data-parallel `AcceleratorBackend`

pub mod accel;
pub mod backend;
pub mod broadcast;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod shape;
pub mod target;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use accel::AcceleratorBackend;
pub use backend::{
    create_backend, Activation, BatchNormParams, BinaryOp, ComputeBackend, Conv2dParams,
    Pool2dParams, PoolKind, TensorRef,
};
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use layout::Layout;
pub use shape::Shape;
pub use target::{Target, TargetKind};
pub use tensor::Tensor;
