use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// A dense f32 tensor in host (row-major, NCHW) order.
///
/// This is the type that crosses API boundaries: parameters after loading,
/// caller inputs, and outputs read back from a session. Device-resident
/// buffers live inside the executor and may use a different layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
}

impl Tensor {
    /// Create a tensor from f32 data and a shape.
    ///
    /// # Errors
    /// Returns `LengthMismatch` if `data.len() != shape.numel()`.
    pub fn from_vec(data: Vec<f32>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.numel() {
            return Err(TensorError::LengthMismatch {
                what: format!("tensor data for shape {}", shape),
                expected: shape.numel(),
                got: data.len(),
            });
        }
        Ok(Tensor { data, shape })
    }

    /// Create a zero-filled tensor with the given shape.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor with every element set to `value`.
    pub fn full(shape: impl Into<Shape>, value: f32) -> Self {
        let shape = shape.into();
        Tensor {
            data: vec![value; shape.numel()],
            shape,
        }
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Tensors always compute in f32.
    pub fn dtype(&self) -> DType {
        DType::F32
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns the underlying data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the underlying data mutably.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Reshape the tensor, returning a new tensor with the same data but
    /// a different shape.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(self, new_shape: impl Into<Shape>) -> Result<Tensor> {
        let new_shape = new_shape.into();
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            data: self.data,
            shape: new_shape,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        assert_eq!(t.shape().dims(), &[2, 3]);
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.numel(), 6);
        assert_eq!(t.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_from_vec_length_mismatch() {
        let err = Tensor::from_vec(vec![1.0, 2.0], [3]).unwrap_err();
        assert!(matches!(err, TensorError::LengthMismatch { expected: 3, got: 2, .. }));
    }

    #[test]
    fn test_zeros_full() {
        assert_eq!(Tensor::zeros([2, 3]).data(), &[0.0; 6]);
        assert_eq!(Tensor::full([3], 1.5).data(), &[1.5, 1.5, 1.5]);
    }

    #[test]
    fn test_reshape() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let r = t.clone().reshape([3, 2]).unwrap();
        assert_eq!(r.shape().dims(), &[3, 2]);
        assert_eq!(r.data(), t.data());
        assert!(t.reshape([4, 2]).is_err());
    }

    #[test]
    fn test_data_mut() {
        let mut t = Tensor::zeros([2]);
        t.data_mut()[1] = 42.0;
        assert_eq!(t.data(), &[0.0, 42.0]);
    }
}
