//! Dense row-major tensors
//!
//! A tensor is a flat `Vec` plus its shape. Reshapes never copy; every kernel in the
//! crate works directly on the flat buffer with explicit strides.

use crate::error::{NrmsError, NrmsResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T = f32> {
    data: Vec<T>,
    shape: Vec<usize>,
}

/// Token ids: `[batch × seq_len]` items or `[batch × n_items × seq_len]` histories
pub type TokenIds = Tensor<u32>;

impl<T> Tensor<T> {
    /// Wrap `data` with `shape`; the element count must match exactly.
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> NrmsResult<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(NrmsError::shape_mismatch(
                "tensor construction",
                &[expected],
                &[data.len()],
            ));
        }
        Ok(Self { data, shape: shape.to_vec() })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn dim(&self, axis: usize) -> usize {
        self.shape[axis]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Reinterpret the buffer under a new shape with the same element count.
    pub fn reshape(self, shape: &[usize]) -> NrmsResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != self.data.len() {
            return Err(NrmsError::shape_mismatch("reshape", shape, &self.shape));
        }
        Ok(Self { data: self.data, shape: shape.to_vec() })
    }

    /// Fail unless the tensor has `rank` axes, all of them non-empty.
    pub(crate) fn check_rank(&self, rank: usize, context: &str) -> NrmsResult<()> {
        if self.shape.len() != rank {
            return Err(NrmsError::ShapeMismatch {
                context: format!("{context} (expected rank {rank})"),
                expected: vec![rank],
                actual: self.shape.clone(),
            });
        }
        if self.shape.contains(&0) {
            return Err(NrmsError::empty_input(context, &self.shape));
        }
        Ok(())
    }
}

impl Tensor<f32> {
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: vec![0.0; shape.iter().product()],
            shape: shape.to_vec(),
        }
    }

    /// Row `index` along the leading axis, flattened
    pub fn row(&self, index: usize) -> &[f32] {
        let stride = self.data.len() / self.shape[0];
        &self.data[index * stride..(index + 1) * stride]
    }
}
