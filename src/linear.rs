//! Affine projection `y = x·W + b`

use crate::error::{NrmsError, NrmsResult};
use crate::ops::{gemm, par_for};
use rand::rngs::StdRng;
use rand::Rng;

/// Weight is stored `[in_dim × out_dim]` row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    in_dim: usize,
    out_dim: usize,
    weight: Vec<f32>,
    bias: Option<Vec<f32>>,
}

impl Linear {
    /// Uniform init in `±1/sqrt(in_dim)` for weight and bias.
    pub fn new(in_dim: usize, out_dim: usize, with_bias: bool, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (in_dim as f32).sqrt();
        let mut draw = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.random_range(-bound..bound)).collect() };
        let weight = draw(in_dim * out_dim);
        let bias = with_bias.then(|| draw(out_dim));
        Self { in_dim, out_dim, weight, bias }
    }

    /// Build from explicit parameters, e.g. weights trained elsewhere.
    pub fn from_parts(
        in_dim: usize,
        out_dim: usize,
        weight: Vec<f32>,
        bias: Option<Vec<f32>>,
    ) -> NrmsResult<Self> {
        if weight.len() != in_dim * out_dim {
            return Err(NrmsError::shape_mismatch(
                "linear weight",
                &[in_dim, out_dim],
                &[weight.len()],
            ));
        }
        if let Some(b) = &bias {
            if b.len() != out_dim {
                return Err(NrmsError::shape_mismatch("linear bias", &[out_dim], &[b.len()]));
            }
        }
        Ok(Self { in_dim, out_dim, weight, bias })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn weight(&self) -> &[f32] {
        &self.weight
    }

    pub fn bias(&self) -> Option<&[f32]> {
        self.bias.as_deref()
    }

    /// Project `rows` input rows of width `in_dim`; returns `[rows × out_dim]`.
    pub fn forward(&self, x: &[f32], rows: usize) -> Vec<f32> {
        debug_assert_eq!(x.len(), rows * self.in_dim);
        let mut out = vec![0.0f32; rows * self.out_dim];
        gemm(
            &mut out,
            x,
            &self.weight,
            rows,
            self.in_dim,
            self.out_dim,
            1.0,
            false,
            par_for(rows * self.in_dim * self.out_dim),
        );
        if let Some(bias) = &self.bias {
            for row in out.chunks_exact_mut(self.out_dim) {
                for (v, b) in row.iter_mut().zip(bias) {
                    *v += b;
                }
            }
        }
        out
    }
}
