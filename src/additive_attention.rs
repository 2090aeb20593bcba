//! Additive attention pooling: `[N × L × F] → [N × F]`

use crate::dropout::{Dropout, Mode};
use crate::error::{NrmsError, NrmsResult};
use crate::linear::Linear;
use crate::observer::ShapeObserver;
use crate::ops::{seeded_rng, softmax_in_place};
use crate::tensor::Tensor;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;

/// Scores each position with `q · tanh(W·x + b)`, softmaxes the scores over the
/// sequence and returns the weighted sum of the inputs.
pub struct AdditiveAttention {
    feature_dim: usize,
    projection: Linear,
    query: Linear,
    dropout: Dropout,
    observer: Option<Arc<dyn ShapeObserver>>,
}

impl fmt::Debug for AdditiveAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdditiveAttention")
            .field("feature_dim", &self.feature_dim)
            .field("hidden_dim", &self.hidden_dim())
            .field("dropout", &self.dropout.probability())
            .finish()
    }
}

impl AdditiveAttention {
    pub fn new(feature_dim: usize, hidden_dim: usize, dropout: f32, seed: u64) -> NrmsResult<Self> {
        if feature_dim == 0 || hidden_dim == 0 {
            return Err(NrmsError::config(format!(
                "additive attention needs positive widths, got feature_dim={feature_dim} hidden_dim={hidden_dim}"
            )));
        }
        let mut rng = seeded_rng(seed);
        Ok(Self {
            feature_dim,
            projection: Linear::new(feature_dim, hidden_dim, true, &mut rng),
            query: Linear::new(hidden_dim, 1, false, &mut rng),
            dropout: Dropout::new(dropout)?,
            observer: None,
        })
    }

    /// Build from explicit scorer weights: `projection` is `F → hidden`, `query` is
    /// `hidden → 1` without bias.
    pub fn from_parts(projection: Linear, query: Linear, dropout: f32) -> NrmsResult<Self> {
        if query.in_dim() != projection.out_dim() || query.out_dim() != 1 || query.bias().is_some() {
            return Err(NrmsError::shape_mismatch(
                "additive attention query",
                &[projection.out_dim(), 1],
                &[query.in_dim(), query.out_dim()],
            ));
        }
        Ok(Self {
            feature_dim: projection.in_dim(),
            projection,
            query,
            dropout: Dropout::new(dropout)?,
            observer: None,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ShapeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn hidden_dim(&self) -> usize {
        self.projection.out_dim()
    }

    /// Softmax weights over the length axis, `[batch × length]`.
    pub fn attention_weights(&self, x: &Tensor) -> NrmsResult<Tensor> {
        self.check_input(x)?;
        let (n, l) = (x.dim(0), x.dim(1));
        Tensor::from_vec(self.scores(x), &[n, l])
    }

    /// Collapse the length axis of `x` (`[batch × length × feature_dim]`).
    pub fn pool(&self, x: &Tensor, mode: &mut Mode<'_>) -> NrmsResult<Tensor> {
        self.check_input(x)?;
        let (n, l, f) = (x.dim(0), x.dim(1), x.dim(2));
        let weights = self.scores(x);
        self.report("weights", &[n, l, 1]);
        self.report("input", x.shape());

        let mut pooled = vec![0.0f32; n * f];
        pooled
            .par_chunks_mut(f)
            .zip(x.data().par_chunks(l * f))
            .zip(weights.par_chunks(l))
            .for_each(|((out, seq), w)| {
                for (row, &wt) in seq.chunks_exact(f).zip(w) {
                    for (o, &v) in out.iter_mut().zip(row) {
                        *o += wt * v;
                    }
                }
            });
        self.dropout.apply(&mut pooled, mode);
        self.report("output", &[n, f]);

        Tensor::from_vec(pooled, &[n, f])
    }

    fn check_input(&self, x: &Tensor) -> NrmsResult<()> {
        x.check_rank(3, "additive attention input")?;
        if x.dim(2) != self.feature_dim {
            return Err(NrmsError::shape_mismatch(
                "additive attention input",
                &[x.dim(0), x.dim(1), self.feature_dim],
                x.shape(),
            ));
        }
        Ok(())
    }

    /// Per-position probabilities, `[n·l]`, each run of `l` summing to one.
    fn scores(&self, x: &Tensor) -> Vec<f32> {
        let (n, l) = (x.dim(0), x.dim(1));
        let mut hidden = self.projection.forward(x.data(), n * l);
        hidden.par_iter_mut().for_each(|v| *v = v.tanh());
        let mut scores = self.query.forward(&hidden, n * l);
        scores.par_chunks_mut(l).for_each(softmax_in_place);
        scores
    }

    fn report(&self, label: &'static str, shape: &[usize]) {
        if let Some(observer) = &self.observer {
            observer.observe("additive_attention", label, shape);
        }
    }
}
