//! Forward mode and inverted dropout

use crate::config::validate_dropout;
use crate::error::NrmsResult;
use rand::rngs::StdRng;
use rand::Rng;

/// Whether a forward call is regularized.
///
/// The training loop owns the generator, so a model shared read-only across threads
/// never contends on random state.
#[derive(Debug)]
pub enum Mode<'a> {
    /// Inference: dropout is the identity
    Eval,
    /// Training: dropout masks are drawn from the supplied generator
    Train(&'a mut StdRng),
}

impl Mode<'_> {
    pub fn is_training(&self) -> bool {
        matches!(self, Mode::Train(_))
    }
}

/// Inverted dropout: kept activations are scaled by `1 / (1 - p)` so the expected
/// value is unchanged and inference needs no rescaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    pub fn new(p: f32) -> NrmsResult<Self> {
        validate_dropout(p)?;
        Ok(Self { p })
    }

    pub fn probability(&self) -> f32 {
        self.p
    }

    pub fn apply(&self, x: &mut [f32], mode: &mut Mode<'_>) {
        let rng = match mode {
            Mode::Train(rng) if self.p > 0.0 => rng,
            _ => return,
        };
        let scale = 1.0 / (1.0 - self.p);
        for v in x.iter_mut() {
            if rng.random::<f32>() < self.p {
                *v = 0.0;
            } else {
                *v *= scale;
            }
        }
    }
}
