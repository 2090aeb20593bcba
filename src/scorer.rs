// Candidate scoring and ranking.
//
// Scores are raw dot products between each candidate vector and the user vector of
// the same batch instance; no activation is applied, the caller's loss or decision
// rule owns normalization.

use crate::error::{NrmsError, NrmsResult};
use crate::ops::gemm;
use crate::tensor::Tensor;
use faer::Par;
use rayon::prelude::*;
use std::cmp::Ordering;

/// `user [N × F]`, `candidates [N × C × F]` → `[N × C]`, one mat-vec product per
/// batch instance.
pub fn score_candidates(user: &Tensor, candidates: &Tensor) -> NrmsResult<Tensor> {
    user.check_rank(2, "user vectors")?;
    candidates.check_rank(3, "candidate vectors")?;
    let (n, f) = (user.dim(0), user.dim(1));
    let c = candidates.dim(1);
    if candidates.dim(0) != n || candidates.dim(2) != f {
        return Err(NrmsError::shape_mismatch(
            "candidate vectors",
            &[n, c, f],
            candidates.shape(),
        ));
    }

    let mut scores = vec![0.0f32; n * c];
    scores
        .par_chunks_mut(c)
        .zip(candidates.data().par_chunks(c * f))
        .zip(user.data().par_chunks(f))
        .for_each(|((out, cand), u)| gemm(out, cand, u, c, f, 1, 1.0, false, Par::Seq));

    Tensor::from_vec(scores, &[n, c])
}

/// Top `top_k` `(candidate_index, score)` pairs per batch instance, best first.
pub fn rank_candidates(scores: &Tensor, top_k: usize) -> NrmsResult<Vec<Vec<(usize, f32)>>> {
    scores.check_rank(2, "scores")?;
    let c = scores.dim(1);
    Ok(scores
        .data()
        .par_chunks(c)
        .map(|row| {
            let take = top_k.min(c);
            if take == 0 {
                return vec![];
            }
            let mut scored: Vec<(usize, f32)> = row.iter().copied().enumerate().collect();
            scored.select_nth_unstable_by(take - 1, best_first);
            scored.truncate(take);
            scored.sort_unstable_by(best_first);
            scored
        })
        .collect())
}

/// Descending score, NaN last, then ascending candidate index.
fn best_first(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    a.1.is_nan()
        .cmp(&b.1.is_nan())
        .then(b.1.total_cmp(&a.1))
        .then(a.0.cmp(&b.0))
}
