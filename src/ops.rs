// Shared numeric kernels.
//
// Dense products go through faer; everything else is a plain loop over row-major
// slices.

use faer::{linalg::matmul::matmul, Accum, MatMut, MatRef, Par};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// `out[m × n] = alpha · a[m × k] · b`, where `b` is `[k × n]`, or `[n × k]` read
/// transposed when `b_transposed` is set.
#[allow(clippy::too_many_arguments)]
pub(crate) fn gemm(
    out: &mut [f32],
    a: &[f32],
    b: &[f32],
    m: usize,
    k: usize,
    n: usize,
    alpha: f32,
    b_transposed: bool,
    par: Par,
) {
    let lhs = MatRef::from_row_major_slice(a, m, k);
    let dst = MatMut::from_row_major_slice_mut(out, m, n);
    if b_transposed {
        matmul(
            dst,
            Accum::Replace,
            lhs,
            MatRef::from_row_major_slice(b, n, k).transpose(),
            alpha,
            par,
        );
    } else {
        matmul(
            dst,
            Accum::Replace,
            lhs,
            MatRef::from_row_major_slice(b, k, n),
            alpha,
            par,
        );
    }
}

/// Parallelize only products large enough to amortize the split.
#[inline]
pub(crate) fn par_for(flops: usize) -> Par {
    if flops >= 1 << 18 {
        Par::rayon(0)
    } else {
        Par::Seq
    }
}

/// Max-subtracted softmax over one row.
///
/// A row whose maximum is `-inf` carries no preference and becomes uniform; a row
/// containing `+inf` splits the mass between its infinite entries.
pub(crate) fn softmax_in_place(row: &mut [f32]) {
    let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    if max == f32::NEG_INFINITY {
        row.fill(1.0 / row.len() as f32);
        return;
    }
    if max == f32::INFINITY {
        let n_inf = row.iter().filter(|v| **v == f32::INFINITY).count() as f32;
        for v in row.iter_mut() {
            *v = if *v == f32::INFINITY { 1.0 / n_inf } else { 0.0 };
        }
        return;
    }
    let mut sum = 0.0_f32;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in row.iter_mut() {
        *v /= sum;
    }
}

pub(crate) fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}
