//! Multi-head scaled dot-product self-attention with lazily sized projections
//!
//! The query/key/value maps are not created by the constructor: their input width is
//! the embedding width of whatever is fed in first. The first `encode` (or an explicit
//! [`MultiHeadSelfAttention::initialize`]) draws them from the instance seed; later
//! calls reuse them and must present the same width.
//!
//! ```text
//!  x [N × L × E] ──► Q,K,V [N × L × H·D] ──► split [N × H × L × D]
//!                                              │
//!        softmax(Q·Kᵀ / √D) [N × H × L × L] ◄──┘
//!                    │ dropout
//!                    ▼
//!               attn · V [N × H × L × D] ──► merge [N × L × H·D]
//! ```

use crate::dropout::{Dropout, Mode};
use crate::error::{NrmsError, NrmsResult};
use crate::linear::Linear;
use crate::observer::ShapeObserver;
use crate::ops::{gemm, seeded_rng, softmax_in_place};
use crate::tensor::Tensor;
use faer::Par;
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;

/// The three input projections, all `embedding_dim → head_num·head_dim` with bias.
#[derive(Debug, Clone, PartialEq)]
pub struct QkvProjections {
    pub query: Linear,
    pub key: Linear,
    pub value: Linear,
}

impl QkvProjections {
    pub fn embedding_dim(&self) -> usize {
        self.query.in_dim()
    }
}

pub struct MultiHeadSelfAttention {
    head_num: usize,
    head_dim: usize,
    dropout: Dropout,
    seed: u64,
    // Written once; the cell serializes racing first calls.
    projections: OnceCell<QkvProjections>,
    observer: Option<Arc<dyn ShapeObserver>>,
}

impl fmt::Debug for MultiHeadSelfAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiHeadSelfAttention")
            .field("head_num", &self.head_num)
            .field("head_dim", &self.head_dim)
            .field("dropout", &self.dropout.probability())
            .field("embedding_dim", &self.embedding_dim())
            .finish()
    }
}

impl MultiHeadSelfAttention {
    pub fn new(head_num: usize, head_dim: usize, dropout: f32, seed: u64) -> NrmsResult<Self> {
        if head_num == 0 || head_dim == 0 {
            return Err(NrmsError::config(format!(
                "self-attention needs positive head_num and head_dim, got {head_num} x {head_dim}"
            )));
        }
        Ok(Self {
            head_num,
            head_dim,
            dropout: Dropout::new(dropout)?,
            seed,
            projections: OnceCell::new(),
            observer: None,
        })
    }

    /// Report Q/K/V, attention and output shapes to `observer` on every call.
    pub fn with_observer(mut self, observer: Arc<dyn ShapeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn head_num(&self) -> usize {
        self.head_num
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn output_dim(&self) -> usize {
        self.head_num * self.head_dim
    }

    pub fn is_initialized(&self) -> bool {
        self.projections.get().is_some()
    }

    /// Embedding width the projections were built for, once they exist.
    pub fn embedding_dim(&self) -> Option<usize> {
        self.projections.get().map(QkvProjections::embedding_dim)
    }

    pub fn projections(&self) -> Option<&QkvProjections> {
        self.projections.get()
    }

    /// Materialize the projections for `embedding_dim`.
    ///
    /// Idempotent for the width already in use; any other width is an error.
    pub fn initialize(&self, embedding_dim: usize) -> NrmsResult<&QkvProjections> {
        if embedding_dim == 0 {
            return Err(NrmsError::empty_input("self-attention embedding", &[0]));
        }
        let projections = self.projections.get_or_init(|| {
            tracing::debug!(
                embedding_dim,
                output_dim = self.output_dim(),
                "initializing self-attention projections"
            );
            let mut rng = seeded_rng(self.seed);
            let out = self.output_dim();
            QkvProjections {
                query: Linear::new(embedding_dim, out, true, &mut rng),
                key: Linear::new(embedding_dim, out, true, &mut rng),
                value: Linear::new(embedding_dim, out, true, &mut rng),
            }
        });
        if projections.embedding_dim() != embedding_dim {
            return Err(NrmsError::EmbeddingDimChanged {
                expected: projections.embedding_dim(),
                actual: embedding_dim,
            });
        }
        Ok(projections)
    }

    /// Install externally trained projections instead of drawing them.
    pub fn load_projections(&self, projections: QkvProjections) -> NrmsResult<()> {
        let out = self.output_dim();
        let e = projections.embedding_dim();
        for (name, layer) in [
            ("query projection", &projections.query),
            ("key projection", &projections.key),
            ("value projection", &projections.value),
        ] {
            if layer.in_dim() != e || layer.out_dim() != out {
                return Err(NrmsError::shape_mismatch(
                    name,
                    &[e, out],
                    &[layer.in_dim(), layer.out_dim()],
                ));
            }
        }
        self.projections.set(projections).map_err(|_| NrmsError::AlreadyInitialized {
            embedding_dim: self.embedding_dim().unwrap_or_default(),
        })
    }

    /// Attend `q_seq` over `k_seq`/`v_seq`, all `[batch × length × embedding_dim]`.
    ///
    /// Returns `[batch × length × head_num·head_dim]`.
    pub fn encode(
        &self,
        q_seq: &Tensor,
        k_seq: &Tensor,
        v_seq: &Tensor,
        mode: &mut Mode<'_>,
    ) -> NrmsResult<Tensor> {
        self.attend(q_seq, k_seq, v_seq, mode).map(|(output, _)| output)
    }

    /// Normalized attention weights `[batch × head_num × length × length]` in inference
    /// mode.
    pub fn attention_weights(&self, q_seq: &Tensor, k_seq: &Tensor) -> NrmsResult<Tensor> {
        self.attend(q_seq, k_seq, k_seq, &mut Mode::Eval).map(|(_, attn)| attn)
    }

    fn attend(
        &self,
        q_seq: &Tensor,
        k_seq: &Tensor,
        v_seq: &Tensor,
        mode: &mut Mode<'_>,
    ) -> NrmsResult<(Tensor, Tensor)> {
        q_seq.check_rank(3, "self-attention query")?;
        for (context, other) in [("self-attention key", k_seq), ("self-attention value", v_seq)] {
            if other.shape() != q_seq.shape() {
                return Err(NrmsError::shape_mismatch(context, q_seq.shape(), other.shape()));
            }
        }
        let (n, l, e) = (q_seq.dim(0), q_seq.dim(1), q_seq.dim(2));
        let projections = self.initialize(e)?;
        let (h, d) = (self.head_num, self.head_dim);
        let rows = n * l;

        let q = split_heads(&projections.query.forward(q_seq.data(), rows), n, l, h, d);
        let k = split_heads(&projections.key.forward(k_seq.data(), rows), n, l, h, d);
        let v = split_heads(&projections.value.forward(v_seq.data(), rows), n, l, h, d);
        self.report("Q", &[n, h, l, d]);
        self.report("K", &[n, h, l, d]);
        self.report("V", &[n, h, l, d]);

        // One (batch, head) block per task
        let scale = 1.0 / (d as f32).sqrt();
        let mut attn = vec![0.0f32; n * h * l * l];
        attn.par_chunks_mut(l * l)
            .zip(q.par_chunks(l * d))
            .zip(k.par_chunks(l * d))
            .for_each(|((scores, qh), kh)| {
                gemm(scores, qh, kh, l, d, l, scale, true, Par::Seq);
                for row in scores.chunks_exact_mut(l) {
                    softmax_in_place(row);
                }
            });
        self.dropout.apply(&mut attn, mode);

        let mut heads = vec![0.0f32; n * h * l * d];
        heads
            .par_chunks_mut(l * d)
            .zip(attn.par_chunks(l * l))
            .zip(v.par_chunks(l * d))
            .for_each(|((out, ah), vh)| gemm(out, ah, vh, l, l, d, 1.0, false, Par::Seq));

        let output = merge_heads(&heads, n, l, h, d);
        self.report("attention", &[n, h, l, l]);
        self.report("output", &[n, l, h * d]);

        Ok((
            Tensor::from_vec(output, &[n, l, h * d])?,
            Tensor::from_vec(attn, &[n, h, l, l])?,
        ))
    }

    fn report(&self, label: &'static str, shape: &[usize]) {
        if let Some(observer) = &self.observer {
            observer.observe("self_attention", label, shape);
        }
    }
}

/// `[n × l × h·d] → [n × h × l × d]`
fn split_heads(x: &[f32], n: usize, l: usize, h: usize, d: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; n * l * h * d];
    out.par_chunks_mut(h * l * d).enumerate().for_each(|(b, block)| {
        for t in 0..l {
            for head in 0..h {
                let src = ((b * l + t) * h + head) * d;
                let dst = (head * l + t) * d;
                block[dst..dst + d].copy_from_slice(&x[src..src + d]);
            }
        }
    });
    out
}

/// `[n × h × l × d] → [n × l × h·d]`
fn merge_heads(x: &[f32], n: usize, l: usize, h: usize, d: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; n * l * h * d];
    out.par_chunks_mut(l * h * d).enumerate().for_each(|(b, block)| {
        for head in 0..h {
            for t in 0..l {
                let src = ((b * h + head) * l + t) * d;
                let dst = (t * h + head) * d;
                block[dst..dst + d].copy_from_slice(&x[src..src + d]);
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::seeded_rng;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    fn random_input(shape: &[usize], seed: u64) -> Tensor {
        use rand::Rng;
        let mut rng = seeded_rng(seed);
        let n: usize = shape.iter().product();
        Tensor::from_vec((0..n).map(|_| rng.random_range(-1.0..1.0)).collect(), shape).unwrap()
    }

    fn identity_projections(e: usize) -> QkvProjections {
        let mut eye = vec![0.0f32; e * e];
        for i in 0..e {
            eye[i * e + i] = 1.0;
        }
        let layer = Linear::from_parts(e, e, eye, Some(vec![0.0; e])).unwrap();
        QkvProjections { query: layer.clone(), key: layer.clone(), value: layer }
    }

    #[test]
    fn output_shape_for_two_heads_of_four() {
        let attention = MultiHeadSelfAttention::new(2, 4, 0.2, 1).unwrap();
        let x = random_input(&[2, 5, 8], 9);
        let out = attention.encode(&x, &x, &x, &mut Mode::Eval).unwrap();
        assert_eq!(out.shape(), &[2, 5, 8]);
        assert!(out.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn projections_are_created_once() {
        let attention = MultiHeadSelfAttention::new(2, 3, 0.0, 4).unwrap();
        assert!(!attention.is_initialized());
        assert_eq!(attention.embedding_dim(), None);

        let x = random_input(&[1, 4, 5], 2);
        let first = attention.encode(&x, &x, &x, &mut Mode::Eval).unwrap();
        let before = attention.projections().unwrap() as *const QkvProjections;
        let snapshot = attention.projections().unwrap().clone();

        let second = attention.encode(&x, &x, &x, &mut Mode::Eval).unwrap();
        assert!(std::ptr::eq(before, attention.projections().unwrap()));
        assert_eq!(&snapshot, attention.projections().unwrap());
        assert_eq!(attention.embedding_dim(), Some(5));
        assert_eq!(first, second);
    }

    #[test]
    fn embedding_width_is_fixed_after_first_call() {
        let attention = MultiHeadSelfAttention::new(2, 2, 0.0, 4).unwrap();
        let x = random_input(&[1, 3, 6], 1);
        attention.encode(&x, &x, &x, &mut Mode::Eval).unwrap();

        let wider = random_input(&[1, 3, 7], 1);
        let err = attention.encode(&wider, &wider, &wider, &mut Mode::Eval).unwrap_err();
        assert!(matches!(err, NrmsError::EmbeddingDimChanged { expected: 6, actual: 7 }));
        assert!(attention.initialize(6).is_ok());
    }

    #[test]
    fn mismatched_qkv_shapes_are_rejected() {
        let attention = MultiHeadSelfAttention::new(1, 2, 0.0, 0).unwrap();
        let q = random_input(&[2, 3, 4], 1);
        let other_batch = random_input(&[1, 3, 4], 2);
        let other_width = random_input(&[2, 3, 5], 3);

        assert!(attention.encode(&q, &other_batch, &q, &mut Mode::Eval).unwrap_err().is_shape_error());
        assert!(attention.encode(&q, &q, &other_width, &mut Mode::Eval).unwrap_err().is_shape_error());
        assert!(!attention.is_initialized());
    }

    #[test]
    fn degenerate_inputs_fail_fast() {
        let attention = MultiHeadSelfAttention::new(1, 2, 0.0, 0).unwrap();
        for shape in [[0, 3, 4], [2, 0, 4], [2, 3, 0]] {
            let x = Tensor::zeros(&shape);
            let err = attention.encode(&x, &x, &x, &mut Mode::Eval).unwrap_err();
            assert!(matches!(err, NrmsError::EmptyInput { .. }), "{shape:?}");
        }
        let flat = Tensor::zeros(&[3, 4]);
        assert!(attention.encode(&flat, &flat, &flat, &mut Mode::Eval).is_err());
    }

    #[test]
    fn single_head_identity_matches_hand_computation() {
        let attention = MultiHeadSelfAttention::new(1, 2, 0.0, 0).unwrap();
        attention.load_projections(identity_projections(2)).unwrap();

        let x = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], &[1, 2, 2]).unwrap();
        let out = attention.encode(&x, &x, &x, &mut Mode::Eval).unwrap();

        let s = 1.0f32 / 2.0f32.sqrt();
        let p = s.exp() / (s.exp() + 1.0);
        let expected = [p, 1.0 - p, 1.0 - p, p];
        for (a, b) in out.data().iter().zip(expected) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn heads_attend_independently() {
        // Two heads of width one: each head only sees its own coordinate.
        let attention = MultiHeadSelfAttention::new(2, 1, 0.0, 0).unwrap();
        attention.load_projections(identity_projections(2)).unwrap();

        let x = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], &[1, 2, 2]).unwrap();
        let out = attention.encode(&x, &x, &x, &mut Mode::Eval).unwrap();

        let p = 1.0f32.exp() / (1.0f32.exp() + 1.0);
        let expected = [p, 0.5, 0.5, p];
        for (a, b) in out.data().iter().zip(expected) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }

        let attn = attention.attention_weights(&x, &x).unwrap();
        assert_eq!(attn.shape(), &[1, 2, 2, 2]);
        // head 1, query 0 has a zero query vector and attends uniformly
        assert!((attn.data()[4] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn load_after_init_is_rejected() {
        let attention = MultiHeadSelfAttention::new(1, 2, 0.0, 0).unwrap();
        attention.initialize(2).unwrap();
        let err = attention.load_projections(identity_projections(2)).unwrap_err();
        assert!(matches!(err, NrmsError::AlreadyInitialized { embedding_dim: 2 }));
    }

    #[test]
    fn load_rejects_wrong_output_width() {
        let attention = MultiHeadSelfAttention::new(2, 2, 0.0, 0).unwrap();
        let err = attention.load_projections(identity_projections(2)).unwrap_err();
        assert!(err.is_shape_error());
        assert!(!attention.is_initialized());
    }

    #[test]
    fn same_seed_same_weights() {
        let a = MultiHeadSelfAttention::new(2, 2, 0.0, 77).unwrap();
        let b = MultiHeadSelfAttention::new(2, 2, 0.0, 77).unwrap();
        a.initialize(3).unwrap();
        b.initialize(3).unwrap();
        assert_eq!(a.projections(), b.projections());
    }

    #[test]
    fn concurrent_first_calls_initialize_once() {
        let attention = MultiHeadSelfAttention::new(2, 2, 0.0, 5).unwrap();
        let x = random_input(&[2, 3, 4], 8);

        let outputs: Vec<Tensor> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| attention.encode(&x, &x, &x, &mut Mode::Eval).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(outputs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(attention.embedding_dim(), Some(4));
    }

    #[test]
    fn training_mode_uses_caller_rng() {
        let attention = MultiHeadSelfAttention::new(2, 2, 0.5, 3).unwrap();
        let x = random_input(&[2, 4, 3], 6);
        let run = |seed| {
            let mut rng = seeded_rng(seed);
            attention.encode(&x, &x, &x, &mut Mode::Train(&mut rng)).unwrap()
        };
        assert_eq!(run(1), run(1));
        assert_ne!(run(1), attention.encode(&x, &x, &x, &mut Mode::Eval).unwrap());
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(&'static str, Vec<usize>)>>);

    impl ShapeObserver for Recorder {
        fn observe(&self, _module: &'static str, label: &'static str, shape: &[usize]) {
            self.0.lock().push((label, shape.to_vec()));
        }
    }

    #[test]
    fn observer_receives_every_shape() {
        let recorder = Arc::new(Recorder::default());
        let attention = MultiHeadSelfAttention::new(2, 4, 0.0, 1)
            .unwrap()
            .with_observer(recorder.clone());
        let x = random_input(&[2, 5, 8], 2);
        attention.encode(&x, &x, &x, &mut Mode::Eval).unwrap();

        let events = recorder.0.lock();
        assert_eq!(
            *events,
            vec![
                ("Q", vec![2, 2, 5, 4]),
                ("K", vec![2, 2, 5, 4]),
                ("V", vec![2, 2, 5, 4]),
                ("attention", vec![2, 2, 5, 5]),
                ("output", vec![2, 5, 8]),
            ]
        );
    }

    proptest! {
        #[test]
        fn rows_are_distributions(
            n in 1usize..4,
            l in 1usize..7,
            e in 1usize..9,
            h in 1usize..4,
            d in 1usize..5,
            seed in any::<u64>(),
        ) {
            let attention = MultiHeadSelfAttention::new(h, d, 0.1, seed).unwrap();
            let x = random_input(&[n, l, e], seed);

            let out = attention.encode(&x, &x, &x, &mut Mode::Eval).unwrap();
            prop_assert_eq!(out.shape(), &[n, l, h * d][..]);

            let attn = attention.attention_weights(&x, &x).unwrap();
            prop_assert_eq!(attn.shape(), &[n, h, l, l][..]);
            for row in attn.data().chunks(l) {
                prop_assert!(row.iter().all(|&w| w >= 0.0));
                prop_assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            }
        }
    }
}
