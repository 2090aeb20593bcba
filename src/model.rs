//! NRMS: user interest from self-attended click history, scored against candidates
//!
//! ```text
//!  history [N × H × L] ──flatten──► [N·H × L] ──ItemEncoder──► [N·H × F] ──► [N × H × F]
//!                                                                              │
//!                                                  user HierarchicalEncoder ◄──┘
//!                                                              │
//!  candidates [N × C × L] ──► [N·C × L] ──ItemEncoder──► [N × C × F] · user [N × F]
//!                                                              │
//!                                                       scores [N × C]
//! ```
//!
//! History and candidate items are always encoded by one batched item-encoder call,
//! never item by item.

use crate::config::NrmsConfig;
use crate::dropout::Mode;
use crate::embedding::Embedding;
use crate::encoder::{HierarchicalEncoder, ItemEncoder};
use crate::error::{NrmsError, NrmsResult};
use crate::observer::{ShapeObserver, TracingObserver};
use crate::scorer::{rank_candidates, score_candidates};
use crate::tensor::{Tensor, TokenIds};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct NrmsModel {
    config: NrmsConfig,
    item_encoder: ItemEncoder,
    user_encoder: HierarchicalEncoder,
}

impl NrmsModel {
    /// Build the model around a pretrained (and still trainable) embedding table.
    ///
    /// Attention projections are drawn lazily on first use from seeds derived from
    /// `config.seed`; the additive-attention scorers are drawn here.
    pub fn new(config: NrmsConfig, embedding: Embedding) -> NrmsResult<Self> {
        config.validate()?;
        let item_level = HierarchicalEncoder::new(
            config.head_num,
            config.head_dim,
            config.attention_hidden_dim,
            config.dropout,
            config.seed,
        )?;
        let user_encoder = HierarchicalEncoder::new(
            config.head_num,
            config.head_dim,
            config.attention_hidden_dim,
            config.dropout,
            config.seed.wrapping_add(2),
        )?;
        debug!(
            vocab_size = embedding.vocab_size(),
            embedding_dim = embedding.dim(),
            head_num = config.head_num,
            head_dim = config.head_dim,
            attention_hidden_dim = config.attention_hidden_dim,
            dropout = config.dropout,
            "built NRMS model"
        );

        let model = Self {
            item_encoder: ItemEncoder::new(embedding, config.dropout, item_level)?,
            user_encoder,
            config,
        };
        Ok(if model.config.verbose {
            model.with_observer(Arc::new(TracingObserver))
        } else {
            model
        })
    }

    /// Route shape diagnostics of every attention module to `observer`.
    pub fn with_observer(self, observer: Arc<dyn ShapeObserver>) -> Self {
        Self {
            item_encoder: self.item_encoder.with_observer(observer.clone()),
            user_encoder: self.user_encoder.with_observer(observer),
            config: self.config,
        }
    }

    pub fn config(&self) -> &NrmsConfig {
        &self.config
    }

    /// Width of item and user vectors
    pub fn feature_dim(&self) -> usize {
        self.config.feature_dim()
    }

    pub fn embedding(&self) -> &Embedding {
        self.item_encoder.embedding()
    }

    pub fn embedding_mut(&mut self) -> &mut Embedding {
        self.item_encoder.embedding_mut()
    }

    pub fn item_encoder(&self) -> &ItemEncoder {
        &self.item_encoder
    }

    pub fn user_encoder(&self) -> &HierarchicalEncoder {
        &self.user_encoder
    }

    /// Materialize both sets of attention projections before the model is shared.
    pub fn warm_up(&self) -> NrmsResult<()> {
        self.item_encoder
            .encoder()
            .self_attention()
            .initialize(self.embedding().dim())?;
        self.user_encoder.self_attention().initialize(self.feature_dim())?;
        debug!("attention projections initialized");
        Ok(())
    }

    /// `[N × seq_len]` token ids → `[N × feature_dim]`
    pub fn encode_item(&self, tokens: &TokenIds, mode: &mut Mode<'_>) -> NrmsResult<Tensor> {
        self.item_encoder.encode(tokens, mode)
    }

    /// `[N × history_len × seq_len]` token ids → `[N × feature_dim]`
    pub fn encode_user(&self, history: &TokenIds, mode: &mut Mode<'_>) -> NrmsResult<Tensor> {
        let item_vectors = self.encode_item_groups(history, "history", mode)?;
        self.encode_user_from_vectors(&item_vectors, mode)
    }

    /// User vectors from precomputed item vectors `[N × history_len × feature_dim]`.
    pub fn encode_user_from_vectors(
        &self,
        item_vectors: &Tensor,
        mode: &mut Mode<'_>,
    ) -> NrmsResult<Tensor> {
        item_vectors.check_rank(3, "history item vectors")?;
        if item_vectors.dim(2) != self.feature_dim() {
            return Err(NrmsError::shape_mismatch(
                "history item vectors",
                &[item_vectors.dim(0), item_vectors.dim(1), self.feature_dim()],
                item_vectors.shape(),
            ));
        }
        self.user_encoder.encode(item_vectors, mode)
    }

    /// Relevance of each candidate, `[N × candidate_count]`, unnormalized.
    pub fn score(
        &self,
        history: &TokenIds,
        candidates: &TokenIds,
        mode: &mut Mode<'_>,
    ) -> NrmsResult<Tensor> {
        history.check_rank(3, "history")?;
        candidates.check_rank(3, "candidates")?;
        if history.dim(0) != candidates.dim(0) {
            return Err(NrmsError::shape_mismatch(
                "candidates batch",
                &[history.dim(0)],
                &[candidates.dim(0)],
            ));
        }
        trace!(
            batch = history.dim(0),
            history_len = history.dim(1),
            candidate_count = candidates.dim(1),
            "scoring"
        );
        let user = self.encode_user(history, mode)?;
        let candidate_vectors = self.encode_item_groups(candidates, "candidates", mode)?;
        score_candidates(&user, &candidate_vectors)
    }

    /// Score precomputed vectors: `user [N × F]` against `candidates [N × C × F]`.
    pub fn score_vectors(&self, user: &Tensor, candidates: &Tensor) -> NrmsResult<Tensor> {
        score_candidates(user, candidates)
    }

    /// Inference-mode scores reduced to the `top_k` best candidates per instance.
    pub fn rank(
        &self,
        history: &TokenIds,
        candidates: &TokenIds,
        top_k: usize,
    ) -> NrmsResult<Vec<Vec<(usize, f32)>>> {
        let scores = self.score(history, candidates, &mut Mode::Eval)?;
        rank_candidates(&scores, top_k)
    }

    /// `[N × G × L]` → one item-encoder call over `[N·G × L]` → `[N × G × F]`.
    fn encode_item_groups(
        &self,
        groups: &TokenIds,
        context: &str,
        mode: &mut Mode<'_>,
    ) -> NrmsResult<Tensor> {
        groups.check_rank(3, context)?;
        let (n, g, l) = (groups.dim(0), groups.dim(1), groups.dim(2));
        let flat = TokenIds::from_vec(groups.data().to_vec(), &[n * g, l])?;
        self.encode_item(&flat, mode)?.reshape(&[n, g, self.feature_dim()])
    }
}
