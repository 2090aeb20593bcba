//! Self-attention followed by additive pooling, at item and user level

use crate::additive_attention::AdditiveAttention;
use crate::dropout::{Dropout, Mode};
use crate::embedding::Embedding;
use crate::error::NrmsResult;
use crate::observer::ShapeObserver;
use crate::self_attention::MultiHeadSelfAttention;
use crate::tensor::{Tensor, TokenIds};
use std::sync::Arc;

/// `[N × L × E] → [N × head_num·head_dim]`.
///
/// Each instance owns its attention modules; item and user levels never share weights.
#[derive(Debug)]
pub struct HierarchicalEncoder {
    self_attention: MultiHeadSelfAttention,
    pooling: AdditiveAttention,
}

impl HierarchicalEncoder {
    pub fn new(
        head_num: usize,
        head_dim: usize,
        attention_hidden_dim: usize,
        dropout: f32,
        seed: u64,
    ) -> NrmsResult<Self> {
        let self_attention = MultiHeadSelfAttention::new(head_num, head_dim, dropout, seed)?;
        let pooling = AdditiveAttention::new(
            self_attention.output_dim(),
            attention_hidden_dim,
            dropout,
            seed.wrapping_add(1),
        )?;
        Ok(Self { self_attention, pooling })
    }

    pub fn with_observer(self, observer: Arc<dyn ShapeObserver>) -> Self {
        Self {
            self_attention: self.self_attention.with_observer(observer.clone()),
            pooling: self.pooling.with_observer(observer),
        }
    }

    pub fn self_attention(&self) -> &MultiHeadSelfAttention {
        &self.self_attention
    }

    pub fn pooling(&self) -> &AdditiveAttention {
        &self.pooling
    }

    pub fn output_dim(&self) -> usize {
        self.self_attention.output_dim()
    }

    pub fn encode(&self, x: &Tensor, mode: &mut Mode<'_>) -> NrmsResult<Tensor> {
        let attended = self.self_attention.encode(x, x, x, mode)?;
        self.pooling.pool(&attended, mode)
    }
}

/// Token ids of one item → item vector: embedding lookup, dropout, then a
/// [`HierarchicalEncoder`].
#[derive(Debug)]
pub struct ItemEncoder {
    embedding: Embedding,
    dropout: Dropout,
    encoder: HierarchicalEncoder,
}

impl ItemEncoder {
    pub fn new(embedding: Embedding, dropout: f32, encoder: HierarchicalEncoder) -> NrmsResult<Self> {
        Ok(Self {
            embedding,
            dropout: Dropout::new(dropout)?,
            encoder,
        })
    }

    pub fn with_observer(self, observer: Arc<dyn ShapeObserver>) -> Self {
        Self {
            encoder: self.encoder.with_observer(observer),
            ..self
        }
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    pub fn embedding_mut(&mut self) -> &mut Embedding {
        &mut self.embedding
    }

    pub fn encoder(&self) -> &HierarchicalEncoder {
        &self.encoder
    }

    /// `[N × seq_len]` token ids → `[N × feature_dim]`
    pub fn encode(&self, tokens: &TokenIds, mode: &mut Mode<'_>) -> NrmsResult<Tensor> {
        tokens.check_rank(2, "item tokens")?;
        let mut x = self.embedding.lookup(tokens)?;
        self.dropout.apply(x.data_mut(), mode);
        self.encoder.encode(&x, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NrmsError;

    fn embedding(vocab: usize, dim: usize) -> Embedding {
        let table = (0..vocab * dim).map(|i| ((i * 7919) % 97) as f32 / 97.0 - 0.5).collect();
        Embedding::from_pretrained(table, vocab, dim).unwrap()
    }

    #[test]
    fn encodes_token_sequences_to_feature_vectors() {
        let encoder = HierarchicalEncoder::new(2, 4, 16, 0.0, 3).unwrap();
        let items = ItemEncoder::new(embedding(50, 6), 0.0, encoder).unwrap();

        let tokens = TokenIds::from_vec((0..10).collect(), &[2, 5]).unwrap();
        let out = items.encode(&tokens, &mut Mode::Eval).unwrap();
        assert_eq!(out.shape(), &[2, 8]);
        assert_eq!(items.encoder().self_attention().embedding_dim(), Some(6));
    }

    #[test]
    fn batch_rows_are_encoded_independently() {
        let encoder = HierarchicalEncoder::new(2, 2, 8, 0.0, 1).unwrap();
        let items = ItemEncoder::new(embedding(20, 4), 0.0, encoder).unwrap();

        let pair = TokenIds::from_vec(vec![1, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
        let single = TokenIds::from_vec(vec![4, 5, 6], &[1, 3]).unwrap();
        let both = items.encode(&pair, &mut Mode::Eval).unwrap();
        let alone = items.encode(&single, &mut Mode::Eval).unwrap();
        for (a, b) in both.row(1).iter().zip(alone.row(0)) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn token_ids_must_be_in_vocabulary() {
        let encoder = HierarchicalEncoder::new(1, 2, 4, 0.0, 1).unwrap();
        let items = ItemEncoder::new(embedding(5, 2), 0.0, encoder).unwrap();
        let tokens = TokenIds::from_vec(vec![0, 5], &[1, 2]).unwrap();
        let err = items.encode(&tokens, &mut Mode::Eval).unwrap_err();
        assert!(matches!(err, NrmsError::TokenOutOfRange { id: 5, .. }));
    }

    #[test]
    fn pooling_width_follows_attention_width() {
        let encoder = HierarchicalEncoder::new(3, 5, 7, 0.1, 0).unwrap();
        assert_eq!(encoder.output_dim(), 15);
        assert_eq!(encoder.pooling().feature_dim(), 15);
        assert_eq!(encoder.pooling().hidden_dim(), 7);
    }
}
