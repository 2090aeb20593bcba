//! Token embedding table

use crate::error::{NrmsError, NrmsResult};
use crate::tensor::{Tensor, TokenIds};

/// `[vocab_size × dim]` lookup table, row `i` embedding token id `i`.
///
/// Built from externally supplied (usually pretrained) vectors and left mutable so a
/// training loop can fine-tune it through [`Embedding::table_mut`].
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    vocab_size: usize,
    dim: usize,
    table: Vec<f32>,
}

impl Embedding {
    pub fn from_pretrained(table: Vec<f32>, vocab_size: usize, dim: usize) -> NrmsResult<Self> {
        if vocab_size == 0 || dim == 0 {
            return Err(NrmsError::empty_input("embedding table", &[vocab_size, dim]));
        }
        if table.len() != vocab_size * dim {
            return Err(NrmsError::shape_mismatch(
                "embedding table",
                &[vocab_size, dim],
                &[table.len()],
            ));
        }
        Ok(Self { vocab_size, dim, table })
    }

    /// Build from one vector per token; all rows must share a width.
    pub fn from_rows(rows: &[Vec<f32>]) -> NrmsResult<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        let mut table = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(NrmsError::shape_mismatch("embedding row", &[dim], &[row.len()]));
            }
            table.extend_from_slice(row);
        }
        Self::from_pretrained(table, rows.len(), dim)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn table(&self) -> &[f32] {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut [f32] {
        &mut self.table
    }

    pub fn vector(&self, id: u32) -> Option<&[f32]> {
        let id = id as usize;
        (id < self.vocab_size).then(|| &self.table[id * self.dim..(id + 1) * self.dim])
    }

    /// Gather rows for every id; the output shape is `ids.shape() ++ [dim]`.
    pub fn lookup(&self, ids: &TokenIds) -> NrmsResult<Tensor> {
        let mut out = Vec::with_capacity(ids.len() * self.dim);
        for &id in ids.data() {
            let row = self.vector(id).ok_or(NrmsError::TokenOutOfRange {
                id: id as u64,
                vocab_size: self.vocab_size,
            })?;
            out.extend_from_slice(row);
        }
        let mut shape = ids.shape().to_vec();
        shape.push(self.dim);
        Tensor::from_vec(out, &shape)
    }
}
