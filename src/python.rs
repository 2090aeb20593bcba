// Python entry points.
//
// Token ids arrive as int64 numpy arrays (the numpy default) and are validated into
// u32 vocabulary indices; every forward pass runs in inference mode with the GIL
// released.

use crate::config::NrmsConfig;
use crate::dropout::Mode;
use crate::embedding::Embedding;
use crate::model::NrmsModel;
use crate::scorer::rank_candidates;
use crate::tensor::{Tensor, TokenIds};
use numpy::{
    PyArray1, PyArray2, PyArrayMethods, PyReadonlyArray2, PyReadonlyArray3, PyUntypedArrayMethods,
};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

fn token_ids(data: &[i64], shape: &[usize]) -> PyResult<TokenIds> {
    let ids = data
        .iter()
        .map(|&id| {
            u32::try_from(id).map_err(|_| {
                PyValueError::new_err(format!("token id {id} is not a valid vocabulary index"))
            })
        })
        .collect::<PyResult<Vec<u32>>>()?;
    Ok(TokenIds::from_vec(ids, shape)?)
}

fn to_pyarray2(py: Python<'_>, t: Tensor) -> PyResult<Py<PyArray2<f32>>> {
    let (rows, cols) = (t.dim(0), t.dim(1));
    let arr = PyArray1::from_vec(py, t.into_vec());
    Ok(arr.reshape([rows, cols])?.into())
}

/// NRMS ranking model over a fine-tunable word embedding matrix.
#[pyclass(name = "NRMS", module = "nrms._nrms")]
pub struct PyNrms {
    model: NrmsModel,
}

#[pymethods]
impl PyNrms {
    #[new]
    #[pyo3(signature = (word_embeddings, head_num=20, head_dim=20, attention_hidden_dim=200, dropout=0.2, verbose=false, seed=42))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        word_embeddings: PyReadonlyArray2<'_, f32>,
        head_num: usize,
        head_dim: usize,
        attention_hidden_dim: usize,
        dropout: f32,
        verbose: bool,
        seed: u64,
    ) -> PyResult<Self> {
        let (vocab_size, dim) = (word_embeddings.shape()[0], word_embeddings.shape()[1]);
        let embedding = Embedding::from_pretrained(word_embeddings.as_slice()?.to_vec(), vocab_size, dim)?;
        let config = NrmsConfig {
            head_num,
            head_dim,
            attention_hidden_dim,
            dropout,
            verbose,
            seed,
        };
        Ok(Self { model: NrmsModel::new(config, embedding)? })
    }

    /// Build from a JSON hyperparameter file.
    #[staticmethod]
    fn from_config_file(path: &str, word_embeddings: PyReadonlyArray2<'_, f32>) -> PyResult<Self> {
        let config = NrmsConfig::from_path(path)?;
        let (vocab_size, dim) = (word_embeddings.shape()[0], word_embeddings.shape()[1]);
        let embedding = Embedding::from_pretrained(word_embeddings.as_slice()?.to_vec(), vocab_size, dim)?;
        Ok(Self { model: NrmsModel::new(config, embedding)? })
    }

    #[getter]
    fn feature_dim(&self) -> usize {
        self.model.feature_dim()
    }

    /// Copy of the current embedding matrix.
    #[getter]
    fn word_embeddings(&self, py: Python<'_>) -> PyResult<Py<PyArray2<f32>>> {
        let emb = self.model.embedding();
        let t = Tensor::from_vec(emb.table().to_vec(), &[emb.vocab_size(), emb.dim()])?;
        to_pyarray2(py, t)
    }

    fn warm_up(&self) -> PyResult<()> {
        Ok(self.model.warm_up()?)
    }

    /// `(n_items, seq_len)` token ids → `(n_items, feature_dim)` item vectors.
    fn encode_items(&self, py: Python<'_>, tokens: PyReadonlyArray2<'_, i64>) -> PyResult<Py<PyArray2<f32>>> {
        let tokens = token_ids(tokens.as_slice()?, tokens.shape())?;
        let vectors = py.detach(|| self.model.encode_item(&tokens, &mut Mode::Eval))?;
        to_pyarray2(py, vectors)
    }

    /// `(batch, history_len, seq_len)` token ids → `(batch, feature_dim)` user vectors.
    fn encode_user(&self, py: Python<'_>, history: PyReadonlyArray3<'_, i64>) -> PyResult<Py<PyArray2<f32>>> {
        let history = token_ids(history.as_slice()?, history.shape())?;
        let vectors = py.detach(|| self.model.encode_user(&history, &mut Mode::Eval))?;
        to_pyarray2(py, vectors)
    }

    /// Raw relevance scores `(batch, candidate_count)`.
    fn score(
        &self,
        py: Python<'_>,
        history: PyReadonlyArray3<'_, i64>,
        candidates: PyReadonlyArray3<'_, i64>,
    ) -> PyResult<Py<PyArray2<f32>>> {
        let history = token_ids(history.as_slice()?, history.shape())?;
        let candidates = token_ids(candidates.as_slice()?, candidates.shape())?;
        let scores = py.detach(|| self.model.score(&history, &candidates, &mut Mode::Eval))?;
        to_pyarray2(py, scores)
    }

    /// Best `top_k` `(candidate_index, score)` pairs per batch instance.
    fn rank(
        &self,
        py: Python<'_>,
        history: PyReadonlyArray3<'_, i64>,
        candidates: PyReadonlyArray3<'_, i64>,
        top_k: usize,
    ) -> PyResult<Vec<Vec<(usize, f32)>>> {
        let history = token_ids(history.as_slice()?, history.shape())?;
        let candidates = token_ids(candidates.as_slice()?, candidates.shape())?;
        Ok(py.detach(|| self.model.rank(&history, &candidates, top_k))?)
    }
}

/// Rank an externally computed `(batch, candidate_count)` score matrix.
#[pyfunction]
#[pyo3(signature = (scores, top_k))]
pub fn rank_scores(
    py: Python<'_>,
    scores: PyReadonlyArray2<'_, f32>,
    top_k: usize,
) -> PyResult<Vec<Vec<(usize, f32)>>> {
    let scores = Tensor::from_vec(scores.as_slice()?.to_vec(), scores.shape())?;
    Ok(py.detach(|| rank_candidates(&scores, top_k))?)
}
