//! Error types for the ranking model

use thiserror::Error;

/// Result type for model operations
pub type NrmsResult<T> = std::result::Result<T, NrmsError>;

/// Every failure a forward call or model construction can report.
///
/// All variants except `Io`/`Serialization` describe a caller contract violation;
/// none of them are retried internally.
#[derive(Error, Debug)]
pub enum NrmsError {
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Embedding width changed after initialization: projections expect {expected}, got {actual}")]
    EmbeddingDimChanged { expected: usize, actual: usize },

    #[error("Degenerate input in {context}: shape {shape:?} has an empty axis")]
    EmptyInput { context: String, shape: Vec<usize> },

    #[error("Token id {id} out of range for vocabulary of size {vocab_size}")]
    TokenOutOfRange { id: u64, vocab_size: usize },

    #[error("Projections already initialized with embedding width {embedding_dim}")]
    AlreadyInitialized { embedding_dim: usize },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NrmsError {
    /// Create a shape mismatch error
    pub fn shape_mismatch(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a degenerate input error
    pub fn empty_input(context: impl Into<String>, shape: &[usize]) -> Self {
        Self::EmptyInput {
            context: context.into(),
            shape: shape.to_vec(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// True for errors caused by tensors of the wrong shape or size
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            NrmsError::ShapeMismatch { .. }
                | NrmsError::EmbeddingDimChanged { .. }
                | NrmsError::EmptyInput { .. }
        )
    }
}

#[cfg(feature = "python")]
impl From<NrmsError> for pyo3::PyErr {
    fn from(error: NrmsError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};

        match error {
            NrmsError::Io(e) => PyIOError::new_err(format!("I/O error: {}", e)),
            NrmsError::AlreadyInitialized { .. } => PyRuntimeError::new_err(error.to_string()),
            other => PyValueError::new_err(other.to_string()),
        }
    }
}
