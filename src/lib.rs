//! NRMS: neural news/item recommendation with multi-head self-attention
//!
//! Items (token sequences) are encoded by self-attention over their word embeddings
//! followed by additive-attention pooling; users are encoded by the same composition
//! over the vectors of their clicked items; candidates are scored by dot product with
//! the user vector.
//!
//! Built with the `python` feature, the crate is also the `nrms._nrms` extension
//! module.

// Only the Python extension picks the allocator; Rust dependents keep their own.
#[cfg(feature = "extension-module")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod additive_attention;
pub mod config;
pub mod dropout;
pub mod embedding;
pub mod encoder;
pub mod error;
pub mod linear;
pub mod model;
pub mod observer;
pub mod scorer;
pub mod self_attention;
pub mod tensor;

mod ops;
#[cfg(feature = "python")]
mod python;

pub use additive_attention::AdditiveAttention;
pub use config::NrmsConfig;
pub use dropout::{Dropout, Mode};
pub use embedding::Embedding;
pub use encoder::{HierarchicalEncoder, ItemEncoder};
pub use error::{NrmsError, NrmsResult};
pub use linear::Linear;
pub use model::NrmsModel;
pub use observer::{ShapeObserver, TracingObserver};
pub use scorer::{rank_candidates, score_candidates};
pub use self_attention::{MultiHeadSelfAttention, QkvProjections};
pub use tensor::{Tensor, TokenIds};

/// Install a `tracing` subscriber filtered by `RUST_LOG`; a no-op if one is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

#[cfg(feature = "python")]
#[pyo3::pymodule]
fn _nrms(m: &pyo3::Bound<'_, pyo3::types::PyModule>) -> pyo3::PyResult<()> {
    use pyo3::prelude::*;

    init_tracing();
    m.add_class::<python::PyNrms>()?;
    m.add_function(wrap_pyfunction!(python::rank_scores, m)?)?;
    Ok(())
}
