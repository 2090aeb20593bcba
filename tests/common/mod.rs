//! Shared fixtures for integration tests

#![allow(dead_code)]

use nrms::{Embedding, NrmsConfig, NrmsModel, ShapeObserver, TokenIds};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Once;

static INIT: Once = Once::new();

/// Route `tracing` output through the test harness once per binary.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("nrms=debug")
            .with_test_writer()
            .try_init();
    });
}

pub const VOCAB: usize = 64;
pub const EMB_DIM: usize = 8;

pub fn small_config() -> NrmsConfig {
    NrmsConfig {
        head_num: 2,
        head_dim: 4,
        attention_hidden_dim: 16,
        dropout: 0.2,
        verbose: false,
        seed: 2024,
    }
}

pub fn random_embedding(seed: u64) -> Embedding {
    let mut rng = StdRng::seed_from_u64(seed);
    let table = (0..VOCAB * EMB_DIM).map(|_| rng.random_range(-0.5..0.5)).collect();
    Embedding::from_pretrained(table, VOCAB, EMB_DIM).unwrap()
}

pub fn model_with(config: NrmsConfig) -> NrmsModel {
    NrmsModel::new(config, random_embedding(17)).unwrap()
}

pub fn random_ids(shape: &[usize], seed: u64) -> TokenIds {
    let mut rng = StdRng::seed_from_u64(seed);
    let n: usize = shape.iter().product();
    TokenIds::from_vec((0..n).map(|_| rng.random_range(0..VOCAB as u32)).collect(), shape).unwrap()
}

/// Assert that two float slices are equal within `tolerance`
pub fn assert_vec_approx_eq(a: &[f32], b: &[f32], tolerance: f32) {
    assert_eq!(a.len(), b.len(), "length mismatch");
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!((x - y).abs() <= tolerance, "index {i}: {x} vs {y}");
    }
}

/// Collects every shape report
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<(&'static str, &'static str, Vec<usize>)>>,
}

impl ShapeObserver for RecordingObserver {
    fn observe(&self, module: &'static str, label: &'static str, shape: &[usize]) {
        self.events.lock().push((module, label, shape.to_vec()));
    }
}
