// Times user encoding and candidate scoring on synthetic batches.
//
//   cargo run --release --bin profile_nrms
//   RUST_LOG=nrms=debug cargo run --release --bin profile_nrms   (shape diagnostics)

use nrms::{Embedding, Mode, NrmsConfig, NrmsModel, NrmsResult, TokenIds};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

const VOCAB: usize = 20_000;
const EMB_DIM: usize = 300;
const TITLE_LEN: usize = 30;
const HISTORY_LEN: usize = 50;
const CANDIDATES: usize = 5;

fn random_ids(rng: &mut StdRng, shape: &[usize]) -> NrmsResult<TokenIds> {
    let n: usize = shape.iter().product();
    TokenIds::from_vec((0..n).map(|_| rng.random_range(0..VOCAB as u32)).collect(), shape)
}

fn main() -> NrmsResult<()> {
    nrms::init_tracing();
    let mut rng = StdRng::seed_from_u64(42);

    let table: Vec<f32> = (0..VOCAB * EMB_DIM).map(|_| rng.random_range(-0.1..0.1)).collect();
    let embedding = Embedding::from_pretrained(table, VOCAB, EMB_DIM)?;
    let verbose = std::env::var("RUST_LOG").is_ok();
    let model = NrmsModel::new(NrmsConfig { verbose, ..NrmsConfig::default() }, embedding)?;

    let t0 = Instant::now();
    model.warm_up()?;
    println!("  warm-up: {:.3}s", t0.elapsed().as_secs_f64());

    println!("  BATCH | ENCODE USER |   SCORE   | USERS/s");
    println!("  ----------------------------------------");
    for batch in [1usize, 8, 32, 64] {
        let history = random_ids(&mut rng, &[batch, HISTORY_LEN, TITLE_LEN])?;
        let candidates = random_ids(&mut rng, &[batch, CANDIDATES, TITLE_LEN])?;

        let t_user = Instant::now();
        model.encode_user(&history, &mut Mode::Eval)?;
        let user_time = t_user.elapsed().as_secs_f64();

        let t_score = Instant::now();
        let scores = model.score(&history, &candidates, &mut Mode::Eval)?;
        let score_time = t_score.elapsed().as_secs_f64();
        assert_eq!(scores.shape(), &[batch, CANDIDATES]);

        println!(
            "  {:>5} | {:>10.4}s | {:>8.4}s | {:>7.1}",
            batch,
            user_time,
            score_time,
            batch as f64 / score_time
        );
    }
    println!("  ----------------------------------------");

    let mut train_rng = StdRng::seed_from_u64(7);
    let history = random_ids(&mut rng, &[8, HISTORY_LEN, TITLE_LEN])?;
    let candidates = random_ids(&mut rng, &[8, CANDIDATES, TITLE_LEN])?;
    let t_train = Instant::now();
    model.score(&history, &candidates, &mut Mode::Train(&mut train_rng))?;
    println!("  training-mode forward (batch 8): {:.4}s", t_train.elapsed().as_secs_f64());

    Ok(())
}
