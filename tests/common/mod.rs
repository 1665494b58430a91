#![allow(dead_code)]

use std::{num::NonZeroUsize, sync::Arc};

use cluster_refine::{
    Collective, ControlConfig, CsrMatrix, ErrorOracle, LocalGroup, Result, RoundOutcome,
    refine_round,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

pub fn config(workers: usize, clusters: usize, width: usize) -> ControlConfig {
    ControlConfig::new(nz(workers), 0, nz(clusters), nz(width)).unwrap()
}

/// Small deterministic generator so fixtures don't need a rng crate.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

/// Binary user-item rows over `items` items.
pub fn training(users: usize, items: usize, seed: u64) -> CsrMatrix {
    let mut lcg = Lcg::new(seed);
    let rows = (0..users).map(|_| {
        (0..items as u32)
            .filter(|_| lcg.below(3) == 0)
            .map(|item| (item, 1.0))
            .collect::<Vec<_>>()
    });

    CsrMatrix::from_rows(rows.collect::<Vec<_>>())
}

/// Item-item coefficients for every cluster block, leaving the last cluster empty.
pub fn model(items: usize, clusters: usize, seed: u64) -> CsrMatrix {
    let mut lcg = Lcg::new(seed);
    let rows = (0..items).map(|_| {
        let mut row = Vec::new();
        for cluster in 0..clusters.saturating_sub(1) {
            for item in 0..items {
                if lcg.below(4) == 0 {
                    let weight = (1 + lcg.below(4)) as f32 * 0.25;
                    row.push(((cluster * items + item) as u32, weight));
                }
            }
        }
        row
    });

    CsrMatrix::from_rows(rows.collect::<Vec<_>>())
}

/// Runs one round on an in-process group and returns every worker's outcome.
pub async fn run_local<O>(
    base: ControlConfig,
    coordinator: usize,
    oracle: Arc<O>,
    train: Arc<CsrMatrix>,
    model: &CsrMatrix,
    participation: Arc<Vec<u32>>,
) -> Vec<RoundOutcome>
where
    O: ErrorOracle + Send + 'static,
{
    try_run_local(base, coordinator, oracle, train, model, participation)
        .await
        .into_iter()
        .map(|outcome| outcome.unwrap())
        .collect()
}

/// Runs one round on an in-process group and returns every worker's result, ordered by rank.
pub async fn try_run_local<O>(
    base: ControlConfig,
    coordinator: usize,
    oracle: Arc<O>,
    train: Arc<CsrMatrix>,
    model: &CsrMatrix,
    participation: Arc<Vec<u32>>,
) -> Vec<Result<RoundOutcome>>
where
    O: ErrorOracle + Send + 'static,
{
    let workers = base.num_workers();
    let group = LocalGroup::new(workers, coordinator).unwrap();

    let tasks: Vec<_> = group
        .into_iter()
        .map(|mut comm| {
            let config = base
                .for_worker(comm.rank())
                .and_then(|c| c.with_coordinator(coordinator))
                .unwrap();
            let oracle = Arc::clone(&oracle);
            let train = Arc::clone(&train);
            let participation = Arc::clone(&participation);
            let mut model = model.clone();

            tokio::spawn(async move {
                refine_round(
                    &config,
                    &mut comm,
                    oracle.as_ref(),
                    &train,
                    &mut model,
                    &participation,
                )
                .await
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }

    outcomes
}
