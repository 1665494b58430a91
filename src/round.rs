use log::{debug, info};
use rayon::prelude::*;
use tokio::task;

use crate::{
    collective::Collective,
    config::ControlConfig,
    error::{RefineErr, Result, Stage},
    matrix::CsrMatrix,
    optimizer::{self, Choice},
    oracle::ErrorOracle,
    sync::{self, PartialResult},
};

/// The result of a refinement round, identical on every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub participation: Vec<u32>,
    pub indifference: Vec<bool>,
}

/// Aggregate counts describing how a round changed the assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundSummary {
    /// Users whose cluster changed.
    pub moved: usize,
    /// Users that stayed only because of an exact tie.
    pub indifferent: usize,
}

impl RoundOutcome {
    /// Compares this outcome against the assignment the round started from.
    pub fn summary(&self, previous: &[u32]) -> RoundSummary {
        let moved = self
            .participation
            .iter()
            .zip(previous)
            .filter(|(new, old)| new != old)
            .count();

        RoundSummary {
            moved,
            indifferent: self.indifference.iter().filter(|&&flag| flag).count(),
        }
    }
}

fn check_group<C: Collective>(config: &ControlConfig, comm: &C) -> Result<()> {
    let expected = (config.num_workers(), config.worker_id(), config.coordinator());
    let actual = (comm.size(), comm.rank(), comm.coordinator());

    if expected != actual {
        return Err(RefineErr::InvalidConfig(format!(
            "configured as worker {} of {} coordinated by {}, but the group says worker {} of {} coordinated by {}",
            expected.1, expected.0, expected.2, actual.1, actual.0, actual.2
        )));
    }

    Ok(())
}

/// Runs one refinement round on this worker.
///
/// Every worker of the group must call it with the same data. The model is
/// widened to `num_clusters * cluster_block_width` columns and indexed before
/// any user is scored, then this worker re-assigns the users it owns and the
/// results of every worker are merged and shared.
///
/// # Arguments
/// * `config` - This worker's control configuration.
/// * `comm` - The group's collective handle.
/// * `oracle` - The training error oracle.
/// * `train` - The training matrix, one row per user.
/// * `model` - The model matrix, its declared columns may be widened.
/// * `participation` - The current cluster of every user.
///
/// # Returns
/// Fresh participation and indifference vectors for every user, or the
/// first failure of any stage. The input assignment is left untouched.
///
/// # Panics
/// If called from a current-thread tokio runtime, the local pass blocks in place.
pub async fn refine_round<C, O>(
    config: &ControlConfig,
    comm: &mut C,
    oracle: &O,
    train: &CsrMatrix,
    model: &mut CsrMatrix,
    participation: &[u32],
) -> Result<RoundOutcome>
where
    C: Collective,
    O: ErrorOracle + ?Sized,
{
    check_group(config, comm)?;

    let total = train.nrows();
    if participation.len() != total {
        return Err(RefineErr::LengthMismatch {
            stage: Stage::Partition,
            what: "participation",
            got: participation.len(),
            expected: total,
        });
    }

    model.ensure_columns(config.model_columns());
    let model = &*model;

    let range = config.shard().range(total);
    debug!(worker_id = config.worker_id(), start = range.start, end = range.end; "optimizing owned users");

    let choices = task::block_in_place(|| {
        range
            .clone()
            .into_par_iter()
            .map(|user| {
                optimizer::optimize(
                    config,
                    oracle,
                    model,
                    train.row(user),
                    user,
                    participation[user],
                )
            })
            .collect::<Result<Vec<Choice>>>()
    })?;

    let (assigned, flags): (Vec<u32>, Vec<bool>) = choices
        .into_iter()
        .map(|choice| (choice.cluster, choice.indifferent))
        .unzip();

    let partial = PartialResult {
        range,
        participation: assigned,
        indifference: flags,
    };

    let global = sync::synchronize(comm, total, partial).await?;
    let outcome = RoundOutcome {
        participation: global.participation,
        indifference: global.indifference,
    };

    let summary = outcome.summary(participation);
    info!(
        worker_id = config.worker_id(),
        users = total,
        moved = summary.moved,
        indifferent = summary.indifferent;
        "refinement round finished"
    );

    Ok(outcome)
}
