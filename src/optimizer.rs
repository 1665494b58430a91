use crate::{
    config::ControlConfig,
    error::{RefineErr, Result},
    matrix::{CsrMatrix, SparseRow},
    oracle::ErrorOracle,
};

/// The outcome of re-assigning a single user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    pub cluster: u32,
    /// The user kept its cluster only because another one scored exactly the same.
    pub indifferent: bool,
}

/// Picks the new assignment for a user given its error under every cluster.
///
/// The incumbent is only replaced on a strictly smaller error, so ties never
/// move a user and the lowest id wins among equally good improvements.
///
/// # Panics
/// If `current` isn't a valid index of `errors`.
pub fn pick(errors: &[f64], current: usize) -> Choice {
    let mut best = current;
    let mut best_error = errors[current];

    for (cluster, &error) in errors.iter().enumerate() {
        if error < best_error {
            best = cluster;
            best_error = error;
        }
    }

    let indifferent = best == current
        && errors
            .iter()
            .enumerate()
            .any(|(cluster, &error)| cluster != current && error == best_error);

    Choice {
        cluster: best as u32,
        indifferent,
    }
}

/// Re-assigns `user` to the cluster minimizing its training error.
///
/// Queries `oracle` exactly once per cluster, in increasing cluster order.
///
/// # Arguments
/// * `config` - The round's control configuration.
/// * `oracle` - The training error oracle.
/// * `model` - The model matrix, its column index must cover every cluster block.
/// * `row` - The user's training row.
/// * `user` - The user's global index.
/// * `current` - The user's current cluster.
///
/// # Returns
/// The new `Choice`, or the first oracle failure or non numeric error.
pub fn optimize<O>(
    config: &ControlConfig,
    oracle: &O,
    model: &CsrMatrix,
    row: SparseRow<'_>,
    user: usize,
    current: u32,
) -> Result<Choice>
where
    O: ErrorOracle + ?Sized,
{
    let num_clusters = config.num_clusters();
    if current as usize >= num_clusters {
        return Err(RefineErr::AssignmentOutOfRange {
            user,
            cluster: current,
            num_clusters,
        });
    }

    let width = config.cluster_block_width();
    let mut errors = Vec::with_capacity(num_clusters);

    for cluster in 0..num_clusters {
        let slice = model.cluster_slice(cluster, width)?;
        let error = oracle.training_error(config, slice, row, user)?;

        if !error.is_finite() || error < 0. {
            return Err(RefineErr::NonNumeric {
                user,
                cluster,
                value: error,
            });
        }

        errors.push(error);
    }

    Ok(pick(&errors, current as usize))
}
