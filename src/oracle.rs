use crate::{
    config::ControlConfig,
    error::{RefineErr, Result},
    matrix::{ClusterSlice, SparseRow},
};

/// Computes the training error of a user under one cluster's model.
///
/// Implementations must be deterministic and free of side effects for the
/// duration of a round, they are queried concurrently for different users.
pub trait ErrorOracle: Sync {
    /// Should return the nonnegative training error of `user` when scored with `slice`.
    ///
    /// # Arguments
    /// * `config` - The round's control configuration.
    /// * `slice` - The model block of the cluster being scored.
    /// * `row` - The user's training row.
    /// * `user` - The user's global index.
    ///
    /// # Returns
    /// The training error, lower is better, or an error that aborts the round.
    fn training_error(
        &self,
        config: &ControlConfig,
        slice: ClusterSlice<'_>,
        row: SparseRow<'_>,
        user: usize,
    ) -> Result<f64>;
}

/// Squared reconstruction error of a user's row against a cluster's
/// item-item coefficient block.
///
/// For every item `i` of the block the prediction is `sum_j a_uj * W[j, i]`,
/// and the error is `sum_i (a_ui - prediction_i)^2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlimError {
    exclude_diagonal: bool,
}

impl SlimError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignores `W[i, i]` so an item never predicts itself.
    pub fn excluding_diagonal(mut self) -> Self {
        self.exclude_diagonal = true;
        self
    }
}

impl ErrorOracle for SlimError {
    fn training_error(
        &self,
        _config: &ControlConfig,
        slice: ClusterSlice<'_>,
        row: SparseRow<'_>,
        _user: usize,
    ) -> Result<f64> {
        let mut error = 0.;

        for item in 0..slice.width() {
            let column = slice.column(item);
            let actual = f64::from(row.get(item));
            let mut predicted = row.dot(&column);

            if self.exclude_diagonal {
                predicted -= actual * f64::from(column.get(item));
            }

            let diff = actual - predicted;
            error += diff * diff;
        }

        Ok(error)
    }
}

/// An oracle backed by a precomputed `users x clusters` error table.
#[derive(Debug, Clone)]
pub struct ErrorTable {
    errors: Vec<Vec<f64>>,
}

impl ErrorTable {
    pub fn new(errors: Vec<Vec<f64>>) -> Self {
        Self { errors }
    }
}

impl ErrorOracle for ErrorTable {
    fn training_error(
        &self,
        _config: &ControlConfig,
        slice: ClusterSlice<'_>,
        _row: SparseRow<'_>,
        user: usize,
    ) -> Result<f64> {
        let cluster = slice.cluster();

        self.errors
            .get(user)
            .and_then(|errors| errors.get(cluster))
            .copied()
            .ok_or_else(|| RefineErr::Oracle {
                user,
                cluster,
                reason: "no precomputed error".into(),
            })
    }
}
