use std::num::NonZeroUsize;

use serde::Deserialize;

use crate::{
    error::{RefineErr, Result},
    partition::ShardSpec,
};

/// Immutable control parameters of a refinement round.
///
/// Every component receives this value explicitly, nothing reads the
/// worker identity from ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ControlConfig {
    num_workers: NonZeroUsize,
    worker_id: usize,
    num_clusters: NonZeroUsize,
    cluster_block_width: NonZeroUsize,
    #[serde(default)]
    coordinator: usize,
}

impl ControlConfig {
    /// Creates a new control configuration with worker 0 as coordinator.
    ///
    /// # Args
    /// * `num_workers` - Amount of cooperating workers.
    /// * `worker_id` - This worker's id, zero indexed.
    /// * `num_clusters` - Amount of user clusters in the model.
    /// * `cluster_block_width` - Model column width of every cluster block.
    ///
    /// # Returns
    /// A `ControlConfig` instance, or `InvalidConfig` if `worker_id` is out of range.
    pub fn new(
        num_workers: NonZeroUsize,
        worker_id: usize,
        num_clusters: NonZeroUsize,
        cluster_block_width: NonZeroUsize,
    ) -> Result<Self> {
        let config = Self {
            num_workers,
            worker_id,
            num_clusters,
            cluster_block_width,
            coordinator: 0,
        };

        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a configuration from its JSON representation.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| RefineErr::InvalidConfig(format!("unreadable configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Designates a different worker as the coordinator.
    pub fn with_coordinator(mut self, coordinator: usize) -> Result<Self> {
        self.coordinator = coordinator;
        self.validate()?;
        Ok(self)
    }

    /// The same configuration seen from another worker of the group.
    pub fn for_worker(mut self, worker_id: usize) -> Result<Self> {
        self.worker_id = worker_id;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        let workers = self.num_workers.get();

        if self.worker_id >= workers {
            return Err(RefineErr::InvalidConfig(format!(
                "worker id {} out of range for {workers} workers",
                self.worker_id
            )));
        }

        if self.coordinator >= workers {
            return Err(RefineErr::InvalidConfig(format!(
                "coordinator {} out of range for {workers} workers",
                self.coordinator
            )));
        }

        Ok(())
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers.get()
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters.get()
    }

    pub fn cluster_block_width(&self) -> usize {
        self.cluster_block_width.get()
    }

    pub fn coordinator(&self) -> usize {
        self.coordinator
    }

    pub fn is_coordinator(&self) -> bool {
        self.worker_id == self.coordinator
    }

    /// The block of users this worker owns.
    pub fn shard(&self) -> ShardSpec {
        ShardSpec::new(self.worker_id, self.num_workers)
    }

    /// Minimum column count the model matrix must declare.
    pub fn model_columns(&self) -> usize {
        self.num_clusters.get() * self.cluster_block_width.get()
    }
}
