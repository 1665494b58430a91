//! One refinement round of a distributed, cluster based collaborative filtering model.
//!
//! Users are split in contiguous blocks among a group of workers. Every worker
//! moves the users it owns to the cluster with the smallest training error,
//! then the coordinator merges the blocks and hands the complete assignment
//! back to every worker.

pub mod collective;
pub mod config;
pub mod error;
pub mod matrix;
pub mod optimizer;
pub mod oracle;
pub mod partition;
pub mod round;
pub mod sync;

pub use collective::{Collective, LocalCollective, LocalGroup, TcpCollective};
pub use config::ControlConfig;
pub use error::{RefineErr, Result, Stage};
pub use matrix::CsrMatrix;
pub use oracle::{ErrorOracle, ErrorTable, SlimError};
pub use round::{RoundOutcome, RoundSummary, refine_round};
