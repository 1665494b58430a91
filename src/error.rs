use std::{error::Error, fmt, io};

/// The crate's result type.
pub type Result<T> = std::result::Result<T, RefineErr>;

/// The stage of a refinement round in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Partition,
    Optimize,
    Synchronize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Partition => "partition sizing",
            Stage::Optimize => "local optimization",
            Stage::Synchronize => "synchronization",
        };

        f.write_str(name)
    }
}

/// Refinement round failures, all of them fatal for the round.
#[derive(Debug)]
pub enum RefineErr {
    InvalidConfig(String),
    Oracle {
        user: usize,
        cluster: usize,
        reason: String,
    },
    NonNumeric {
        user: usize,
        cluster: usize,
        value: f64,
    },
    AssignmentOutOfRange {
        user: usize,
        cluster: u32,
        num_clusters: usize,
    },
    LengthMismatch {
        stage: Stage,
        what: &'static str,
        got: usize,
        expected: usize,
    },
    Io(io::Error),
    Codec(serde_json::Error),
    Protocol(String),
    Disconnected {
        rank: usize,
    },
}

impl RefineErr {
    /// Returns the round stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            RefineErr::InvalidConfig(_) => Stage::Partition,
            RefineErr::Oracle { .. }
            | RefineErr::NonNumeric { .. }
            | RefineErr::AssignmentOutOfRange { .. } => Stage::Optimize,
            RefineErr::LengthMismatch { stage, .. } => *stage,
            RefineErr::Io(_)
            | RefineErr::Codec(_)
            | RefineErr::Protocol(_)
            | RefineErr::Disconnected { .. } => Stage::Synchronize,
        }
    }
}

impl fmt::Display for RefineErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: ", self.stage())?;

        match self {
            RefineErr::InvalidConfig(detail) => write!(f, "invalid configuration: {detail}"),
            RefineErr::Oracle {
                user,
                cluster,
                reason,
            } => write!(f, "training error for user {user} in cluster {cluster}: {reason}"),
            RefineErr::NonNumeric {
                user,
                cluster,
                value,
            } => write!(
                f,
                "training error for user {user} in cluster {cluster} is not a nonnegative number: {value}"
            ),
            RefineErr::AssignmentOutOfRange {
                user,
                cluster,
                num_clusters,
            } => write!(
                f,
                "user {user} is assigned to cluster {cluster}, only {num_clusters} clusters exist"
            ),
            RefineErr::LengthMismatch {
                what,
                got,
                expected,
                ..
            } => write!(f, "{what} length mismatch: got {got}, expected {expected}"),
            RefineErr::Io(e) => write!(f, "io error: {e}"),
            RefineErr::Codec(e) => write!(f, "malformed frame: {e}"),
            RefineErr::Protocol(detail) => write!(f, "protocol violation: {detail}"),
            RefineErr::Disconnected { rank } => write!(f, "worker {rank} disconnected"),
        }
    }
}

impl Error for RefineErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RefineErr::Io(e) => Some(e),
            RefineErr::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RefineErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for RefineErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<RefineErr> for io::Error {
    fn from(value: RefineErr) -> Self {
        match value {
            RefineErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_stage() {
        let err = RefineErr::NonNumeric {
            user: 3,
            cluster: 1,
            value: f64::NAN,
        };

        assert_eq!(err.stage(), Stage::Optimize);
        assert!(err.to_string().starts_with("local optimization failed"));

        let err = RefineErr::Disconnected { rank: 2 };
        assert_eq!(err.to_string(), "synchronization failed: worker 2 disconnected");
    }

    #[test]
    fn io_errors_round_trip_through_the_boundary() {
        let err = RefineErr::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);

        let err = RefineErr::Protocol("bad rank".into());
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
    }
}
