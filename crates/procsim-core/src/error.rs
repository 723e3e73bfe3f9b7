use crate::id::StationId;

/// Internal invariant failures surfaced by the kernel.
///
/// None of these are reachable from a well-formed compiled network; when one
/// occurs the replication performs an emergency shutdown with the error text
/// as reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("station {0:?} was re-entered while its runtime state is in use")]
    Reentrant(StationId),
    #[error("runtime state of station {0:?} does not match its kind")]
    StateMismatch(StationId),
    #[error("station {0:?} does not exist")]
    UnknownStation(StationId),
    #[error("station {0:?} cannot accept clients")]
    NotAClientStation(StationId),
    #[error("{0}")]
    Fatal(String),
}
