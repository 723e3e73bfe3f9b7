//! Station capabilities.
//!
//! Every station kind implements [`StationBehavior`]. Kinds that can release
//! clients outside the arrival/leave path additionally implement one or more
//! of the listener traits; the kernel only ever calls them through
//! [`dispatch`](super::dispatch), which owns the take/put of runtime state.

use crate::error::SimError;
use crate::id::{ClientKey, SignalId, StationId};
use crate::replication::Replication;
use crate::sim::SimTime;

use super::{Forward, StateSlot};

/// Arrival / leave protocol shared by every station kind.
pub trait StationBehavior {
    /// Per-replication runtime state, created on first access.
    type State: StateSlot;

    fn init_state(&self, rep: &mut Replication<'_>, at: StationId) -> Self::State;

    /// A client reached the station.
    fn arrival(
        &self,
        rep: &mut Replication<'_>,
        state: &mut Self::State,
        at: StationId,
        client: ClientKey,
    ) -> Result<(), SimError>;

    /// A scheduled departure fired. Returns where the client goes next.
    fn leave(
        &self,
        rep: &mut Replication<'_>,
        state: &mut Self::State,
        at: StationId,
        client: ClientKey,
    ) -> Result<Forward, SimError>;
}

/// Stations gated by a condition over global state.
pub trait StateChangeListener: StationBehavior {
    /// Whether a re-check could change anything right now.
    fn interested(&self, state: &Self::State) -> bool;

    /// Re-evaluate the gate. Returns whether the station changed state.
    fn recheck(
        &self,
        rep: &mut Replication<'_>,
        state: &mut Self::State,
        at: StationId,
    ) -> Result<bool, SimError>;

    /// Whether the station needs periodic re-checks while it waits.
    fn wants_timed_checks(&self, _state: &Self::State) -> bool {
        false
    }
}

/// Stations waiting for resource or vehicle units.
pub trait FreeResourcesListener: StationBehavior {
    /// Priority of the best waiting client and the time it started waiting,
    /// or `None` if nothing waits.
    fn waiting_priority(
        &self,
        rep: &mut Replication<'_>,
        state: &mut Self::State,
        at: StationId,
    ) -> Option<(f64, SimTime)>;

    /// Units became available. Returns whether any were taken.
    fn resources_released(
        &self,
        rep: &mut Replication<'_>,
        state: &mut Self::State,
        at: StationId,
    ) -> Result<bool, SimError>;
}

/// Stations whose waiting clients may be taken by other stations.
pub trait PickUpQueue: StationBehavior {
    /// Whether the queue is reserved for an internal dequeue in progress.
    fn queue_locked_for_pick_up(&self, state: &Self::State) -> bool;

    /// Remove up to `max` waiting clients and hand them out.
    fn pick_up(
        &self,
        rep: &mut Replication<'_>,
        state: &mut Self::State,
        at: StationId,
        max: usize,
    ) -> Vec<ClientKey>;
}

/// Stations reacting to named signals.
pub trait SignalListener: StationBehavior {
    fn signal(
        &self,
        rep: &mut Replication<'_>,
        state: &mut Self::State,
        at: StationId,
        signal: SignalId,
    ) -> Result<(), SimError>;
}
