//! Kernel entry points into stations.
//!
//! Each function looks up the compiled station, takes its runtime state out
//! of the replication's arena for the duration of the call, and puts it back
//! afterwards. A station whose state is already taken is being re-entered;
//! that is reported as [`SimError::Reentrant`] except for pick-up requests,
//! which simply find nothing.

use crate::error::SimError;
use crate::id::{ClientKey, SignalId, StationId};
use crate::network::Network;
use crate::replication::Replication;
use crate::sim::SimTime;

use super::{
    FreeResourcesListener, Forward, PickUpQueue, SignalListener, StateChangeListener, StateSlot, Station,
    StationBehavior, StationKind, for_each_kind,
};

/// Run `f` with the runtime state of station `at`, creating it on first use.
pub(crate) fn with_state<'n, S, R>(
    rep: &mut Replication<'n>,
    at: StationId,
    station: &S,
    f: impl FnOnce(&S, &mut Replication<'n>, &mut S::State) -> Result<R, SimError>,
) -> Result<R, SimError>
where
    S: StationBehavior,
{
    let mut state = match rep.take_state(at)? {
        Some(slot) => S::State::from_slot(slot).ok_or(SimError::StateMismatch(at))?,
        None => station.init_state(rep, at),
    };
    let result = f(station, rep, &mut state);
    rep.put_state(at, state.into_slot());
    result
}

fn station<'n>(rep: &Replication<'n>, at: StationId) -> Result<&'n Station, SimError> {
    let net: &'n Network = rep.net;
    net.station(at).ok_or(SimError::UnknownStation(at))
}

pub(crate) fn arrival(rep: &mut Replication<'_>, at: StationId, client: ClientKey) -> Result<(), SimError> {
    let st = station(rep, at)?;
    for_each_kind!(&st.kind, s => with_state(rep, at, s, |s, rep, state| s.arrival(rep, state, at, client)))
}

pub(crate) fn leave(rep: &mut Replication<'_>, at: StationId, client: ClientKey) -> Result<Forward, SimError> {
    let st = station(rep, at)?;
    for_each_kind!(&st.kind, s => with_state(rep, at, s, |s, rep, state| s.leave(rep, state, at, client)))
}

/// Dispatch over the state-change listener kinds.
macro_rules! state_listener {
    ($kind:expr, $s:ident => $body:expr, else $default:expr) => {
        match $kind {
            StationKind::Hold($s) => $body,
            StationKind::BarrierPull($s) => $body,
            StationKind::PickUp($s) => $body,
            StationKind::Sensor($s) => $body,
            _ => $default,
        }
    };
}

/// Dispatch over the free-resources listener kinds.
macro_rules! free_listener {
    ($kind:expr, $s:ident => $body:expr, else $default:expr) => {
        match $kind {
            StationKind::Process($s) => $body,
            StationKind::Seize($s) => $body,
            StationKind::TransportSource($s) => $body,
            _ => $default,
        }
    };
}

pub(crate) fn interested(rep: &mut Replication<'_>, at: StationId) -> Result<bool, SimError> {
    let st = station(rep, at)?;
    state_listener!(&st.kind, s => with_state(rep, at, s, |s, _, state| Ok(s.interested(state))), else Ok(false))
}

pub(crate) fn recheck(rep: &mut Replication<'_>, at: StationId) -> Result<bool, SimError> {
    let st = station(rep, at)?;
    state_listener!(&st.kind, s => with_state(rep, at, s, |s, rep, state| s.recheck(rep, state, at)), else Ok(false))
}

pub(crate) fn wants_timed_checks(rep: &mut Replication<'_>, at: StationId) -> Result<bool, SimError> {
    let st = station(rep, at)?;
    state_listener!(&st.kind, s => with_state(rep, at, s, |s, _, state| Ok(s.wants_timed_checks(state))), else Ok(false))
}

pub(crate) fn waiting_priority(rep: &mut Replication<'_>, at: StationId) -> Result<Option<(f64, SimTime)>, SimError> {
    let st = station(rep, at)?;
    free_listener!(&st.kind, s => with_state(rep, at, s, |s, rep, state| Ok(s.waiting_priority(rep, state, at))), else Ok(None))
}

pub(crate) fn resources_released(rep: &mut Replication<'_>, at: StationId) -> Result<bool, SimError> {
    let st = station(rep, at)?;
    free_listener!(&st.kind, s => with_state(rep, at, s, |s, rep, state| s.resources_released(rep, state, at)), else Ok(false))
}

pub(crate) fn signal(rep: &mut Replication<'_>, at: StationId, signal: SignalId) -> Result<(), SimError> {
    match &station(rep, at)?.kind {
        StationKind::SignalBarrier(s) => with_state(rep, at, s, |s, rep, state| s.signal(rep, state, at, signal)),
        _ => Ok(()),
    }
}

/// Take up to `max` waiting clients out of the queue of station `at`.
pub(crate) fn pick_up(rep: &mut Replication<'_>, at: StationId, max: usize) -> Result<Vec<ClientKey>, SimError> {
    if rep.state_in_use(at) {
        return Ok(Vec::new());
    }
    match &station(rep, at)?.kind {
        StationKind::Process(s) => take_waiting(rep, at, s, max),
        StationKind::Hold(s) => take_waiting(rep, at, s, max),
        _ => Ok(Vec::new()),
    }
}

fn take_waiting<S: PickUpQueue>(rep: &mut Replication<'_>, at: StationId, station: &S, max: usize) -> Result<Vec<ClientKey>, SimError> {
    with_state(rep, at, station, |s, rep, state| {
        if s.queue_locked_for_pick_up(state) {
            Ok(Vec::new())
        } else {
            Ok(s.pick_up(rep, state, at, max))
        }
    })
}

// ---------------------------------------------------------------------------
// Station-specific events
// ---------------------------------------------------------------------------

/// Absolute time of a source's first arrival.
pub(crate) fn first_arrival(rep: &mut Replication<'_>, at: StationId) -> Result<Option<SimTime>, SimError> {
    match &station(rep, at)?.kind {
        StationKind::Source(s) => with_state(rep, at, s, |s, rep, state| Ok(s.first_arrival(rep, state, at))),
        _ => Ok(None),
    }
}

pub(crate) fn generate(rep: &mut Replication<'_>, at: StationId) -> Result<(), SimError> {
    match &station(rep, at)?.kind {
        StationKind::Source(s) => with_state(rep, at, s, |s, rep, state| s.generate(rep, state, at)),
        _ => Err(SimError::Fatal(format!("arrival event for non-source station {at:?}"))),
    }
}

pub(crate) fn cancel_waiting(rep: &mut Replication<'_>, at: StationId, client: ClientKey) -> Result<(), SimError> {
    match &station(rep, at)?.kind {
        StationKind::Process(s) => with_state(rep, at, s, |s, rep, state| {
            s.cancel_waiting(rep, state, at, client);
            Ok(())
        }),
        _ => Ok(()),
    }
}

/// The short wait for a fuller batch ended.
pub(crate) fn batch_wait(rep: &mut Replication<'_>, at: StationId) -> Result<(), SimError> {
    match &station(rep, at)?.kind {
        StationKind::Process(s) => with_state(rep, at, s, |s, rep, state| s.start_all(rep, state, at)),
        StationKind::Batch(s) => with_state(rep, at, s, |s, rep, state| {
            s.form_all(rep, state, at);
            Ok(())
        }),
        _ => Ok(()),
    }
}
