//! Barriers: signal-gated and pull-controlled admission.

use std::collections::{BTreeMap, VecDeque};

use crate::compile::BuildContext;
use crate::error::SimError;
use crate::id::{ClientKey, SignalId, StationId};
use crate::model::{BarrierPullDescription, SignalBarrierDescription};
use crate::queue::WaitingQueue;
use crate::replication::Replication;

use super::{Forward, Links, SignalListener, StateChangeListener, Station, StationBehavior};

/// Hops searched from a pull barrier's successor for its checkpoint.
pub const MAX_SEGMENT_HOPS: usize = 10;

// ---------------------------------------------------------------------------
// Signal barrier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SignalBarrierStation {
    pub signal: SignalId,
    /// Clients released per signal; everyone waiting if `None`.
    pub release_count: Option<u32>,
    pub initial_passes: u32,
    pub next: StationId,
}

#[derive(Debug, Default)]
pub struct SignalBarrierState {
    pub(crate) queue: WaitingQueue,
    passes_left: u32,
}

impl SignalBarrierStation {
    pub(crate) fn build(desc: &SignalBarrierDescription, cx: &mut BuildContext<'_>) -> Self {
        Self {
            signal: cx.signal(&desc.signal),
            release_count: desc.release_count,
            initial_passes: desc.initial_passes,
            next: cx.next(desc.next),
        }
    }
}

impl Links for SignalBarrierStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.next]
    }
}

impl StationBehavior for SignalBarrierStation {
    type State = SignalBarrierState;

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) -> SignalBarrierState {
        SignalBarrierState {
            queue: WaitingQueue::new(),
            passes_left: self.initial_passes,
        }
    }

    fn arrival(&self, rep: &mut Replication<'_>, state: &mut SignalBarrierState, at: StationId, client: ClientKey) -> Result<(), SimError> {
        if state.passes_left > 0 {
            state.passes_left -= 1;
            rep.release_to(at, client, self.next);
        } else {
            rep.enqueue(at, &mut state.queue, client);
        }
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut SignalBarrierState, _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}

impl SignalListener for SignalBarrierStation {
    fn signal(&self, rep: &mut Replication<'_>, state: &mut SignalBarrierState, at: StationId, signal: SignalId) -> Result<(), SimError> {
        if signal != self.signal {
            return Ok(());
        }
        let waiting = state.queue.len();
        let count = self.release_count.map_or(waiting, |c| (c as usize).min(waiting));
        for _ in 0..count {
            if let Some(client) = rep.dequeue_at(at, &mut state.queue, 0) {
                rep.release_to(at, client, self.next);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pull barrier
// ---------------------------------------------------------------------------

/// Admits clients while the downstream segment holds fewer than
/// `max_clients`. Clients already on their way into the segment count.
#[derive(Debug, Clone)]
pub struct BarrierPullStation {
    pub max_clients: u32,
    pub checkpoint: Option<StationId>,
    pub next: StationId,
    /// Stations of the controlled segment, resolved after compilation.
    pub monitored: Vec<StationId>,
}

#[derive(Debug, Default)]
pub struct BarrierPullState {
    pub(crate) queue: WaitingQueue,
}

impl BarrierPullStation {
    pub(crate) fn build(desc: &BarrierPullDescription, cx: &mut BuildContext<'_>) -> Self {
        Self {
            max_clients: desc.max_clients,
            checkpoint: desc.checkpoint.as_deref().map(|name| cx.station(name)),
            next: cx.next(desc.next),
            monitored: Vec::new(),
        }
    }
}

/// Every station on some path from `start` to `checkpoint`, both included,
/// whose length is at most [`MAX_SEGMENT_HOPS`] hops. Paths do not run
/// through the checkpoint. `None` if the checkpoint is not reachable within
/// the limit.
pub(crate) fn segment(stations: &[Station], start: StationId, checkpoint: StationId) -> Option<Vec<StationId>> {
    let forward = hop_distances(start, checkpoint, |id| {
        stations.get(id.index()).map(|s| s.kind.successors()).unwrap_or_default()
    });
    forward.get(&checkpoint)?;

    let mut predecessors: BTreeMap<StationId, Vec<StationId>> = BTreeMap::new();
    for s in stations {
        for succ in s.kind.successors() {
            predecessors.entry(succ).or_default().push(s.id);
        }
    }
    let backward = hop_distances(checkpoint, start, |id| predecessors.get(&id).cloned().unwrap_or_default());

    let members = forward
        .iter()
        .filter(|(id, to)| backward.get(*id).is_some_and(|from| *to + from <= MAX_SEGMENT_HOPS))
        .map(|(id, _)| *id)
        .collect();
    Some(members)
}

/// Breadth-first hop counts from `from`, not expanding `stop` and not
/// going beyond [`MAX_SEGMENT_HOPS`].
fn hop_distances(
    from: StationId,
    stop: StationId,
    next: impl Fn(StationId) -> Vec<StationId>,
) -> BTreeMap<StationId, usize> {
    let mut dist = BTreeMap::from([(from, 0)]);
    let mut frontier = VecDeque::from([(from, 0)]);
    while let Some((id, d)) = frontier.pop_front() {
        if (id == stop && id != from) || d >= MAX_SEGMENT_HOPS {
            continue;
        }
        for succ in next(id) {
            if !dist.contains_key(&succ) {
                dist.insert(succ, d + 1);
                frontier.push_back((succ, d + 1));
            }
        }
    }
    dist
}

impl Links for BarrierPullStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        let mut out = vec![&mut self.next];
        out.extend(self.checkpoint.as_mut());
        out
    }
}

impl StationBehavior for BarrierPullStation {
    type State = BarrierPullState;

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) -> BarrierPullState {
        BarrierPullState::default()
    }

    fn arrival(&self, rep: &mut Replication<'_>, state: &mut BarrierPullState, at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.enqueue(at, &mut state.queue, client);
        rep.notify_state_change();
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut BarrierPullState, _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}

impl StateChangeListener for BarrierPullStation {
    fn interested(&self, state: &BarrierPullState) -> bool {
        !state.queue.is_empty()
    }

    fn recheck(&self, rep: &mut Replication<'_>, state: &mut BarrierPullState, at: StationId) -> Result<bool, SimError> {
        if state.queue.is_empty() || rep.occupancy(&self.monitored) >= self.max_clients {
            return Ok(false);
        }
        match rep.dequeue_at(at, &mut state.queue, 0) {
            Some(client) => {
                rep.release_to(at, client, self.next);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::{DelayStation, DisposeStation, StationKind, TeleportStation};

    fn station(id: u32, kind: StationKind) -> Station {
        Station {
            id: StationId(id),
            model_id: id as i64,
            name: format!("s{id}"),
            parent: None,
            kind,
        }
    }

    fn delay(next: u32) -> StationKind {
        StationKind::Delay(DelayStation {
            time: crate::param::TypedTime::constant(1.0),
            bucket: crate::client::TimeBucket::Process,
            next: StationId(next),
        })
    }

    #[test]
    fn segment_includes_longer_parallel_branches() {
        // 0 -> 1 -> 3, 0 -> 2 -> 3, 0 -> 4 -> 5 -> 3 (longer), 3 -> 6
        let stations = vec![
            station(
                0,
                StationKind::Duplicate(crate::station::DuplicateStation {
                    destinations: vec![StationId(1), StationId(2), StationId(4)],
                    copies: 1,
                }),
            ),
            station(1, delay(3)),
            station(2, delay(3)),
            station(3, delay(6)),
            station(4, delay(5)),
            station(5, delay(3)),
            station(6, StationKind::Dispose(DisposeStation::default())),
        ];
        let seg = segment(&stations, StationId(0), StationId(3)).unwrap();
        assert_eq!(
            seg,
            vec![StationId(0), StationId(1), StationId(2), StationId(3), StationId(4), StationId(5)]
        );
    }

    #[test]
    fn segment_skips_branches_that_leave() {
        // 0 -> 1 -> 2 (checkpoint), 0 -> 3 -> 4 (exit)
        let stations = vec![
            station(
                0,
                StationKind::Duplicate(crate::station::DuplicateStation {
                    destinations: vec![StationId(1), StationId(3)],
                    copies: 1,
                }),
            ),
            station(1, delay(2)),
            station(2, StationKind::Dispose(DisposeStation::default())),
            station(3, delay(4)),
            station(4, StationKind::Dispose(DisposeStation::default())),
        ];
        let seg = segment(&stations, StationId(0), StationId(2)).unwrap();
        assert_eq!(seg, vec![StationId(0), StationId(1), StationId(2)]);
    }

    #[test]
    fn segment_drops_branches_beyond_the_hop_limit() {
        // 0 -> 1 (checkpoint) directly, and 0 -> 2 -> 3 -> ... -> 12 -> 1.
        let mut stations = vec![
            station(
                0,
                StationKind::Duplicate(crate::station::DuplicateStation {
                    destinations: vec![StationId(1), StationId(2)],
                    copies: 1,
                }),
            ),
            station(1, StationKind::Dispose(DisposeStation::default())),
        ];
        for i in 2..12 {
            stations.push(station(i, delay(i + 1)));
        }
        stations.push(station(12, delay(1)));
        let seg = segment(&stations, StationId(0), StationId(1)).unwrap();
        // 0 -> 2 -> ... -> 10 -> 11 -> 12 -> 1 is 12 hops.
        assert_eq!(seg, vec![StationId(0), StationId(1)]);
    }

    #[test]
    fn segment_respects_hop_limit() {
        let mut stations: Vec<Station> = (0..15).map(|i| station(i, delay(i + 1))).collect();
        stations.push(station(15, StationKind::Teleport(TeleportStation { destination: StationId(0) })));
        assert!(segment(&stations, StationId(0), StationId(5)).is_some());
        assert!(segment(&stations, StationId(0), StationId(12)).is_none());
    }
}
