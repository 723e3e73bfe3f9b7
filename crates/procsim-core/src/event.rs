//! Time-ordered event queue and simulation clock.
//!
//! Events are kept in a binary heap keyed by `(time, seq)`, where `seq` is a
//! monotonically increasing insertion counter. Popping an event advances the
//! clock to its time; equal times are delivered in insertion order.
//!
//! Scheduling into the past is a programming error and panics immediately:
//! continuing would deliver an effect before its cause.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::id::{ClientKey, ResourceId, StationId, TransporterTypeId};
use crate::resource::Demand;
use crate::sim::SimTime;

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// What a scheduled event does when it fires.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A source station generates its next arrival.
    Arrival { station: StationId },
    /// A client leaves `station` and is forwarded to its successor.
    Leave { station: StationId, client: ClientKey },
    /// Units of `demand` are returned to their pools (post-processing end or
    /// delayed release).
    ResourceRelease { station: StationId, demand: Demand },
    /// A hold station's maximum waiting time elapsed for some client.
    HoldTimeout { station: StationId },
    /// A waiting client's patience at a process station ran out.
    WaitingCancel { station: StationId, client: ClientKey },
    /// A batching station waited one millisecond for more clients.
    BatchWait { station: StationId },
    /// A vehicle reached its destination with the given clients on board.
    TransportDelivery {
        destination: StationId,
        transporter: TransporterTypeId,
        vehicle: usize,
        clients: Vec<ClientKey>,
    },
    /// Re-evaluate tanks and analog values. Stale generations are ignored.
    ContinuousUpdate { generation: u64 },
    /// A scheduled capacity change for a resource pool.
    CapacityChange { resource: ResourceId },
    /// Deferred state-change cascade.
    SystemChange,
    /// Periodic re-check of time-gated stations.
    TimedCheck,
    /// End of the warm-up phase: statistics are reset.
    WarmUpEnd,
    /// Configured termination time reached.
    Terminate,
}

/// An event together with its execution time and insertion sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub time: SimTime,
    pub seq: u64,
    pub kind: EventKind,
}

impl Eq for ScheduledEvent {}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that BinaryHeap (a max-heap) yields the earliest event.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// EventQueue
// ---------------------------------------------------------------------------

/// Pending events plus the clock they drive.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    now: SimTime,
    next_seq: u64,
    total_scheduled: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current clock value: the time of the most recently popped event.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Insert an event at absolute `time`.
    ///
    /// # Panics
    ///
    /// Panics if `time` is earlier than the current clock.
    pub fn schedule(&mut self, time: SimTime, kind: EventKind) {
        assert!(
            time >= self.now,
            "event scheduled in the past: time {time} < now {} ({kind:?})",
            self.now
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        self.total_scheduled += 1;
        self.heap.push(ScheduledEvent { time, seq, kind });
    }

    /// Insert an event `delay` milliseconds after the current clock.
    pub fn schedule_in(&mut self, delay: SimTime, kind: EventKind) {
        let time = self.now.saturating_add(delay);
        self.schedule(time, kind);
    }

    /// Remove the earliest event and advance the clock to its time.
    pub fn pop_next(&mut self) -> Option<ScheduledEvent> {
        let event = self.heap.pop()?;
        debug_assert!(event.time >= self.now);
        self.now = event.time;
        Some(event)
    }

    /// Time of the earliest pending event, without removing it.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|e| e.time)
    }

    /// Drop every pending event. The clock is left unchanged.
    pub fn cancel_all(&mut self) {
        self.heap.clear();
    }

    /// Drop every pending event matching `pred`. Returns how many were
    /// removed.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&EventKind) -> bool) -> usize {
        let before = self.heap.len();
        self.heap.retain(|e| !pred(&e.kind));
        before - self.heap.len()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Total events ever scheduled on this queue.
    pub fn total_scheduled(&self) -> u64 {
        self.total_scheduled
    }
}
