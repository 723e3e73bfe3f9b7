//! Kernel journal: a ring buffer of notable happenings with passive
//! subscribers.
//!
//! The journal is an observation channel only. Nothing in the kernel reads it
//! back, so suppressing it (capacity 0, no subscribers) changes no simulation
//! result.

use std::collections::VecDeque;

use crate::id::{ResourceId, SignalId, StationId};
use crate::sim::SimTime;

// ---------------------------------------------------------------------------
// Journal entries
// ---------------------------------------------------------------------------

/// Something that happened during a replication. All entries carry the time
/// at which they occurred.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    ClientCreated {
        client: u64,
        station: StationId,
        time: SimTime,
    },
    ClientArrived {
        client: u64,
        station: StationId,
        time: SimTime,
    },
    ClientLeft {
        client: u64,
        station: StationId,
        time: SimTime,
    },
    ClientDisposed {
        client: u64,
        station: StationId,
        time: SimTime,
    },
    ResourceSeized {
        resource: ResourceId,
        units: u32,
        station: StationId,
        time: SimTime,
    },
    ResourceReleased {
        resource: ResourceId,
        units: u32,
        time: SimTime,
    },
    SignalFired {
        signal: SignalId,
        time: SimTime,
    },
    Shutdown {
        reason: String,
        time: SimTime,
    },
}

impl SimEvent {
    pub fn time(&self) -> SimTime {
        match self {
            SimEvent::ClientCreated { time, .. }
            | SimEvent::ClientArrived { time, .. }
            | SimEvent::ClientLeft { time, .. }
            | SimEvent::ClientDisposed { time, .. }
            | SimEvent::ResourceSeized { time, .. }
            | SimEvent::ResourceReleased { time, .. }
            | SimEvent::SignalFired { time, .. }
            | SimEvent::Shutdown { time, .. } => *time,
        }
    }
}

/// A passive listener receives journal entries read-only.
pub type JournalListener = Box<dyn FnMut(&SimEvent) + Send>;

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Fixed-capacity ring buffer of [`SimEvent`]s. When full, the oldest entry
/// is dropped.
pub struct Journal {
    entries: VecDeque<SimEvent>,
    capacity: usize,
    total_written: u64,
    listeners: Vec<JournalListener>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("total_written", &self.total_written)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Journal {
    /// A journal keeping at most `capacity` entries. Capacity 0 keeps none but
    /// still delivers to subscribers.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            total_written: 0,
            listeners: Vec::new(),
        }
    }

    /// Register a passive listener.
    pub fn subscribe(&mut self, listener: JournalListener) {
        self.listeners.push(listener);
    }

    /// Whether recording has any observable effect.
    pub fn is_active(&self) -> bool {
        self.capacity > 0 || !self.listeners.is_empty()
    }

    pub fn record(&mut self, event: SimEvent) {
        if !self.is_active() {
            return;
        }
        for listener in &mut self.listeners {
            listener(&event);
        }
        self.total_written += 1;
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &SimEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total entries written, including those dropped from the buffer.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Number of entries dropped because the buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.total_written
            .saturating_sub(self.entries.len() as u64)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
