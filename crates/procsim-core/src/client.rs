//! Clients (tokens) and the per-replication client registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::expr::ClientView;
use crate::id::{ClientKey, ClientTypeId, StationId};
use crate::resource::Demand;
use crate::sim::{SimTime, to_seconds};

/// Highest user number slot a client may carry.
pub const MAX_NUMBER_SLOTS: usize = 1024;

/// Which accumulated time a delay is booked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    #[default]
    Waiting,
    Transfer,
    Process,
}

/// Units a client holds, keyed by the seize station that granted them.
#[derive(Debug, Clone, PartialEq)]
pub struct HeldUnits {
    pub seize: StationId,
    pub demand: Demand,
}

/// A token flowing through the network.
#[derive(Debug, Clone)]
pub struct Client {
    /// Sequential number, unique within a replication.
    pub number: u64,
    pub type_id: ClientTypeId,
    /// Station that created the client.
    pub source: StationId,
    pub created_at: SimTime,
    /// Created before the end of the warm-up phase.
    pub is_warm_up: bool,
    pub last_station: Option<StationId>,
    pub current_station: Option<StationId>,
    /// Station this client has been announced to while its zero-delay leave
    /// event is pending.
    pub announced_to: Option<StationId>,
    /// Time the client entered its current station.
    pub station_entered: SimTime,
    /// Start of the current wait, set on every enqueue.
    pub last_waiting_start: SimTime,
    pub waiting: SimTime,
    pub transfer: SimTime,
    pub process: SimTime,
    pub numbers: Vec<f64>,
    pub texts: BTreeMap<String, String>,
    pub held: Vec<HeldUnits>,
    /// Members of a temporary batch carried by this client.
    pub batch: Vec<ClientKey>,
}

impl Client {
    pub fn new(number: u64, type_id: ClientTypeId, source: StationId, now: SimTime, is_warm_up: bool) -> Self {
        Self {
            number,
            type_id,
            source,
            created_at: now,
            is_warm_up,
            last_station: None,
            current_station: None,
            announced_to: None,
            station_entered: now,
            last_waiting_start: now,
            waiting: 0,
            transfer: 0,
            process: 0,
            numbers: Vec::new(),
            texts: BTreeMap::new(),
            held: Vec::new(),
            batch: Vec::new(),
        }
    }

    /// Book `duration` to a time bucket.
    pub fn book(&mut self, bucket: TimeBucket, duration: SimTime) {
        let slot = match bucket {
            TimeBucket::Waiting => &mut self.waiting,
            TimeBucket::Transfer => &mut self.transfer,
            TimeBucket::Process => &mut self.process,
        };
        *slot = slot.saturating_add(duration);
    }

    /// Time spent in the system so far.
    pub fn residence(&self, now: SimTime) -> SimTime {
        now.saturating_sub(self.created_at)
    }

    pub fn number_slot(&self, index: usize) -> f64 {
        self.numbers.get(index).copied().unwrap_or(0.0)
    }

    /// Set user number slot `index`. Returns `false` if the slot is out of
    /// range.
    pub fn set_number(&mut self, index: usize, value: f64) -> bool {
        if index >= MAX_NUMBER_SLOTS {
            return false;
        }
        if self.numbers.len() <= index {
            self.numbers.resize(index + 1, 0.0);
        }
        self.numbers[index] = value;
        true
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.texts.get(key).map(String::as_str)
    }

    pub fn set_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.texts.insert(key.into(), value.into());
    }

    /// Remove and return the units held for a seize station.
    pub fn take_held(&mut self, seize: StationId) -> Option<Demand> {
        let pos = self.held.iter().position(|h| h.seize == seize)?;
        Some(self.held.remove(pos).demand)
    }

    /// Read-only view for formula evaluation at time `now`.
    pub fn view(&self, now: SimTime) -> ClientView<'_> {
        ClientView {
            type_id: self.type_id.0,
            number: self.number,
            waiting: to_seconds(self.waiting),
            transfer: to_seconds(self.transfer),
            process: to_seconds(self.process),
            residence: to_seconds(self.residence(now)),
            numbers: &self.numbers,
            texts: &self.texts,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Owns every live client of one replication.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: SlotMap<ClientKey, Client>,
    next_number: u64,
    created: u64,
    removed: u64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh client.
    pub fn create(&mut self, type_id: ClientTypeId, source: StationId, now: SimTime, is_warm_up: bool) -> ClientKey {
        self.next_number += 1;
        self.created += 1;
        let client = Client::new(self.next_number, type_id, source, now, is_warm_up);
        self.clients.insert(client)
    }

    /// Copy `original` into a new client with its own number. Held units and
    /// batch membership are not copied.
    pub fn duplicate(&mut self, original: ClientKey, now: SimTime) -> Option<ClientKey> {
        let mut copy = self.clients.get(original)?.clone();
        self.next_number += 1;
        self.created += 1;
        copy.number = self.next_number;
        copy.created_at = now;
        copy.announced_to = None;
        copy.held.clear();
        copy.batch.clear();
        Some(self.clients.insert(copy))
    }

    pub fn get(&self, key: ClientKey) -> Option<&Client> {
        self.clients.get(key)
    }

    pub fn get_mut(&mut self, key: ClientKey) -> Option<&mut Client> {
        self.clients.get_mut(key)
    }

    pub fn contains(&self, key: ClientKey) -> bool {
        self.clients.contains_key(key)
    }

    /// Remove a client from the system.
    pub fn remove(&mut self, key: ClientKey) -> Option<Client> {
        let client = self.clients.remove(key)?;
        self.removed += 1;
        Some(client)
    }

    /// Clients currently alive (including batch members).
    pub fn in_system(&self) -> usize {
        self.clients.len()
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn removed(&self) -> u64 {
        self.removed
    }
}
