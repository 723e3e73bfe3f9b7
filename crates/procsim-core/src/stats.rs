//! Statistics indicators and the per-replication recorder.
//!
//! Two indicator kinds cover everything the kernel measures:
//!
//! - [`Tally`] accumulates discrete observations (waiting times, residence
//!   times) with Welford's online mean/variance.
//! - [`TimeWeighted`] tracks a piecewise-constant level over simulated time
//!   (queue length, clients at a station, units in use).
//!
//! The [`Recorder`] owns one set of indicators per station, client type and
//! resource plus system-wide work in progress, and turns them into a
//! serializable [`ReplicationStatistics`] at the end of a run.

use serde::{Deserialize, Serialize};

use crate::id::{ClientTypeId, ResourceId, StationId};
use crate::sim::{SimTime, to_seconds};

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

/// Aggregate view of an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub count: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// Common indicator operations.
pub trait Indicator {
    /// Aggregate as of `now`.
    fn get(&self, now: SimTime) -> Summary;
    /// Discard everything recorded so far (end of warm-up).
    fn reset(&mut self, now: SimTime);
}

/// Discrete observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }
}

impl Indicator for Tally {
    fn get(&self, _now: SimTime) -> Summary {
        let std_dev = if self.count > 1 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        };
        Summary {
            count: self.count,
            mean: self.mean,
            std_dev,
            min: self.min,
            max: self.max,
        }
    }

    fn reset(&mut self, _now: SimTime) {
        *self = Self::default();
    }
}

/// A level that holds its value between changes.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWeighted {
    start: SimTime,
    last_time: SimTime,
    value: f64,
    area: f64,
    area_sq: f64,
    min: f64,
    max: f64,
    changes: u64,
}

impl Default for TimeWeighted {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TimeWeighted {
    pub fn new(now: SimTime) -> Self {
        Self {
            start: now,
            last_time: now,
            value: 0.0,
            area: 0.0,
            area_sq: 0.0,
            min: 0.0,
            max: 0.0,
            changes: 0,
        }
    }

    /// Record that the level became `value` at `time`.
    pub fn set(&mut self, time: SimTime, value: f64) {
        self.accumulate(time);
        self.value = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.changes += 1;
    }

    pub fn current(&self) -> f64 {
        self.value
    }

    fn accumulate(&mut self, time: SimTime) {
        if time > self.last_time {
            let dt = to_seconds(time - self.last_time);
            self.area += self.value * dt;
            self.area_sq += self.value * self.value * dt;
            self.last_time = time;
        }
    }
}

impl Indicator for TimeWeighted {
    fn get(&self, now: SimTime) -> Summary {
        let mut copy = self.clone();
        copy.accumulate(now);
        let elapsed = to_seconds(now.saturating_sub(self.start));
        let (mean, std_dev) = if elapsed > 0.0 {
            let mean = copy.area / elapsed;
            let var = (copy.area_sq / elapsed - mean * mean).max(0.0);
            (mean, var.sqrt())
        } else {
            (copy.value, 0.0)
        };
        Summary {
            count: self.changes,
            mean,
            std_dev,
            min: self.min,
            max: self.max,
        }
    }

    fn reset(&mut self, now: SimTime) {
        let value = self.value;
        *self = Self::new(now);
        self.value = value;
        self.min = value;
        self.max = value;
    }
}

/// A plain event counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter(u64);

impl Counter {
    pub fn increment(&mut self) {
        self.0 += 1;
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub(crate) struct StationIndicators {
    pub arrivals: Counter,
    pub departures: Counter,
    pub at_station: TimeWeighted,
    pub in_queue: TimeWeighted,
    pub waiting: Tally,
    pub process: Tally,
    pub residence: Tally,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ClientTypeIndicators {
    pub disposed: Counter,
    pub waiting: Tally,
    pub transfer: Tally,
    pub process: Tally,
    pub residence: Tally,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ResourceIndicators {
    pub in_use: TimeWeighted,
    pub capacity: TimeWeighted,
    pub seizes: Counter,
}

/// All indicators of one replication.
#[derive(Debug, Clone)]
pub struct Recorder {
    pub(crate) stations: Vec<StationIndicators>,
    pub(crate) client_types: Vec<ClientTypeIndicators>,
    pub(crate) resources: Vec<ResourceIndicators>,
    pub(crate) wip: TimeWeighted,
    pub(crate) system_residence: Tally,
}

impl Recorder {
    pub fn new(stations: usize, client_types: usize, capacities: &[u32]) -> Self {
        Self {
            stations: vec![StationIndicators::default(); stations],
            client_types: vec![ClientTypeIndicators::default(); client_types],
            resources: capacities
                .iter()
                .map(|&c| {
                    let mut r = ResourceIndicators::default();
                    r.capacity.set(0, capacity_level(c));
                    r
                })
                .collect(),
            wip: TimeWeighted::new(0),
            system_residence: Tally::new(),
        }
    }

    pub(crate) fn station(&mut self, id: StationId) -> Option<&mut StationIndicators> {
        self.stations.get_mut(id.index())
    }

    pub(crate) fn client_type(&mut self, id: ClientTypeId) -> Option<&mut ClientTypeIndicators> {
        self.client_types.get_mut(id.0 as usize)
    }

    pub(crate) fn resource(&mut self, id: ResourceId) -> Option<&mut ResourceIndicators> {
        self.resources.get_mut(id.0 as usize)
    }

    /// Reset every indicator at the end of the warm-up phase.
    pub fn reset(&mut self, now: SimTime) {
        for s in &mut self.stations {
            s.arrivals.reset();
            s.departures.reset();
            s.at_station.reset(now);
            s.in_queue.reset(now);
            s.waiting.reset(now);
            s.process.reset(now);
            s.residence.reset(now);
        }
        for t in &mut self.client_types {
            t.disposed.reset();
            t.waiting.reset(now);
            t.transfer.reset(now);
            t.process.reset(now);
            t.residence.reset(now);
        }
        for r in &mut self.resources {
            r.in_use.reset(now);
            r.capacity.reset(now);
            r.seizes.reset();
        }
        self.wip.reset(now);
        self.system_residence.reset(now);
    }
}

/// Infinite pools are reported with zero capacity (utilization undefined).
pub(crate) fn capacity_level(capacity: u32) -> f64 {
    if capacity == u32::MAX { 0.0 } else { f64::from(capacity) }
}

// ---------------------------------------------------------------------------
// Serializable results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSummary {
    pub name: String,
    pub model_id: i64,
    pub arrivals: u64,
    pub departures: u64,
    pub at_station: Summary,
    pub in_queue: Summary,
    pub waiting: Summary,
    pub process: Summary,
    pub residence: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientTypeSummary {
    pub name: String,
    pub disposed: u64,
    pub waiting: Summary,
    pub transfer: Summary,
    pub process: Summary,
    pub residence: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub name: String,
    pub in_use: Summary,
    pub capacity: Summary,
    /// Mean units in use over mean capacity; zero for infinite pools.
    pub utilization: f64,
    pub seizes: u64,
    pub seized_units: u64,
    pub released_units: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousSummary {
    pub name: String,
    pub final_value: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSummary {
    pub name: String,
    pub value: f64,
}

/// Everything one replication measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationStatistics {
    pub replication: u32,
    pub seed: u64,
    /// Simulated time at the end of the run, seconds.
    pub end_time: f64,
    pub events_processed: u64,
    pub clients_created: u64,
    pub clients_disposed: u64,
    pub clients_in_system: u64,
    pub wip: Summary,
    pub system_residence: Summary,
    pub stations: Vec<StationSummary>,
    pub client_types: Vec<ClientTypeSummary>,
    pub resources: Vec<ResourceSummary>,
    pub tanks: Vec<ContinuousSummary>,
    pub analogs: Vec<ContinuousSummary>,
    pub counters: Vec<CounterSummary>,
    pub variables: Vec<CounterSummary>,
    pub signals_fired: Vec<u64>,
    pub warnings: Vec<String>,
    /// Warnings beyond the cap that were counted but not kept.
    pub warnings_suppressed: u64,
    pub shutdown: Option<String>,
    pub terminated_by_condition: bool,
}

impl ReplicationStatistics {
    pub fn station(&self, name: &str) -> Option<&StationSummary> {
        self.stations.iter().find(|s| s.name == name)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceSummary> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn client_type(&self, name: &str) -> Option<&ClientTypeSummary> {
        self.client_types.iter().find(|t| t.name == name)
    }

    pub fn tank(&self, name: &str) -> Option<&ContinuousSummary> {
        self.tanks.iter().find(|t| t.name == name)
    }
}
