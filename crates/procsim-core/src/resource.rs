//! Resource pools and the seize/release protocol.
//!
//! A pool holds `capacity` interchangeable units. Stations lock a [`Demand`]
//! (units from one or more pools) atomically: either every pool can serve its
//! share and all are locked, or nothing changes. Locks are tracked per owner
//! station so that releases can be checked against what that owner holds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::{ResourceId, StationId};
use crate::sim::{SimTime, to_sim_time};

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Units requested from several pools at once.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Demand {
    pub units: Vec<(ResourceId, u32)>,
}

impl Demand {
    pub fn new(units: Vec<(ResourceId, u32)>) -> Self {
        Self { units }
    }

    pub fn single(resource: ResourceId, units: u32) -> Self {
        Self {
            units: vec![(resource, units)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units.iter().all(|&(_, n)| n == 0)
    }
}

/// How many units a pool has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Capacity {
    Fixed { units: u32 },
    Infinite,
    /// Capacity cycles through `values`, switching every `interval` seconds.
    Schedule { interval: f64, values: Vec<u32> },
}

impl Capacity {
    pub(crate) fn initial(&self) -> u32 {
        match self {
            Capacity::Fixed { units } => *units,
            Capacity::Infinite => u32::MAX,
            Capacity::Schedule { values, .. } => values.first().copied().unwrap_or(0),
        }
    }
}

/// A compiled resource pool definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDef {
    pub name: String,
    pub capacity: Capacity,
    /// Extra delay, in seconds, when units move to a different station than
    /// the one that used them last.
    pub relocation_time: f64,
    pub cost_per_hour_busy: f64,
    pub cost_per_hour_idle: f64,
    pub cost_per_seize: f64,
}

impl ResourceDef {
    pub fn fixed(name: impl Into<String>, units: u32) -> Self {
        Self {
            name: name.into(),
            capacity: Capacity::Fixed { units },
            relocation_time: 0.0,
            cost_per_hour_busy: 0.0,
            cost_per_hour_idle: 0.0,
            cost_per_seize: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime pools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Pool {
    capacity: u32,
    locked: u32,
    held_by: BTreeMap<StationId, u32>,
    last_owner: Option<StationId>,
    relocation: SimTime,
    schedule_index: usize,
    seized_total: u64,
    released_total: u64,
}

/// Per-replication state of every resource pool.
#[derive(Debug, Clone, Default)]
pub struct ResourcePools {
    pools: Vec<Pool>,
}

impl ResourcePools {
    pub fn new(defs: &[ResourceDef]) -> Self {
        Self {
            pools: defs
                .iter()
                .map(|d| Pool {
                    capacity: d.capacity.initial(),
                    locked: 0,
                    held_by: BTreeMap::new(),
                    last_owner: None,
                    relocation: to_sim_time(d.relocation_time),
                    schedule_index: 0,
                    seized_total: 0,
                    released_total: 0,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn capacity(&self, id: ResourceId) -> u32 {
        self.pools.get(id.0 as usize).map_or(0, |p| p.capacity)
    }

    pub fn in_use(&self, id: ResourceId) -> u32 {
        self.pools.get(id.0 as usize).map_or(0, |p| p.locked)
    }

    pub fn available(&self, id: ResourceId) -> u32 {
        self.pools
            .get(id.0 as usize)
            .map_or(0, |p| p.capacity.saturating_sub(p.locked))
    }

    /// Units of `id` currently held by `owner`.
    pub fn held_by(&self, id: ResourceId, owner: StationId) -> u32 {
        self.pools
            .get(id.0 as usize)
            .and_then(|p| p.held_by.get(&owner).copied())
            .unwrap_or(0)
    }

    pub fn seized_total(&self, id: ResourceId) -> u64 {
        self.pools.get(id.0 as usize).map_or(0, |p| p.seized_total)
    }

    pub fn released_total(&self, id: ResourceId) -> u64 {
        self.pools.get(id.0 as usize).map_or(0, |p| p.released_total)
    }

    /// Whether the whole demand could be locked right now.
    pub fn can_lock(&self, demand: &Demand) -> bool {
        // Sum per pool first; a demand may name the same pool twice.
        let mut needed: BTreeMap<ResourceId, u64> = BTreeMap::new();
        for &(id, units) in &demand.units {
            *needed.entry(id).or_default() += u64::from(units);
        }
        needed
            .iter()
            .all(|(&id, &n)| u64::from(self.available(id)) >= n)
    }

    /// Lock every unit of `demand` for `owner`.
    ///
    /// Returns the extra setup delay caused by units relocating from another
    /// station, or `None` (and changes nothing) if any pool lacks units.
    pub fn try_lock(&mut self, demand: &Demand, owner: StationId) -> Option<SimTime> {
        if !self.can_lock(demand) {
            return None;
        }
        let mut extra = 0;
        for &(id, units) in &demand.units {
            if units == 0 {
                continue;
            }
            let pool = &mut self.pools[id.0 as usize];
            if pool.last_owner.is_some_and(|last| last != owner) {
                extra = extra.max(pool.relocation);
            }
            pool.locked += units;
            *pool.held_by.entry(owner).or_default() += units;
            pool.last_owner = Some(owner);
            pool.seized_total += u64::from(units);
        }
        Some(extra)
    }

    /// Return `demand` to the pools on behalf of `owner`.
    ///
    /// Releasing more than the owner holds is an accounting bug; it asserts
    /// in debug builds and is clamped otherwise.
    pub fn release(&mut self, demand: &Demand, owner: StationId) {
        for &(id, units) in &demand.units {
            let Some(pool) = self.pools.get_mut(id.0 as usize) else {
                debug_assert!(false, "release of unknown resource {id:?}");
                continue;
            };
            let held = pool.held_by.get(&owner).copied().unwrap_or(0);
            debug_assert!(
                units <= held,
                "station {owner:?} releases {units} units of {id:?} but holds {held}"
            );
            let units = units.min(held);
            if units == held {
                pool.held_by.remove(&owner);
            } else {
                pool.held_by.insert(owner, held - units);
            }
            pool.locked = pool.locked.saturating_sub(units);
            pool.released_total += u64::from(units);
        }
    }

    /// Apply the next step of a capacity schedule. Returns the new capacity.
    pub fn advance_schedule(&mut self, id: ResourceId, capacity: &Capacity) -> Option<u32> {
        let Capacity::Schedule { values, .. } = capacity else {
            return None;
        };
        if values.is_empty() {
            return None;
        }
        let pool = self.pools.get_mut(id.0 as usize)?;
        pool.schedule_index = (pool.schedule_index + 1) % values.len();
        pool.capacity = values[pool.schedule_index];
        Some(pool.capacity)
    }
}
