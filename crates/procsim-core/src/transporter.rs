//! Transporter (vehicle) pools.
//!
//! Every transporter type owns a fixed set of vehicles that park at stations.
//! A transport source requests the nearest free vehicle; the vehicle drives
//! there empty, loads, drives to the destination, unloads and parks there.

use std::collections::BTreeMap;

use crate::id::{StationId, TransporterTypeId};

/// A compiled transporter type.
#[derive(Debug, Clone, PartialEq)]
pub struct TransporterType {
    pub name: String,
    /// Clients one vehicle carries at most.
    pub capacity: u32,
    /// Initial vehicle positions.
    pub homes: Vec<(StationId, u32)>,
    /// Travel times in seconds between station pairs. Symmetric.
    pub travel_times: BTreeMap<(StationId, StationId), f64>,
    /// Travel time for pairs not listed in `travel_times`.
    pub default_travel_time: f64,
    pub load_time: f64,
    pub unload_time: f64,
}

impl TransporterType {
    /// Travel time in seconds from `from` to `to`.
    pub fn travel_time(&self, from: StationId, to: StationId) -> f64 {
        if from == to {
            return 0.0;
        }
        self.travel_times
            .get(&(from, to))
            .or_else(|| self.travel_times.get(&(to, from)))
            .copied()
            .unwrap_or(self.default_travel_time)
    }

    pub fn vehicle_count(&self) -> u32 {
        self.homes.iter().map(|&(_, n)| n).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vehicle {
    pub location: StationId,
    pub busy: bool,
}

/// Per-replication vehicle positions for every transporter type.
#[derive(Debug, Clone, Default)]
pub struct TransporterPools {
    fleets: Vec<Vec<Vehicle>>,
}

impl TransporterPools {
    pub fn new(types: &[TransporterType]) -> Self {
        Self {
            fleets: types
                .iter()
                .map(|t| {
                    t.homes
                        .iter()
                        .flat_map(|&(station, n)| {
                            std::iter::repeat_n(
                                Vehicle {
                                    location: station,
                                    busy: false,
                                },
                                n as usize,
                            )
                        })
                        .collect()
                })
                .collect(),
        }
    }

    /// The free vehicle of `kind` closest to `at`. Ties go to the lowest
    /// vehicle index.
    pub fn nearest_free(&self, kind: TransporterTypeId, def: &TransporterType, at: StationId) -> Option<usize> {
        let fleet = self.fleets.get(kind.0 as usize)?;
        let mut best: Option<(usize, f64)> = None;
        for (i, v) in fleet.iter().enumerate() {
            if v.busy {
                continue;
            }
            let t = def.travel_time(v.location, at);
            if best.is_none_or(|(_, bt)| t < bt) {
                best = Some((i, t));
            }
        }
        best.map(|(i, _)| i)
    }

    pub fn has_free(&self, kind: TransporterTypeId) -> bool {
        self.fleets
            .get(kind.0 as usize)
            .is_some_and(|f| f.iter().any(|v| !v.busy))
    }

    pub fn vehicle(&self, kind: TransporterTypeId, index: usize) -> Option<&Vehicle> {
        self.fleets.get(kind.0 as usize)?.get(index)
    }

    /// Mark a vehicle busy. Returns its position before departure.
    pub fn dispatch(&mut self, kind: TransporterTypeId, index: usize) -> Option<StationId> {
        let v = self.fleets.get_mut(kind.0 as usize)?.get_mut(index)?;
        debug_assert!(!v.busy, "dispatching a busy vehicle");
        v.busy = true;
        Some(v.location)
    }

    /// Park a vehicle at `at` and make it available again.
    pub fn park(&mut self, kind: TransporterTypeId, index: usize, at: StationId) {
        if let Some(v) = self
            .fleets
            .get_mut(kind.0 as usize)
            .and_then(|f| f.get_mut(index))
        {
            v.location = at;
            v.busy = false;
        }
    }

    /// Vehicles of `kind` in use right now.
    pub fn busy_count(&self, kind: TransporterTypeId) -> usize {
        self.fleets
            .get(kind.0 as usize)
            .map_or(0, |f| f.iter().filter(|v| v.busy).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: StationId = StationId(0);
    const B: StationId = StationId(1);
    const C: StationId = StationId(2);
    const TRUCK: TransporterTypeId = TransporterTypeId(0);

    fn trucks() -> TransporterType {
        let mut travel_times = BTreeMap::new();
        travel_times.insert((A, B), 10.0);
        travel_times.insert((B, C), 4.0);
        TransporterType {
            name: "truck".into(),
            capacity: 2,
            homes: vec![(A, 1), (C, 1)],
            travel_times,
            default_travel_time: 30.0,
            load_time: 1.0,
            unload_time: 1.0,
        }
    }

    #[test]
    fn travel_times_are_symmetric() {
        let t = trucks();
        assert_eq!(t.travel_time(B, A), 10.0);
        assert_eq!(t.travel_time(A, C), 30.0);
        assert_eq!(t.travel_time(C, C), 0.0);
    }

    #[test]
    fn nearest_free_vehicle_wins() {
        let def = trucks();
        let mut pools = TransporterPools::new(std::slice::from_ref(&def));
        // Vehicle 1 at C is 4s from B, vehicle 0 at A is 10s.
        assert_eq!(pools.nearest_free(TRUCK, &def, B), Some(1));
        assert_eq!(pools.dispatch(TRUCK, 1), Some(C));
        assert_eq!(pools.nearest_free(TRUCK, &def, B), Some(0));
        pools.dispatch(TRUCK, 0);
        assert_eq!(pools.nearest_free(TRUCK, &def, B), None);
        assert_eq!(pools.busy_count(TRUCK), 2);
        pools.park(TRUCK, 1, B);
        assert_eq!(pools.vehicle(TRUCK, 1).unwrap().location, B);
        assert!(pools.has_free(TRUCK));
    }

    #[test]
    fn ties_go_to_lowest_index() {
        let mut def = trucks();
        def.homes = vec![(A, 3)];
        let pools = TransporterPools::new(std::slice::from_ref(&def));
        assert_eq!(pools.nearest_free(TRUCK, &def, B), Some(0));
        assert_eq!(def.vehicle_count(), 3);
    }
}
