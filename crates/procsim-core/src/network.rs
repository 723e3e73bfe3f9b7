//! The compiled, immutable network shared by all replications.

use std::collections::BTreeMap;

use crate::continuous::{AnalogDef, TankDef};
use crate::expr::Formula;
use crate::id::{ClientTypeId, ResourceId, SignalId, StationId};
use crate::resource::ResourceDef;
use crate::station::{Station, StationKind};
use crate::transporter::TransporterType;

/// Everything a replication needs to run, after validation and id
/// resolution. `Network` is `Send + Sync`; replications borrow it.
#[derive(Debug, Clone, Default)]
pub struct Network {
    pub name: String,
    pub(crate) stations: Vec<Station>,
    pub(crate) model_ids: BTreeMap<i64, StationId>,
    pub variables: Vec<String>,
    pub(crate) variable_initial: Vec<f64>,
    pub client_types: Vec<String>,
    pub resources: Vec<ResourceDef>,
    pub signals: Vec<String>,
    pub counters: Vec<String>,
    pub tanks: Vec<TankDef>,
    pub analogs: Vec<AnalogDef>,
    pub transporters: Vec<TransporterType>,
    pub(crate) termination: Option<Formula>,
    pub(crate) sources: Vec<StationId>,
    pub(crate) state_listeners: Vec<StationId>,
    pub(crate) free_listeners: Vec<StationId>,
    pub(crate) signal_listeners: Vec<StationId>,
    pub(crate) sensors: Vec<StationId>,
}

impl Network {
    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn station(&self, id: StationId) -> Option<&Station> {
        self.stations.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Station by display name.
    pub fn find(&self, name: &str) -> Option<StationId> {
        self.stations.iter().find(|s| s.name == name).map(|s| s.id)
    }

    /// Station by the id it had in the model description.
    pub fn by_model_id(&self, model_id: i64) -> Option<StationId> {
        self.model_ids.get(&model_id).copied()
    }

    pub fn client_type(&self, name: &str) -> Option<ClientTypeId> {
        position(&self.client_types, name).map(ClientTypeId)
    }

    pub fn resource(&self, name: &str) -> Option<ResourceId> {
        self.resources
            .iter()
            .position(|r| r.name == name)
            .map(|i| ResourceId(i as u32))
    }

    pub fn signal(&self, name: &str) -> Option<SignalId> {
        position(&self.signals, name).map(SignalId)
    }

    /// Stations of the given group, including nested groups.
    pub fn members_of(&self, group: StationId) -> Vec<StationId> {
        self.stations
            .iter()
            .filter(|s| {
                let mut parent = s.parent;
                let mut depth = 0;
                while let Some(p) = parent {
                    if p == group {
                        return true;
                    }
                    depth += 1;
                    if depth > self.stations.len() {
                        break;
                    }
                    parent = self.station(p).and_then(|ps| ps.parent);
                }
                false
            })
            .map(|s| s.id)
            .collect()
    }

    /// Fill the per-role station lists used by the kernel.
    pub(crate) fn index_roles(&mut self) {
        self.sources.clear();
        self.state_listeners.clear();
        self.free_listeners.clear();
        self.signal_listeners.clear();
        self.sensors.clear();
        for s in &self.stations {
            if matches!(s.kind, StationKind::Source(_)) {
                self.sources.push(s.id);
            }
            if matches!(s.kind, StationKind::Sensor(_)) {
                self.sensors.push(s.id);
            }
            if s.kind.is_state_listener() {
                self.state_listeners.push(s.id);
            }
            if s.kind.is_free_resources_listener() {
                self.free_listeners.push(s.id);
            }
            if s.kind.is_signal_listener() {
                self.signal_listeners.push(s.id);
            }
        }
    }
}

fn position(names: &[String], name: &str) -> Option<u32> {
    names.iter().position(|n| n == name).map(|i| i as u32)
}
