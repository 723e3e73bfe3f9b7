//! Model compilation.
//!
//! Turns a [`ModelDescription`] into an immutable [`Network`] in two phases:
//!
//! 1. **Build** -- every node is validated and compiled with raw ids (its
//!    position in the description). Formulas are parsed, named entities
//!    (resources, client types, signals, tanks) are resolved to dense ids.
//!    Errors are collected rather than returned early so that the caller
//!    sees every problem at once.
//! 2. **Resolve** -- pass-through vertex nodes are removed, raw ids are
//!    remapped to dense [`StationId`]s, and cross-station facts (match
//!    inputs, pull-barrier segments, reachability) are computed.
//!
//! No name lookups survive into the network: everything the kernel touches
//! at runtime is indexed.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::continuous::{AnalogDef, TankDef};
use crate::expr::{CalcError, CompiledExpr, EvalScope, Evaluator, Formula, ParseError};
use crate::id::{
    AnalogId, ClientTypeId, CounterId, ResourceId, SignalId, StationId, TankId, TransporterTypeId, VariableId,
};
use crate::model::{
    ModelDescription, NodeDescription, NodeKind, ResourceUse, TimeSpec, TypedFormulaSpec, TypedTimeSpec,
};
use crate::network::Network;
use crate::param::{TimeExpr, TypedFormula, TypedTime};
use crate::resource::{Capacity, Demand, ResourceDef};
use crate::station::barrier;
use crate::station::{
    AnalogAssignStation, AssignStation, BarrierPullStation, BatchStation, DecideStation, DelayStation,
    DisposeStation, DuplicateStation, GroupStation, HoldStation, MatchStation, PickUpStation, ProcessStation,
    ReleaseStation, ScriptBridge, SeizeStation, SensorStation, SeparateStation, SignalBarrierStation,
    SourceStation, Station, StationKind, TankFlowStation, TeleportStation, TransportDestinationStation, Links,
    TransportSourceStation,
};
use crate::transporter::TransporterType;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A configuration problem that prevents the model from running.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("station {station}: {message}")]
    Station { station: i64, message: String },
    #[error("station {station}: formula `{formula}`: {error}")]
    Formula {
        station: i64,
        formula: String,
        error: ParseError,
    },
    #[error("model: {0}")]
    Model(String),
}

impl BuildError {
    /// Model id of the offending station, if the error belongs to one.
    pub fn station(&self) -> Option<i64> {
        match self {
            BuildError::Station { station, .. } | BuildError::Formula { station, .. } => Some(*station),
            BuildError::Model(_) => None,
        }
    }
}

/// Outcome of validating a single node.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildStatus {
    Ok,
    Errors(Vec<BuildError>),
}

impl BuildStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, BuildStatus::Ok)
    }

    fn from_errors(errors: Vec<BuildError>) -> Self {
        if errors.is_empty() {
            BuildStatus::Ok
        } else {
            BuildStatus::Errors(errors)
        }
    }
}

// ---------------------------------------------------------------------------
// Build context
// ---------------------------------------------------------------------------

/// A syntax-checked formula that was never compiled.
#[derive(Debug)]
struct CheckedOnly;

impl CompiledExpr for CheckedOnly {
    fn calc(&self, _: &mut EvalScope<'_>) -> Result<f64, CalcError> {
        Err(CalcError::Other("formula was only syntax checked".into()))
    }
}

/// Lookup and error collection while building stations.
pub(crate) struct BuildContext<'a> {
    model: &'a ModelDescription,
    evaluator: &'a dyn Evaluator,
    scripts: &'a BTreeMap<String, Arc<dyn ScriptBridge>>,
    variables: Vec<String>,
    /// Model id -> position in the node list.
    positions: BTreeMap<i64, u32>,
    /// Parse formulas for syntax only.
    check_only: bool,
    /// Stand-in for formulas that were only syntax checked.
    checked: Arc<dyn CompiledExpr>,
    current: i64,
    errors: Vec<BuildError>,
}

impl<'a> BuildContext<'a> {
    fn new(
        model: &'a ModelDescription,
        evaluator: &'a dyn Evaluator,
        scripts: &'a BTreeMap<String, Arc<dyn ScriptBridge>>,
        check_only: bool,
    ) -> Self {
        Self {
            model,
            evaluator,
            scripts,
            variables: model.variables.iter().map(|v| v.name.clone()).collect(),
            positions: model
                .nodes
                .iter()
                .enumerate()
                .map(|(i, n)| (n.id, i as u32))
                .collect(),
            check_only,
            checked: Arc::new(CheckedOnly),
            current: 0,
            errors: Vec::new(),
        }
    }

    pub(crate) fn error(&mut self, message: impl Into<String>) {
        self.errors.push(BuildError::Station {
            station: self.current,
            message: message.into(),
        });
    }

    /// Outgoing edge to the node with model id `id`.
    pub(crate) fn next(&mut self, id: i64) -> StationId {
        match self.positions.get(&id) {
            Some(&pos) => StationId(pos),
            None => {
                self.error(format!("edge to unknown node {id}"));
                StationId(0)
            }
        }
    }

    /// Named reference to another station.
    pub(crate) fn station(&mut self, name: &str) -> StationId {
        match self.model.nodes.iter().position(|n| n.name == name) {
            Some(pos) => StationId(pos as u32),
            None => {
                self.error(format!("unknown station `{name}`"));
                StationId(0)
            }
        }
    }

    pub(crate) fn formula(&mut self, text: &str) -> Formula {
        let parsed = if self.check_only {
            self.evaluator.check(text, &self.variables).map(|()| None)
        } else {
            self.evaluator.parse(text, &self.variables).map(Some)
        };
        match parsed {
            Ok(Some(compiled)) => Formula::new(text, compiled),
            Ok(None) => Formula::new(text, Arc::clone(&self.checked)),
            Err(error) => {
                self.errors.push(BuildError::Formula {
                    station: self.current,
                    formula: text.to_owned(),
                    error,
                });
                Formula::constant(0.0)
            }
        }
    }

    pub(crate) fn time(&mut self, spec: &TimeSpec) -> TimeExpr {
        match spec {
            TimeSpec::Constant(v) => {
                if !v.is_finite() || *v < 0.0 {
                    self.error(format!("time {v} must be a non-negative number"));
                }
                TimeExpr::constant(*v)
            }
            TimeSpec::Distribution(d) => {
                if let Err(message) = d.validate() {
                    self.error(message);
                }
                TimeExpr::Distribution(d.clone())
            }
            TimeSpec::Formula { formula } => TimeExpr::Formula(self.formula(formula)),
        }
    }

    pub(crate) fn typed_time(&mut self, spec: &TypedTimeSpec) -> TypedTime {
        let mut by_type = vec![None; self.model.client_types.len()];
        for (name, s) in &spec.by_type {
            let ty = self.client_type(name);
            let t = self.time(s);
            if let Some(slot) = by_type.get_mut(ty.0 as usize) {
                *slot = Some(t);
            }
        }
        TypedTime {
            default: spec.default.as_ref().map(|s| self.time(s)),
            by_type,
        }
    }

    pub(crate) fn typed_formula(&mut self, spec: &TypedFormulaSpec) -> TypedFormula {
        let mut by_type = vec![None; self.model.client_types.len()];
        for (name, text) in &spec.by_type {
            let ty = self.client_type(name);
            let f = self.formula(text);
            if let Some(slot) = by_type.get_mut(ty.0 as usize) {
                *slot = Some(f);
            }
        }
        TypedFormula {
            default: spec.default.as_deref().map(|t| self.formula(t)),
            by_type,
        }
    }

    fn lookup(&mut self, what: &str, names: impl Iterator<Item = &'a str>, name: &str) -> u32 {
        let found = names.enumerate().find(|(_, n)| *n == name).map(|(i, _)| i as u32);
        found.unwrap_or_else(|| {
            self.error(format!("unknown {what} `{name}`"));
            0
        })
    }

    pub(crate) fn client_type(&mut self, name: &str) -> ClientTypeId {
        let model = self.model;
        ClientTypeId(self.lookup("client type", model.client_types.iter().map(String::as_str), name))
    }

    pub(crate) fn resource(&mut self, name: &str) -> ResourceId {
        let model = self.model;
        ResourceId(self.lookup("resource", model.resources.iter().map(|r| r.name.as_str()), name))
    }

    pub(crate) fn demand(&mut self, uses: &[ResourceUse]) -> Demand {
        let units = uses
            .iter()
            .map(|u| {
                if u.units == 0 {
                    self.error(format!("resource `{}` requested with zero units", u.resource));
                }
                (self.resource(&u.resource), u.units)
            })
            .collect();
        Demand::new(units)
    }

    pub(crate) fn signal(&mut self, name: &str) -> SignalId {
        let model = self.model;
        SignalId(self.lookup("signal", model.signals.iter().map(String::as_str), name))
    }

    pub(crate) fn variable(&mut self, name: &str) -> VariableId {
        let model = self.model;
        VariableId(self.lookup("variable", model.variables.iter().map(|v| v.name.as_str()), name))
    }

    pub(crate) fn counter(&mut self, name: &str) -> CounterId {
        let model = self.model;
        CounterId(self.lookup("counter", model.counters.iter().map(String::as_str), name))
    }

    pub(crate) fn tank(&mut self, name: &str) -> TankId {
        let model = self.model;
        TankId(self.lookup("tank", model.tanks.iter().map(|t| t.name.as_str()), name))
    }

    pub(crate) fn analog(&mut self, name: &str) -> AnalogId {
        let model = self.model;
        AnalogId(self.lookup("analog value", model.analogs.iter().map(|a| a.name.as_str()), name))
    }

    pub(crate) fn transporter(&mut self, name: &str) -> TransporterTypeId {
        let model = self.model;
        TransporterTypeId(self.lookup("transporter", model.transporters.iter().map(|t| t.name.as_str()), name))
    }

    pub(crate) fn script(&mut self, name: &str) -> Option<Arc<dyn ScriptBridge>> {
        self.scripts.get(name).cloned()
    }
}

/// Compile one node kind. Vertices have no station of their own.
fn build_kind(kind: &NodeKind, cx: &mut BuildContext<'_>) -> Option<StationKind> {
    let built = match kind {
        NodeKind::Group => StationKind::Group(GroupStation),
        NodeKind::Vertex { next } => {
            cx.next(*next);
            return None;
        }
        NodeKind::Source(d) => StationKind::Source(SourceStation::build(d, cx)),
        NodeKind::Dispose { stop_simulation } => StationKind::Dispose(DisposeStation {
            stop_simulation: *stop_simulation,
        }),
        NodeKind::Delay(d) => StationKind::Delay(DelayStation::build(d, cx)),
        NodeKind::Process(d) => StationKind::Process(ProcessStation::build(d, cx)),
        NodeKind::Seize(d) => StationKind::Seize(SeizeStation::build(d, cx)),
        NodeKind::Release(d) => StationKind::Release(ReleaseStation::build(d, cx)),
        NodeKind::Hold(d) => StationKind::Hold(HoldStation::build(d, cx)),
        NodeKind::SignalBarrier(d) => StationKind::SignalBarrier(SignalBarrierStation::build(d, cx)),
        NodeKind::BarrierPull(d) => StationKind::BarrierPull(BarrierPullStation::build(d, cx)),
        NodeKind::PickUp(d) => StationKind::PickUp(PickUpStation::build(d, cx)),
        NodeKind::Decide(d) => StationKind::Decide(DecideStation::build(d, cx)),
        NodeKind::Teleport { destination } => StationKind::Teleport(TeleportStation::build(destination, cx)),
        NodeKind::Duplicate(d) => StationKind::Duplicate(DuplicateStation::build(d, cx)),
        NodeKind::Assign(d) => StationKind::Assign(AssignStation::build(d, cx)),
        NodeKind::Batch(d) => StationKind::Batch(BatchStation::build(d, cx)),
        NodeKind::Separate { next } => StationKind::Separate(SeparateStation { next: cx.next(*next) }),
        NodeKind::Match(d) => StationKind::Match(MatchStation::build(d, cx)),
        NodeKind::TransportSource(d) => StationKind::TransportSource(TransportSourceStation::build(d, cx)),
        NodeKind::TransportDestination { next } => {
            StationKind::TransportDestination(TransportDestinationStation { next: cx.next(*next) })
        }
        NodeKind::TankFlow(d) => StationKind::TankFlow(TankFlowStation::build(d, cx)),
        NodeKind::Sensor(d) => StationKind::Sensor(SensorStation::build(d, cx)),
        NodeKind::AnalogAssign(d) => StationKind::AnalogAssign(AnalogAssignStation::build(d, cx)),
    };
    Some(built)
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Compiles models against an expression evaluator and a set of named
/// decision scripts.
pub struct Compiler<'e> {
    evaluator: &'e dyn Evaluator,
    scripts: BTreeMap<String, Arc<dyn ScriptBridge>>,
}

impl<'e> Compiler<'e> {
    pub fn new(evaluator: &'e dyn Evaluator) -> Self {
        Self {
            evaluator,
            scripts: BTreeMap::new(),
        }
    }

    /// Register a decision script under `name`.
    pub fn with_script(mut self, name: impl Into<String>, script: Arc<dyn ScriptBridge>) -> Self {
        self.scripts.insert(name.into(), script);
        self
    }

    /// Validate a single node against the rest of the model without
    /// compiling it. Formulas are syntax-checked only.
    pub fn test_node(&self, node: &NodeDescription, model: &ModelDescription) -> BuildStatus {
        let mut cx = BuildContext::new(model, self.evaluator, &self.scripts, true);
        cx.current = node.id;
        build_kind(&node.kind, &mut cx);
        BuildStatus::from_errors(cx.errors)
    }

    /// Compile the whole model. Returns every error found.
    pub fn compile(&self, model: &ModelDescription) -> Result<Network, Vec<BuildError>> {
        let mut errors = check_model(model);
        let mut cx = BuildContext::new(model, self.evaluator, &self.scripts, false);

        // Phase 1: build with raw ids.
        let mut raw: Vec<Option<Station>> = Vec::with_capacity(model.nodes.len());
        let mut vertex_next: BTreeMap<u32, StationId> = BTreeMap::new();
        for (pos, node) in model.nodes.iter().enumerate() {
            cx.current = node.id;
            let parent = node.parent.map(|p| cx.next(p));
            match build_kind(&node.kind, &mut cx) {
                Some(kind) => raw.push(Some(Station {
                    id: StationId(pos as u32),
                    model_id: node.id,
                    name: node.name.clone(),
                    parent,
                    kind,
                })),
                None => {
                    if let NodeKind::Vertex { next } = node.kind {
                        if let Some(&target) = cx.positions.get(&next) {
                            vertex_next.insert(pos as u32, StationId(target));
                        }
                    }
                    raw.push(None);
                }
            }
        }
        let termination = model.termination_condition.as_deref().map(|text| {
            cx.current = 0;
            cx.formula(text)
        });
        errors.append(&mut cx.errors);
        if !errors.is_empty() {
            return Err(errors);
        }

        // Phase 2: drop vertices and remap to dense ids.
        let mut dense: BTreeMap<u32, StationId> = BTreeMap::new();
        for (pos, s) in raw.iter().enumerate() {
            if s.is_some() {
                let id = StationId(dense.len() as u32);
                dense.insert(pos as u32, id);
            }
        }
        let resolve = |raw_id: StationId| -> Result<StationId, String> {
            let mut current = raw_id;
            let mut seen = BTreeSet::new();
            loop {
                if let Some(&id) = dense.get(&current.0) {
                    return Ok(id);
                }
                if !seen.insert(current) {
                    return Err("edges form a cycle of vertices".to_owned());
                }
                current = *vertex_next
                    .get(&current.0)
                    .ok_or_else(|| format!("dangling vertex {}", current.0))?;
            }
        };

        let mut stations: Vec<Station> = Vec::with_capacity(dense.len());
        for mut station in raw.into_iter().flatten() {
            let model_id = station.model_id;
            let mut fail = |message: String| errors.push(BuildError::Station { station: model_id, message });
            match resolve(station.id) {
                Ok(id) => station.id = id,
                Err(e) => fail(e),
            }
            if let Some(parent) = station.parent {
                match resolve(parent) {
                    Ok(id) => station.parent = Some(id),
                    Err(e) => fail(e),
                }
            }
            for link in station.kind.links_mut() {
                match resolve(*link) {
                    Ok(id) => *link = id,
                    Err(e) => fail(e),
                }
            }
            stations.push(station);
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        check_references(&stations, &mut errors);
        resolve_segments(&mut stations, &mut errors);
        warn_unreachable(&stations);
        if !errors.is_empty() {
            return Err(errors);
        }

        let transporters = model
            .transporters
            .iter()
            .map(|t| {
                let by_name = |name: &str| stations.iter().find(|s| s.name == name).map(|s| s.id);
                let mut homes = Vec::new();
                for (name, count) in &t.homes {
                    match by_name(name) {
                        Some(id) => homes.push((id, *count)),
                        None => errors.push(BuildError::Model(format!(
                            "transporter `{}`: unknown home station `{name}`",
                            t.name
                        ))),
                    }
                }
                let mut travel_times = BTreeMap::new();
                for tt in &t.travel_times {
                    match (by_name(&tt.from), by_name(&tt.to)) {
                        (Some(a), Some(b)) => {
                            travel_times.insert((a, b), tt.seconds);
                        }
                        _ => errors.push(BuildError::Model(format!(
                            "transporter `{}`: travel time between unknown stations `{}` and `{}`",
                            t.name, tt.from, tt.to
                        ))),
                    }
                }
                TransporterType {
                    name: t.name.clone(),
                    capacity: t.capacity,
                    homes,
                    travel_times,
                    default_travel_time: t.default_travel_time,
                    load_time: t.load_time,
                    unload_time: t.unload_time,
                }
            })
            .collect();
        if !errors.is_empty() {
            return Err(errors);
        }

        let mut network = Network {
            name: model.name.clone(),
            model_ids: stations.iter().map(|s| (s.model_id, s.id)).collect(),
            stations,
            variables: model.variables.iter().map(|v| v.name.clone()).collect(),
            variable_initial: model.variables.iter().map(|v| v.initial).collect(),
            client_types: model.client_types.clone(),
            resources: model
                .resources
                .iter()
                .map(|r| ResourceDef {
                    name: r.name.clone(),
                    capacity: r.capacity.clone(),
                    relocation_time: r.relocation_time,
                    cost_per_hour_busy: r.cost_per_hour_busy,
                    cost_per_hour_idle: r.cost_per_hour_idle,
                    cost_per_seize: r.cost_per_seize,
                })
                .collect(),
            signals: model.signals.clone(),
            counters: model.counters.clone(),
            tanks: model
                .tanks
                .iter()
                .map(|t| TankDef {
                    name: t.name.clone(),
                    capacity: t.capacity,
                    initial: t.initial,
                    valves: t.valves.clone(),
                })
                .collect(),
            analogs: model
                .analogs
                .iter()
                .map(|a| AnalogDef {
                    name: a.name.clone(),
                    initial: a.initial,
                    rate: a.rate,
                    min: a.min,
                    max: a.max,
                })
                .collect(),
            transporters,
            termination,
            ..Network::default()
        };
        network.index_roles();
        debug!(
            model = %network.name,
            stations = network.len(),
            sources = network.sources.len(),
            "model compiled"
        );
        Ok(network)
    }
}

/// Compile `model` with no decision scripts registered.
pub fn compile(model: &ModelDescription, evaluator: &dyn Evaluator) -> Result<Network, Vec<BuildError>> {
    Compiler::new(evaluator).compile(model)
}

/// Validate one node. See [`Compiler::test_node`].
pub fn test_node(node: &NodeDescription, model: &ModelDescription, evaluator: &dyn Evaluator) -> BuildStatus {
    Compiler::new(evaluator).test_node(node, model)
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Checks on model entities that do not belong to a single node.
fn check_model(model: &ModelDescription) -> Vec<BuildError> {
    let mut errors = Vec::new();
    let mut model_error = |m: String| errors.push(BuildError::Model(m));

    let mut ids = BTreeSet::new();
    for n in &model.nodes {
        if !ids.insert(n.id) {
            model_error(format!("node id {} is used twice", n.id));
        }
    }
    let mut names = BTreeSet::new();
    for n in model.nodes.iter().filter(|n| !n.name.is_empty()) {
        if !names.insert(n.name.as_str()) {
            model_error(format!("station name `{}` is used twice", n.name));
        }
    }
    for r in &model.resources {
        match &r.capacity {
            Capacity::Schedule { interval, values } => {
                if values.is_empty() || !(*interval > 0.0) {
                    model_error(format!(
                        "resource `{}`: a capacity schedule needs values and a positive interval",
                        r.name
                    ));
                }
            }
            Capacity::Fixed { .. } | Capacity::Infinite => {}
        }
        if r.relocation_time < 0.0 {
            model_error(format!("resource `{}`: negative relocation time", r.name));
        }
    }
    for t in &model.tanks {
        if !(t.capacity > 0.0) || t.initial < 0.0 || t.initial > t.capacity {
            model_error(format!(
                "tank `{}`: initial value {} outside 0..={}",
                t.name, t.initial, t.capacity
            ));
        }
        if t.valves.iter().any(|v| *v < 0.0) {
            model_error(format!("tank `{}`: negative valve rate", t.name));
        }
    }
    for a in &model.analogs {
        if let (Some(lo), Some(hi)) = (a.min, a.max) {
            if lo > hi {
                model_error(format!("analog value `{}`: minimum above maximum", a.name));
            }
        }
    }
    for t in &model.transporters {
        if t.capacity == 0 {
            model_error(format!("transporter `{}`: capacity must be at least 1", t.name));
        }
        if t.homes.iter().all(|(_, n)| *n == 0) {
            model_error(format!("transporter `{}` has no vehicles", t.name));
        }
    }
    errors
}

/// Checks that need the resolved station list.
fn check_references(stations: &[Station], errors: &mut Vec<BuildError>) {
    let kind_of = |id: StationId| stations.get(id.index()).map(|s| &s.kind);
    for s in stations {
        let mut fail = |message: String| {
            errors.push(BuildError::Station {
                station: s.model_id,
                message,
            })
        };
        for succ in s.kind.successors() {
            if !kind_of(succ).is_some_and(StationKind::accepts_clients) {
                fail(format!("edge to station {} which cannot take clients", succ.0));
            }
        }
        if let Some(parent) = s.parent {
            if !matches!(kind_of(parent), Some(StationKind::Group(_))) {
                fail("parent is not a group".to_owned());
            }
        }
        match &s.kind {
            StationKind::Release(r) if !matches!(kind_of(r.seize), Some(StationKind::Seize(_))) => {
                fail("release refers to a station that is not a seize station".to_owned());
            }
            StationKind::PickUp(p)
                if !matches!(kind_of(p.queue_station), Some(StationKind::Process(_) | StationKind::Hold(_))) =>
            {
                fail("pick up queue is not a process or hold station".to_owned());
            }
            StationKind::TransportSource(t) => {
                for d in t.successors() {
                    if !matches!(kind_of(d), Some(StationKind::TransportDestination(_))) {
                        fail("transport destination is not a transport destination station".to_owned());
                    }
                }
            }
            _ => {}
        }
    }

    // Nested groups must not contain each other.
    for s in stations {
        let mut parent = s.parent;
        let mut depth = 0;
        while let Some(p) = parent {
            depth += 1;
            if depth > stations.len() {
                errors.push(BuildError::Station {
                    station: s.model_id,
                    message: "groups are nested in a cycle".to_owned(),
                });
                break;
            }
            parent = stations.get(p.index()).and_then(|ps| ps.parent);
        }
    }
}

/// Fill match inputs and pull-barrier segments.
fn resolve_segments(stations: &mut [Station], errors: &mut Vec<BuildError>) {
    let mut predecessors: BTreeMap<StationId, Vec<StationId>> = BTreeMap::new();
    for s in stations.iter() {
        for succ in s.kind.successors() {
            let list = predecessors.entry(succ).or_default();
            if !list.contains(&s.id) {
                list.push(s.id);
            }
        }
    }

    let mut segments: BTreeMap<StationId, Vec<StationId>> = BTreeMap::new();
    for s in stations.iter() {
        if let StationKind::BarrierPull(b) = &s.kind {
            let monitored = match b.checkpoint {
                None => vec![b.next],
                Some(checkpoint) => barrier::segment(stations, b.next, checkpoint).unwrap_or_else(|| {
                    warn!(
                        station = s.model_id,
                        "checkpoint not within {} hops; only the next station is monitored",
                        barrier::MAX_SEGMENT_HOPS
                    );
                    vec![b.next]
                }),
            };
            segments.insert(s.id, monitored);
        }
    }

    for s in stations.iter_mut() {
        match &mut s.kind {
            StationKind::Match(m) => {
                m.incoming = predecessors.get(&s.id).cloned().unwrap_or_default();
                if m.incoming.len() < 2 {
                    errors.push(BuildError::Station {
                        station: s.model_id,
                        message: "match needs at least two incoming edges".to_owned(),
                    });
                }
            }
            StationKind::BarrierPull(b) => {
                b.monitored = segments.remove(&s.id).unwrap_or_default();
            }
            _ => {}
        }
    }
}

/// Log client stations no source can reach.
fn warn_unreachable(stations: &[Station]) {
    let mut seen = BTreeSet::new();
    let mut frontier: VecDeque<StationId> = stations
        .iter()
        .filter(|s| matches!(s.kind, StationKind::Source(_)))
        .map(|s| s.id)
        .collect();
    while let Some(id) = frontier.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(s) = stations.get(id.index()) {
            frontier.extend(s.kind.successors());
        }
    }
    for s in stations {
        if s.kind.accepts_clients() && !seen.contains(&s.id) {
            warn!(station = s.model_id, name = %s.name, "station is not reachable from any source");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DelayDescription, SourceDescription};
    use crate::test_utils::LiteralEvaluator;

    fn source(next: i64) -> NodeKind {
        NodeKind::Source(SourceDescription {
            client_type: "part".into(),
            interarrival: TimeSpec::Constant(1.0),
            batch: 1,
            first_arrival: None,
            limit: Some(3),
            next,
        })
    }

    fn delay(next: i64) -> NodeKind {
        NodeKind::Delay(DelayDescription {
            time: TimeSpec::Constant(2.0).into(),
            bucket: Default::default(),
            next,
        })
    }

    fn base() -> ModelDescription {
        let mut m = ModelDescription::new("m");
        m.client_types = vec!["part".into()];
        m
    }

    #[test]
    fn vertices_are_removed_and_ids_remapped() {
        let mut m = base();
        m.node(10, "Src", source(20))
            .node(20, "", NodeKind::Vertex { next: 30 })
            .node(30, "Wait", delay(40))
            .node(40, "Exit", NodeKind::Dispose { stop_simulation: false });
        let net = compile(&m, &LiteralEvaluator).unwrap();
        assert_eq!(net.len(), 3);
        let src = net.by_model_id(10).unwrap();
        let wait = net.by_model_id(30).unwrap();
        assert_eq!(net.station(src).unwrap().kind.successors(), vec![wait]);
        assert_eq!(net.by_model_id(20), None);
        assert_eq!(net.sources, vec![src]);
    }

    #[test]
    fn all_errors_are_collected() {
        let mut m = base();
        m.node(1, "Src", source(99))
            .node(2, "Wait", NodeKind::Delay(DelayDescription {
                time: TimeSpec::Formula { formula: "(".into() }.into(),
                bucket: Default::default(),
                next: 3,
            }))
            .node(3, "Exit", NodeKind::Dispose { stop_simulation: false });
        let errors = compile(&m, &LiteralEvaluator).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].station(), Some(1));
        assert!(matches!(errors[1], BuildError::Formula { station: 2, .. }));
    }

    #[test]
    fn vertex_cycle_is_rejected() {
        let mut m = base();
        m.node(1, "Src", source(2))
            .node(2, "", NodeKind::Vertex { next: 3 })
            .node(3, "", NodeKind::Vertex { next: 2 });
        let errors = compile(&m, &LiteralEvaluator).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("cycle")));
    }

    #[test]
    fn test_node_checks_without_compiling() {
        let mut m = base();
        m.node(1, "Src", source(2)).node(2, "Exit", NodeKind::Dispose { stop_simulation: false });
        let good = m.nodes[0].clone();
        assert!(test_node(&good, &m, &LiteralEvaluator).is_ok());

        let mut bad = good.clone();
        bad.kind = source(7);
        let BuildStatus::Errors(errors) = test_node(&bad, &m, &LiteralEvaluator) else {
            panic!("expected errors");
        };
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn edge_into_sensor_is_rejected() {
        let mut m = base();
        m.signals = vec!["full".into()];
        m.tanks = vec![crate::model::TankDescription {
            name: "T".into(),
            capacity: 10.0,
            initial: 0.0,
            valves: vec![1.0],
        }];
        m.node(1, "Src", source(2)).node(
            2,
            "Gauge",
            NodeKind::Sensor(crate::model::SensorDescription {
                value: crate::model::ValueRefDescription::Tank("T".into()),
                threshold: 5.0,
                direction: crate::model::CrossingDirection::Up,
                signal: "full".into(),
            }),
        );
        let errors = compile(&m, &LiteralEvaluator).unwrap_err();
        assert!(errors[0].to_string().contains("cannot take clients"));
    }
}
