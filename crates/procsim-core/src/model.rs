//! User-authored model description.
//!
//! This is the editable form of a process model: nodes reference each other
//! by integer model id and named entities (resources, client types, signals,
//! tanks) by name. [`compile`](crate::compile) validates it and turns it into
//! an immutable [`Network`](crate::network::Network).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::client::TimeBucket;
use crate::distribution::Distribution;
use crate::resource::Capacity;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelDescription {
    pub name: String,
    pub client_types: Vec<String>,
    pub variables: Vec<VariableDescription>,
    pub resources: Vec<ResourceDescription>,
    pub signals: Vec<String>,
    pub counters: Vec<String>,
    pub tanks: Vec<TankDescription>,
    pub analogs: Vec<AnalogDescription>,
    pub transporters: Vec<TransporterDescription>,
    /// Stop a replication as soon as this formula becomes non-zero.
    pub termination_condition: Option<String>,
    pub nodes: Vec<NodeDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescription {
    pub name: String,
    #[serde(default)]
    pub initial: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescription {
    pub name: String,
    pub capacity: Capacity,
    #[serde(default)]
    pub relocation_time: f64,
    #[serde(default)]
    pub cost_per_hour_busy: f64,
    #[serde(default)]
    pub cost_per_hour_idle: f64,
    #[serde(default)]
    pub cost_per_seize: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankDescription {
    pub name: String,
    pub capacity: f64,
    #[serde(default)]
    pub initial: f64,
    /// Maximum flow rate per valve, units per second.
    pub valves: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogDescription {
    pub name: String,
    #[serde(default)]
    pub initial: f64,
    #[serde(default)]
    pub rate: f64,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransporterDescription {
    pub name: String,
    pub capacity: u32,
    /// Station name and number of vehicles parked there initially.
    pub homes: Vec<(String, u32)>,
    #[serde(default)]
    pub travel_times: Vec<TravelTime>,
    #[serde(default)]
    pub default_travel_time: f64,
    #[serde(default)]
    pub load_time: f64,
    #[serde(default)]
    pub unload_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelTime {
    pub from: String,
    pub to: String,
    pub seconds: f64,
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A duration in seconds: constant, distribution or formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    Constant(f64),
    Distribution(Distribution),
    Formula { formula: String },
}

impl Default for TimeSpec {
    fn default() -> Self {
        TimeSpec::Constant(0.0)
    }
}

/// A duration that may differ per client type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypedTimeSpec {
    pub default: Option<TimeSpec>,
    pub by_type: BTreeMap<String, TimeSpec>,
}

impl From<TimeSpec> for TypedTimeSpec {
    fn from(spec: TimeSpec) -> Self {
        Self {
            default: Some(spec),
            by_type: BTreeMap::new(),
        }
    }
}

/// A formula that may differ per client type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypedFormulaSpec {
    pub default: Option<String>,
    pub by_type: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUse {
    pub resource: String,
    #[serde(default = "one")]
    pub units: u32,
}

fn one() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    /// Enclosing group node.
    #[serde(default)]
    pub parent: Option<i64>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Sub-network container; clients at member stations count here too.
    Group,
    /// Pass-through junction of edges. Removed during compilation.
    Vertex { next: i64 },
    Source(SourceDescription),
    Dispose {
        #[serde(default)]
        stop_simulation: bool,
    },
    Delay(DelayDescription),
    Process(ProcessDescription),
    Seize(SeizeDescription),
    Release(ReleaseDescription),
    Hold(HoldDescription),
    SignalBarrier(SignalBarrierDescription),
    BarrierPull(BarrierPullDescription),
    PickUp(PickUpDescription),
    Decide(DecideDescription),
    Teleport { destination: String },
    Duplicate(DuplicateDescription),
    Assign(AssignDescription),
    Batch(BatchDescription),
    Separate { next: i64 },
    Match(MatchDescription),
    TransportSource(TransportSourceDescription),
    TransportDestination { next: i64 },
    TankFlow(TankFlowDescription),
    Sensor(SensorDescription),
    AnalogAssign(AnalogAssignDescription),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Group => "group",
            NodeKind::Vertex { .. } => "vertex",
            NodeKind::Source(_) => "source",
            NodeKind::Dispose { .. } => "dispose",
            NodeKind::Delay(_) => "delay",
            NodeKind::Process(_) => "process",
            NodeKind::Seize(_) => "seize",
            NodeKind::Release(_) => "release",
            NodeKind::Hold(_) => "hold",
            NodeKind::SignalBarrier(_) => "signal_barrier",
            NodeKind::BarrierPull(_) => "barrier_pull",
            NodeKind::PickUp(_) => "pick_up",
            NodeKind::Decide(_) => "decide",
            NodeKind::Teleport { .. } => "teleport",
            NodeKind::Duplicate(_) => "duplicate",
            NodeKind::Assign(_) => "assign",
            NodeKind::Batch(_) => "batch",
            NodeKind::Separate { .. } => "separate",
            NodeKind::Match(_) => "match",
            NodeKind::TransportSource(_) => "transport_source",
            NodeKind::TransportDestination { .. } => "transport_destination",
            NodeKind::TankFlow(_) => "tank_flow",
            NodeKind::Sensor(_) => "sensor",
            NodeKind::AnalogAssign(_) => "analog_assign",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescription {
    pub client_type: String,
    pub interarrival: TimeSpec,
    #[serde(default = "one")]
    pub batch: u32,
    /// Time of the first arrival in seconds. Defaults to one interarrival
    /// time after the start.
    #[serde(default)]
    pub first_arrival: Option<f64>,
    /// Stop after this many clients.
    #[serde(default)]
    pub limit: Option<u64>,
    pub next: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayDescription {
    pub time: TypedTimeSpec,
    #[serde(default)]
    pub bucket: TimeBucket,
    pub next: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessDescription {
    /// Alternative resource sets; the first one that can be locked is used.
    pub resources: Vec<Vec<ResourceUse>>,
    pub process_time: TypedTimeSpec,
    /// Applied when the client type differs from the previously served one.
    pub setup_time: Option<TypedTimeSpec>,
    /// Resources stay locked this long after the client left.
    pub post_process_time: Option<TypedTimeSpec>,
    /// Score of a waiting client; higher is served first. Defaults to the
    /// waiting time.
    pub priority: TypedFormulaSpec,
    pub batch_min: Option<u32>,
    pub batch_max: Option<u32>,
    /// Waiting tolerance: clients give up after this long.
    pub cancel_after: Option<TypedTimeSpec>,
    pub next: i64,
    pub cancel_next: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeizeDescription {
    pub resources: Vec<ResourceUse>,
    #[serde(default)]
    pub priority: TypedFormulaSpec,
    pub next: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseDescription {
    /// Name of the seize station whose units are returned.
    pub seize: String,
    #[serde(default)]
    pub delay: Option<TypedTimeSpec>,
    pub next: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldDescription {
    pub condition: String,
    /// Evaluate the condition per client instead of once globally.
    #[serde(default)]
    pub client_based: bool,
    #[serde(default)]
    pub priority: Option<String>,
    /// Seconds after which a client passes regardless of the condition.
    #[serde(default)]
    pub max_wait: Option<f64>,
    /// Also re-check periodically, for conditions that depend on time only.
    #[serde(default)]
    pub timed_checks: bool,
    pub next: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBarrierDescription {
    pub signal: String,
    /// Clients released per signal; all waiting clients if absent.
    #[serde(default)]
    pub release_count: Option<u32>,
    /// Clients allowed to pass before the first signal.
    #[serde(default)]
    pub initial_passes: u32,
    pub next: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierPullDescription {
    /// Last station of the controlled segment. Only `next` is monitored if
    /// absent.
    #[serde(default)]
    pub checkpoint: Option<String>,
    pub max_clients: u32,
    pub next: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickUpDescription {
    /// Process or hold station whose queue clients are taken from.
    pub queue: String,
    #[serde(default = "one")]
    pub count: u32,
    pub next: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecideMode {
    Chance,
    Condition,
    ClientType,
    KeyValue,
    Sequence,
    Script,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecideDescription {
    pub mode: DecideMode,
    pub options: Vec<DecideOptionDescription>,
    /// Client text key for `key_value` mode.
    #[serde(default)]
    pub key: Option<String>,
    /// Registered script name for `script` mode.
    #[serde(default)]
    pub script: Option<String>,
}

/// One outgoing branch of a decide station. Which fields matter depends on
/// the mode; the last option of a condition, client type or key value decide
/// is the fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecideOptionDescription {
    pub next: i64,
    pub rate: Option<String>,
    pub condition: Option<String>,
    pub client_types: Vec<String>,
    pub value: Option<String>,
    pub multiplicity: Option<u32>,
    pub new_client_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateDescription {
    pub destinations: Vec<String>,
    #[serde(default = "one")]
    pub copies: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignDescription {
    pub actions: Vec<AssignActionDescription>,
    pub next: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AssignActionDescription {
    ClientType { client_type: String },
    Variable { variable: String, formula: String },
    Number { slot: usize, formula: String },
    Text { key: String, value: String },
    Counter {
        counter: String,
        #[serde(default)]
        increment: Option<String>,
    },
    Signal { signal: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Members leave together but stay individual clients.
    #[default]
    Collect,
    /// Members ride inside a carrier until a separate station.
    Temporary,
    /// Members are merged into a new client.
    Permanent,
}

/// How member values are combined into the carrier of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    #[default]
    Off,
    Min,
    Max,
    Mean,
    Sum,
    Multiply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDescription {
    #[serde(default)]
    pub mode: BatchMode,
    pub min: String,
    pub max: String,
    #[serde(default)]
    pub new_client_type: Option<String>,
    #[serde(default)]
    pub transfer_times: TransferMode,
    #[serde(default)]
    pub transfer_numbers: TransferMode,
    pub next: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum MatchProperty {
    None,
    Number { slot: usize },
    Text { key: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDescription {
    #[serde(default)]
    pub mode: BatchMode,
    #[serde(default = "match_none")]
    pub property: MatchProperty,
    #[serde(default)]
    pub new_client_type: Option<String>,
    #[serde(default)]
    pub transfer_times: TransferMode,
    #[serde(default)]
    pub transfer_numbers: TransferMode,
    pub next: i64,
}

fn match_none() -> MatchProperty {
    MatchProperty::None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSourceDescription {
    pub transporter: String,
    /// Destination station name for all clients.
    #[serde(default)]
    pub destination: Option<String>,
    /// Destination station name per client type; overrides `destination`.
    #[serde(default)]
    pub destination_by_type: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: TypedFormulaSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEndpointDescription {
    External,
    Tank { tank: String, valve: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum FlowStopDescription {
    Time { seconds: f64 },
    Quantity { amount: f64 },
    Signal { signal: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankFlowDescription {
    pub source: FlowEndpointDescription,
    pub target: FlowEndpointDescription,
    pub stop: FlowStopDescription,
    pub next: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum ValueRefDescription {
    Tank(String),
    Analog(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingDirection {
    Up,
    Down,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescription {
    pub value: ValueRefDescription,
    pub threshold: f64,
    pub direction: CrossingDirection,
    pub signal: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalogAssignMode {
    Value,
    Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogAssignDescription {
    pub analog: String,
    pub mode: AnalogAssignMode,
    pub formula: String,
    pub next: i64,
}

// ---------------------------------------------------------------------------
// Builder helpers
// ---------------------------------------------------------------------------

impl ModelDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Append a node.
    pub fn node(&mut self, id: i64, name: impl Into<String>, kind: NodeKind) -> &mut Self {
        self.nodes.push(NodeDescription {
            id,
            name: name.into(),
            parent: None,
            kind,
        });
        self
    }

    pub fn find_node(&self, id: i64) -> Option<&NodeDescription> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
