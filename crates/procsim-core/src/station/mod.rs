//! Compiled stations.
//!
//! A [`Station`] is the immutable, compiled form of one network node: its
//! dense id, enclosing group, and a [`StationKind`] carrying the
//! variant-specific parameters. Mutable per-replication data lives in a
//! [`StationState`] held by the replication's state arena, never on the
//! station itself.

pub mod assign;
pub mod barrier;
pub mod batch;
pub mod capability;
pub mod decide;
pub mod delay;
pub(crate) mod dispatch;
pub mod dispose;
pub mod hold;
pub mod pickup;
pub mod process;
pub mod seize;
pub mod source;
pub mod tank;
pub mod teleport;
pub mod transport;

use crate::error::SimError;
use crate::id::{ClientKey, StationId};
use crate::replication::Replication;

pub use assign::AssignStation;
pub use barrier::{BarrierPullStation, SignalBarrierStation};
pub use batch::{BatchStation, MatchStation, SeparateStation};
pub use capability::{
    FreeResourcesListener, PickUpQueue, SignalListener, StateChangeListener, StationBehavior,
};
pub use decide::{DecideStation, ScriptBridge, ScriptContext, ScriptOutcome};
pub use delay::DelayStation;
pub use dispose::DisposeStation;
pub use hold::HoldStation;
pub use pickup::PickUpStation;
pub use process::ProcessStation;
pub use seize::{ReleaseStation, SeizeStation};
pub use source::SourceStation;
pub use tank::{AnalogAssignStation, SensorStation, TankFlowStation};
pub use teleport::{DuplicateStation, TeleportStation};
pub use transport::{TransportDestinationStation, TransportSourceStation};

// ---------------------------------------------------------------------------
// Station
// ---------------------------------------------------------------------------

/// One compiled network node.
#[derive(Debug, Clone)]
pub struct Station {
    pub id: StationId,
    /// Id of the node in the user model.
    pub model_id: i64,
    pub name: String,
    /// Enclosing group station.
    pub parent: Option<StationId>,
    pub kind: StationKind,
}

#[derive(Debug, Clone)]
pub enum StationKind {
    Group(GroupStation),
    Source(SourceStation),
    Dispose(DisposeStation),
    Delay(DelayStation),
    Process(ProcessStation),
    Seize(SeizeStation),
    Release(ReleaseStation),
    Hold(HoldStation),
    SignalBarrier(SignalBarrierStation),
    BarrierPull(BarrierPullStation),
    PickUp(PickUpStation),
    Decide(DecideStation),
    Teleport(TeleportStation),
    Duplicate(DuplicateStation),
    Assign(AssignStation),
    Batch(BatchStation),
    Separate(SeparateStation),
    Match(MatchStation),
    TransportSource(TransportSourceStation),
    TransportDestination(TransportDestinationStation),
    TankFlow(TankFlowStation),
    Sensor(SensorStation),
    AnalogAssign(AnalogAssignStation),
}

/// Where a leaving client goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Forward {
    To(StationId),
    /// Several clients at once (duplicates, batch members). All clients are
    /// moved before any arrival is processed.
    Many(Vec<(ClientKey, StationId)>),
    /// The client no longer exists.
    Consumed,
}

/// Edges and named references of a station.
pub(crate) trait Links {
    /// Stations clients are forwarded to.
    fn successors(&self) -> Vec<StationId>;

    /// Every station reference, for id resolution during compilation.
    fn links_mut(&mut self) -> Vec<&mut StationId>;
}

macro_rules! for_each_kind {
    ($kind:expr, $s:ident => $body:expr) => {
        match $kind {
            StationKind::Group($s) => $body,
            StationKind::Source($s) => $body,
            StationKind::Dispose($s) => $body,
            StationKind::Delay($s) => $body,
            StationKind::Process($s) => $body,
            StationKind::Seize($s) => $body,
            StationKind::Release($s) => $body,
            StationKind::Hold($s) => $body,
            StationKind::SignalBarrier($s) => $body,
            StationKind::BarrierPull($s) => $body,
            StationKind::PickUp($s) => $body,
            StationKind::Decide($s) => $body,
            StationKind::Teleport($s) => $body,
            StationKind::Duplicate($s) => $body,
            StationKind::Assign($s) => $body,
            StationKind::Batch($s) => $body,
            StationKind::Separate($s) => $body,
            StationKind::Match($s) => $body,
            StationKind::TransportSource($s) => $body,
            StationKind::TransportDestination($s) => $body,
            StationKind::TankFlow($s) => $body,
            StationKind::Sensor($s) => $body,
            StationKind::AnalogAssign($s) => $body,
        }
    };
}
pub(crate) use for_each_kind;

impl StationKind {
    pub fn successors(&self) -> Vec<StationId> {
        for_each_kind!(self, s => s.successors())
    }

    pub(crate) fn links_mut(&mut self) -> Vec<&mut StationId> {
        for_each_kind!(self, s => s.links_mut())
    }

    /// Whether clients may be routed here.
    pub fn accepts_clients(&self) -> bool {
        !matches!(self, StationKind::Group(_) | StationKind::Sensor(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            StationKind::Group(_) => "group",
            StationKind::Source(_) => "source",
            StationKind::Dispose(_) => "dispose",
            StationKind::Delay(_) => "delay",
            StationKind::Process(_) => "process",
            StationKind::Seize(_) => "seize",
            StationKind::Release(_) => "release",
            StationKind::Hold(_) => "hold",
            StationKind::SignalBarrier(_) => "signal_barrier",
            StationKind::BarrierPull(_) => "barrier_pull",
            StationKind::PickUp(_) => "pick_up",
            StationKind::Decide(_) => "decide",
            StationKind::Teleport(_) => "teleport",
            StationKind::Duplicate(_) => "duplicate",
            StationKind::Assign(_) => "assign",
            StationKind::Batch(_) => "batch",
            StationKind::Separate(_) => "separate",
            StationKind::Match(_) => "match",
            StationKind::TransportSource(_) => "transport_source",
            StationKind::TransportDestination(_) => "transport_destination",
            StationKind::TankFlow(_) => "tank_flow",
            StationKind::Sensor(_) => "sensor",
            StationKind::AnalogAssign(_) => "analog_assign",
        }
    }

    pub(crate) fn is_state_listener(&self) -> bool {
        matches!(
            self,
            StationKind::Hold(_)
                | StationKind::BarrierPull(_)
                | StationKind::PickUp(_)
                | StationKind::Sensor(_)
        )
    }

    pub(crate) fn is_free_resources_listener(&self) -> bool {
        matches!(
            self,
            StationKind::Process(_) | StationKind::Seize(_) | StationKind::TransportSource(_)
        )
    }

    pub(crate) fn is_signal_listener(&self) -> bool {
        matches!(self, StationKind::SignalBarrier(_))
    }
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// Per-replication mutable data of one station.
#[derive(Debug)]
pub enum StationState {
    Stateless,
    Source(source::SourceState),
    Process(process::ProcessState),
    Seize(seize::SeizeState),
    Hold(hold::HoldState),
    SignalBarrier(barrier::SignalBarrierState),
    BarrierPull(barrier::BarrierPullState),
    PickUp(pickup::PickUpState),
    Decide(decide::DecideState),
    Batch(batch::BatchState),
    Match(batch::MatchState),
    TransportSource(transport::TransportSourceState),
    Sensor(tank::SensorState),
}

/// Conversion between a concrete state type and the arena's [`StationState`].
pub trait StateSlot: Sized {
    fn into_slot(self) -> StationState;
    fn from_slot(slot: StationState) -> Option<Self>;
}

impl StateSlot for () {
    fn into_slot(self) -> StationState {
        StationState::Stateless
    }

    fn from_slot(slot: StationState) -> Option<Self> {
        matches!(slot, StationState::Stateless).then_some(())
    }
}

macro_rules! state_slot {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl StateSlot for $ty {
                fn into_slot(self) -> StationState {
                    StationState::$variant(self)
                }

                fn from_slot(slot: StationState) -> Option<Self> {
                    match slot {
                        StationState::$variant(s) => Some(s),
                        _ => None,
                    }
                }
            }
        )*
    };
}

state_slot! {
    Source => source::SourceState,
    Process => process::ProcessState,
    Seize => seize::SeizeState,
    Hold => hold::HoldState,
    SignalBarrier => barrier::SignalBarrierState,
    BarrierPull => barrier::BarrierPullState,
    PickUp => pickup::PickUpState,
    Decide => decide::DecideState,
    Batch => batch::BatchState,
    Match => batch::MatchState,
    TransportSource => transport::TransportSourceState,
    Sensor => tank::SensorState,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// Sub-network container. Clients never visit it directly.
#[derive(Debug, Clone, Default)]
pub struct GroupStation;

impl Links for GroupStation {
    fn successors(&self) -> Vec<StationId> {
        Vec::new()
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        Vec::new()
    }
}

impl StationBehavior for GroupStation {
    type State = ();

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) {}

    fn arrival(&self, _: &mut Replication<'_>, _: &mut (), at: StationId, _: ClientKey) -> Result<(), SimError> {
        Err(SimError::NotAClientStation(at))
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut (), at: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Err(SimError::NotAClientStation(at))
    }
}
