//! Stations bridging clients and continuous values.

use crate::compile::BuildContext;
use crate::continuous::{FlowEndpoint, FlowStop, ValueRef};
use crate::error::SimError;
use crate::expr::Formula;
use crate::id::{AnalogId, ClientKey, SignalId, StationId};
use crate::model::{
    AnalogAssignDescription, AnalogAssignMode, CrossingDirection, FlowEndpointDescription, FlowStopDescription,
    SensorDescription, TankFlowDescription, ValueRefDescription,
};
use crate::replication::Replication;
use crate::sim::to_sim_time;

use super::{Forward, Links, StateChangeListener, StationBehavior};

fn endpoint(desc: &FlowEndpointDescription, cx: &mut BuildContext<'_>) -> FlowEndpoint {
    match desc {
        FlowEndpointDescription::External => FlowEndpoint::External,
        FlowEndpointDescription::Tank { tank, valve } => FlowEndpoint::Tank {
            tank: cx.tank(tank),
            valve: *valve,
        },
    }
}

// ---------------------------------------------------------------------------
// Tank flow
// ---------------------------------------------------------------------------

/// Starts a flow when a client arrives; the client leaves when the flow ends.
#[derive(Debug, Clone)]
pub struct TankFlowStation {
    pub source: FlowEndpoint,
    pub target: FlowEndpoint,
    pub stop: FlowStop,
    pub next: StationId,
}

impl TankFlowStation {
    pub(crate) fn build(desc: &TankFlowDescription, cx: &mut BuildContext<'_>) -> Self {
        let source = endpoint(&desc.source, cx);
        let target = endpoint(&desc.target, cx);
        if source == FlowEndpoint::External && target == FlowEndpoint::External {
            cx.error("a flow needs at least one tank");
        }
        let stop = match &desc.stop {
            FlowStopDescription::Time { seconds } => FlowStop::Time(to_sim_time(*seconds)),
            FlowStopDescription::Quantity { amount } => {
                if *amount <= 0.0 {
                    cx.error("flow quantity must be positive");
                }
                FlowStop::Quantity(*amount)
            }
            FlowStopDescription::Signal { signal } => FlowStop::Signal(cx.signal(signal)),
        };
        Self {
            source,
            target,
            stop,
            next: cx.next(desc.next),
        }
    }
}

impl Links for TankFlowStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.next]
    }
}

impl StationBehavior for TankFlowStation {
    type State = ();

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) {}

    fn arrival(&self, rep: &mut Replication<'_>, _: &mut (), at: StationId, client: ClientKey) -> Result<(), SimError> {
        let now = rep.now();
        rep.continuous
            .start_flow(now, at, client, self.source, self.target, self.stop);
        rep.notify_continuous();
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut (), _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}

// ---------------------------------------------------------------------------
// Sensor
// ---------------------------------------------------------------------------

/// Fires a signal when a continuous value crosses a threshold.
#[derive(Debug, Clone)]
pub struct SensorStation {
    pub value: ValueRef,
    pub threshold: f64,
    pub direction: CrossingDirection,
    pub signal: SignalId,
}

#[derive(Debug, Default)]
pub struct SensorState {
    last: f64,
    pub crossings: u64,
}

impl SensorStation {
    pub(crate) fn build(desc: &SensorDescription, cx: &mut BuildContext<'_>) -> Self {
        let value = match &desc.value {
            ValueRefDescription::Tank(name) => ValueRef::Tank(cx.tank(name)),
            ValueRefDescription::Analog(name) => ValueRef::Analog(cx.analog(name)),
        };
        Self {
            value,
            threshold: desc.threshold,
            direction: desc.direction,
            signal: cx.signal(&desc.signal),
        }
    }

    fn crossed(&self, last: f64, current: f64) -> bool {
        let up = last < self.threshold && current >= self.threshold;
        let down = last > self.threshold && current <= self.threshold;
        match self.direction {
            CrossingDirection::Up => up,
            CrossingDirection::Down => down,
            CrossingDirection::Both => up || down,
        }
    }
}

impl Links for SensorStation {
    fn successors(&self) -> Vec<StationId> {
        Vec::new()
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        Vec::new()
    }
}

impl StationBehavior for SensorStation {
    type State = SensorState;

    fn init_state(&self, rep: &mut Replication<'_>, _: StationId) -> SensorState {
        let now = rep.now();
        SensorState {
            last: rep.continuous.value(self.value, now).unwrap_or(0.0),
            crossings: 0,
        }
    }

    fn arrival(&self, _: &mut Replication<'_>, _: &mut SensorState, at: StationId, _: ClientKey) -> Result<(), SimError> {
        Err(SimError::NotAClientStation(at))
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut SensorState, at: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Err(SimError::NotAClientStation(at))
    }
}

impl StateChangeListener for SensorStation {
    fn interested(&self, _: &SensorState) -> bool {
        true
    }

    fn recheck(&self, rep: &mut Replication<'_>, state: &mut SensorState, _: StationId) -> Result<bool, SimError> {
        let now = rep.now();
        let Some(current) = rep.continuous.value(self.value, now) else {
            return Ok(false);
        };
        if self.crossed(state.last, current) {
            state.crossings += 1;
            rep.fire_signal(self.signal);
        }
        state.last = current;
        Ok(false)
    }
}

// ---------------------------------------------------------------------------
// Analog assign
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AnalogAssignStation {
    pub analog: AnalogId,
    pub mode: AnalogAssignMode,
    pub formula: Formula,
    pub next: StationId,
}

impl AnalogAssignStation {
    pub(crate) fn build(desc: &AnalogAssignDescription, cx: &mut BuildContext<'_>) -> Self {
        Self {
            analog: cx.analog(&desc.analog),
            mode: desc.mode,
            formula: cx.formula(&desc.formula),
            next: cx.next(desc.next),
        }
    }
}

impl Links for AnalogAssignStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.next]
    }
}

impl StationBehavior for AnalogAssignStation {
    type State = ();

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) {}

    fn arrival(&self, rep: &mut Replication<'_>, _: &mut (), at: StationId, client: ClientKey) -> Result<(), SimError> {
        let value = rep.calc(&self.formula, Some(client), at);
        let now = rep.now();
        match self.mode {
            AnalogAssignMode::Value => rep.continuous.set_analog_value(now, self.analog, value),
            AnalogAssignMode::Rate => rep.continuous.set_analog_rate(now, self.analog, value),
        }
        rep.notify_continuous();
        rep.notify_state_change();
        rep.release_to(at, client, self.next);
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut (), _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(direction: CrossingDirection) -> SensorStation {
        SensorStation {
            value: ValueRef::Tank(crate::id::TankId(0)),
            threshold: 50.0,
            direction,
            signal: SignalId(0),
        }
    }

    #[test]
    fn crossing_directions() {
        let up = sensor(CrossingDirection::Up);
        assert!(up.crossed(40.0, 50.0));
        assert!(!up.crossed(60.0, 40.0));
        assert!(!up.crossed(50.0, 60.0));

        let down = sensor(CrossingDirection::Down);
        assert!(down.crossed(60.0, 50.0));
        assert!(!down.crossed(40.0, 60.0));

        let both = sensor(CrossingDirection::Both);
        assert!(both.crossed(40.0, 55.0));
        assert!(both.crossed(55.0, 40.0));
        assert!(!both.crossed(40.0, 45.0));
    }
}
