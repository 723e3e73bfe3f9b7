//! Piecewise-linear continuous values: tanks, flows and analog values.
//!
//! A [`ContinuousValue`] changes at a constant rate between discrete
//! rate-change events. It is advanced lazily: `value += rate * dt`, clamped
//! to its bounds. When a bound is crossed inside an interval the exact
//! crossing time is used, so the time-weighted integral sees the value sit at
//! the bound for the remainder of the interval.
//!
//! [`ContinuousSystem`] owns all tanks, analog values and active flows of one
//! replication. After every change the kernel calls
//! [`ContinuousSystem::recompute`], which advances everything to the current
//! time, retires finished flows, redistributes flow rates (valve limits, empty
//! and full tanks) and reports the next instant at which something
//! continuous happens (a bound is hit, a flow ends, a watched threshold is
//! crossed).

use crate::id::{AnalogId, ClientKey, SignalId, StationId, TankId};
use crate::sim::{MS_PER_SECOND, SimTime, to_seconds};

const EPS: f64 = 1e-9;

fn tolerance(bound: f64) -> f64 {
    EPS * bound.abs().max(1.0)
}

// ---------------------------------------------------------------------------
// ContinuousValue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousValue {
    value: f64,
    /// Units per second.
    rate: f64,
    last_update: SimTime,
    min: Option<f64>,
    max: Option<f64>,
    integral: f64,
    stats_start: SimTime,
    low: f64,
    high: f64,
}

impl ContinuousValue {
    pub fn new(initial: f64, min: Option<f64>, max: Option<f64>, now: SimTime) -> Self {
        let mut value = initial;
        if let Some(m) = max {
            value = value.min(m);
        }
        if let Some(m) = min {
            value = value.max(m);
        }
        Self {
            value,
            rate: 0.0,
            last_update: now,
            min,
            max,
            integral: 0.0,
            stats_start: now,
            low: value,
            high: value,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Value as of the last update.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Value projected to `now` without changing state.
    pub fn value_at(&self, now: SimTime) -> f64 {
        let mut copy = self.clone();
        copy.advance(now);
        copy.value
    }

    /// Apply the linear update rule up to `now`.
    pub fn advance(&mut self, now: SimTime) {
        if now <= self.last_update {
            return;
        }
        let dt = to_seconds(now - self.last_update);
        let start = self.value;
        let raw = start + self.rate * dt;
        let bound = if self.rate > 0.0 {
            self.max.filter(|&m| raw >= m - tolerance(m))
        } else if self.rate < 0.0 {
            self.min.filter(|&m| raw <= m + tolerance(m))
        } else {
            None
        };
        match bound {
            Some(b) => {
                let hit = ((b - start) / self.rate).clamp(0.0, dt);
                self.integral += (start + b) / 2.0 * hit + b * (dt - hit);
                self.value = b;
            }
            None => {
                self.integral += (start + raw) / 2.0 * dt;
                self.value = raw;
            }
        }
        self.low = self.low.min(self.value);
        self.high = self.high.max(self.value);
        self.last_update = now;
    }

    pub fn set_rate(&mut self, now: SimTime, rate: f64) {
        self.advance(now);
        self.rate = rate;
    }

    /// Jump to `value` (clamped to the bounds).
    pub fn set_value(&mut self, now: SimTime, value: f64) {
        self.advance(now);
        let mut v = value;
        if let Some(m) = self.max {
            v = v.min(m);
        }
        if let Some(m) = self.min {
            v = v.max(m);
        }
        self.value = v;
        self.low = self.low.min(v);
        self.high = self.high.max(v);
    }

    pub fn at_upper(&self) -> bool {
        self.max.is_some_and(|m| self.value >= m - tolerance(m))
    }

    pub fn at_lower(&self) -> bool {
        self.min.is_some_and(|m| self.value <= m + tolerance(m))
    }

    /// Seconds until the value reaches `target` at the current rate, if it is
    /// strictly ahead.
    pub fn time_to(&self, target: f64) -> Option<f64> {
        if self.rate == 0.0 {
            return None;
        }
        let dt = (target - self.value) / self.rate;
        (dt > EPS).then_some(dt)
    }

    /// Seconds until the value hits the bound it is moving towards.
    pub fn time_to_bound(&self) -> Option<f64> {
        if self.rate > 0.0 {
            self.max.and_then(|m| self.time_to(m))
        } else if self.rate < 0.0 {
            self.min.and_then(|m| self.time_to(m))
        } else {
            None
        }
    }

    /// Time-weighted mean since the last statistics reset.
    pub fn mean(&self, now: SimTime) -> f64 {
        let mut copy = self.clone();
        copy.advance(now);
        let elapsed = to_seconds(now.saturating_sub(self.stats_start));
        if elapsed <= 0.0 {
            copy.value
        } else {
            copy.integral / elapsed
        }
    }

    /// Lowest and highest value seen since the last statistics reset.
    pub fn range(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    pub fn reset_stats(&mut self, now: SimTime) {
        self.advance(now);
        self.integral = 0.0;
        self.stats_start = now;
        self.low = self.value;
        self.high = self.value;
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A tank: bounded by `[0, capacity]`, connected through valves.
#[derive(Debug, Clone, PartialEq)]
pub struct TankDef {
    pub name: String,
    pub capacity: f64,
    pub initial: f64,
    /// Maximum flow rate of each valve, units per second.
    pub valves: Vec<f64>,
}

/// A free-standing value with a rate and optional bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogDef {
    pub name: String,
    pub initial: f64,
    pub rate: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEndpoint {
    /// Unlimited outside world.
    External,
    Tank { tank: TankId, valve: usize },
}

/// When a flow ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowStop {
    /// After a fixed duration.
    Time(SimTime),
    /// After moving this quantity.
    Quantity(f64),
    /// When the signal fires.
    Signal(SignalId),
}

/// A continuous value a sensor or formula may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueRef {
    Tank(TankId),
    Analog(AnalogId),
}

#[derive(Debug, Clone)]
struct Flow {
    owner: StationId,
    client: ClientKey,
    source: FlowEndpoint,
    target: FlowEndpoint,
    until: Option<SimTime>,
    remaining: Option<f64>,
    signal: Option<SignalId>,
    rate: f64,
    stopped: bool,
}

impl Flow {
    fn is_finished(&self, now: SimTime) -> bool {
        self.stopped
            || self.until.is_some_and(|t| t <= now)
            || self.remaining.is_some_and(|q| q <= EPS)
    }
}

// ---------------------------------------------------------------------------
// ContinuousSystem
// ---------------------------------------------------------------------------

/// Result of [`ContinuousSystem::recompute`].
#[derive(Debug, Default, PartialEq)]
pub struct Recompute {
    /// Flows that ended, as `(station, client)` of the client that started
    /// them.
    pub finished: Vec<(StationId, ClientKey)>,
    /// Absolute time of the next continuous event, if any.
    pub next_event: Option<SimTime>,
}

#[derive(Debug, Clone)]
pub struct ContinuousSystem {
    tanks: Vec<ContinuousValue>,
    valves: Vec<Vec<f64>>,
    analogs: Vec<ContinuousValue>,
    flows: Vec<Flow>,
    watches: Vec<(ValueRef, f64)>,
    last_update: SimTime,
    generation: u64,
}

impl ContinuousSystem {
    pub fn new(tanks: &[TankDef], analogs: &[AnalogDef]) -> Self {
        Self {
            tanks: tanks
                .iter()
                .map(|t| ContinuousValue::new(t.initial, Some(0.0), Some(t.capacity), 0))
                .collect(),
            valves: tanks.iter().map(|t| t.valves.clone()).collect(),
            analogs: analogs
                .iter()
                .map(|a| {
                    let mut v = ContinuousValue::new(a.initial, a.min, a.max, 0);
                    v.rate = a.rate;
                    v
                })
                .collect(),
            flows: Vec::new(),
            watches: Vec::new(),
            last_update: 0,
            generation: 0,
        }
    }

    /// Generation of the most recently scheduled continuous event. Events
    /// carrying an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn value(&self, what: ValueRef, now: SimTime) -> Option<f64> {
        self.get(what).map(|v| v.value_at(now))
    }

    pub fn get(&self, what: ValueRef) -> Option<&ContinuousValue> {
        match what {
            ValueRef::Tank(t) => self.tanks.get(t.0 as usize),
            ValueRef::Analog(a) => self.analogs.get(a.0 as usize),
        }
    }

    pub fn tanks(&self) -> &[ContinuousValue] {
        &self.tanks
    }

    pub fn analogs(&self) -> &[ContinuousValue] {
        &self.analogs
    }

    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    /// Current rate of the flow started by `client`, if it is still running.
    pub fn flow_rate(&self, client: ClientKey) -> Option<f64> {
        self.flows.iter().find(|f| f.client == client).map(|f| f.rate)
    }

    /// Report threshold crossings of `what` as continuous events.
    pub fn watch(&mut self, what: ValueRef, threshold: f64) {
        if !self.watches.contains(&(what, threshold)) {
            self.watches.push((what, threshold));
        }
    }

    /// Register a new flow. Takes effect at the next [`recompute`](Self::recompute).
    pub fn start_flow(
        &mut self,
        now: SimTime,
        owner: StationId,
        client: ClientKey,
        source: FlowEndpoint,
        target: FlowEndpoint,
        stop: FlowStop,
    ) {
        let (until, remaining, signal) = match stop {
            FlowStop::Time(d) => (Some(now.saturating_add(d)), None, None),
            FlowStop::Quantity(q) => (None, Some(q), None),
            FlowStop::Signal(s) => (None, None, Some(s)),
        };
        self.flows.push(Flow {
            owner,
            client,
            source,
            target,
            until,
            remaining,
            signal,
            rate: 0.0,
            stopped: false,
        });
    }

    /// Stop every flow waiting for `signal`. Returns whether any matched.
    pub fn stop_signal(&mut self, signal: SignalId) -> bool {
        let mut any = false;
        for f in self.flows.iter_mut().filter(|f| f.signal == Some(signal)) {
            f.stopped = true;
            any = true;
        }
        any
    }

    pub fn set_analog_value(&mut self, now: SimTime, id: AnalogId, value: f64) {
        if let Some(a) = self.analogs.get_mut(id.0 as usize) {
            a.set_value(now, value);
        }
    }

    pub fn set_analog_rate(&mut self, now: SimTime, id: AnalogId, rate: f64) {
        if let Some(a) = self.analogs.get_mut(id.0 as usize) {
            a.set_rate(now, rate);
        }
    }

    pub fn reset_stats(&mut self, now: SimTime) {
        for v in self.tanks.iter_mut().chain(self.analogs.iter_mut()) {
            v.reset_stats(now);
        }
    }

    /// Bring everything to `now`, retire finished flows, redistribute flow
    /// rates and compute the next continuous event.
    pub fn recompute(&mut self, now: SimTime) -> Recompute {
        self.advance(now);

        let mut finished = Vec::new();
        self.flows.retain(|f| {
            if f.is_finished(now) {
                finished.push((f.owner, f.client));
                false
            } else {
                true
            }
        });

        self.distribute_rates(now);
        let next_event = self.next_event_delay().map(|secs| {
            let ms = (secs * MS_PER_SECOND - 1e-6).ceil().max(1.0);
            if ms >= u64::MAX as f64 {
                SimTime::MAX
            } else {
                now.saturating_add(ms as SimTime)
            }
        });
        self.generation += 1;
        Recompute {
            finished,
            next_event,
        }
    }

    fn advance(&mut self, now: SimTime) {
        if now > self.last_update {
            let dt = to_seconds(now - self.last_update);
            for f in &mut self.flows {
                if let Some(q) = f.remaining.as_mut() {
                    *q -= f.rate * dt;
                }
            }
            self.last_update = now;
        }
        for v in self.tanks.iter_mut().chain(self.analogs.iter_mut()) {
            v.advance(now);
        }
    }

    fn valve_users(&self, tank: TankId, valve: usize) -> usize {
        let uses = |e: &FlowEndpoint| matches!(*e, FlowEndpoint::Tank { tank: t, valve: v } if t == tank && v == valve);
        self.flows
            .iter()
            .filter(|f| uses(&f.source) || uses(&f.target))
            .count()
    }

    fn endpoint_cap(&self, e: FlowEndpoint) -> f64 {
        match e {
            FlowEndpoint::External => f64::INFINITY,
            FlowEndpoint::Tank { tank, valve } => {
                let max = self
                    .valves
                    .get(tank.0 as usize)
                    .and_then(|v| v.get(valve))
                    .copied()
                    .unwrap_or(0.0);
                max / self.valve_users(tank, valve).max(1) as f64
            }
        }
    }

    fn distribute_rates(&mut self, now: SimTime) {
        let caps: Vec<f64> = self
            .flows
            .iter()
            .map(|f| {
                let cap = self.endpoint_cap(f.source).min(self.endpoint_cap(f.target));
                if cap.is_finite() { cap.max(0.0) } else { 0.0 }
            })
            .collect();
        for (f, cap) in self.flows.iter_mut().zip(caps) {
            f.rate = cap;
        }

        // Throttle flows out of empty tanks and into full ones until stable.
        for _ in 0..=self.tanks.len() {
            let mut changed = false;
            for t in 0..self.tanks.len() {
                let tank = TankId(t as u32);
                let (inflow, outflow) = self.tank_flows(tank);
                if self.tanks[t].at_lower() && outflow > inflow + EPS {
                    let factor = if outflow > 0.0 { inflow / outflow } else { 0.0 };
                    for f in self.flows.iter_mut().filter(|f| is_tank(f.source, tank)) {
                        f.rate *= factor;
                    }
                    changed = true;
                }
                if self.tanks[t].at_upper() && inflow > outflow + EPS {
                    let factor = if inflow > 0.0 { outflow / inflow } else { 0.0 };
                    for f in self.flows.iter_mut().filter(|f| is_tank(f.target, tank)) {
                        f.rate *= factor;
                    }
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for t in 0..self.tanks.len() {
            let (inflow, outflow) = self.tank_flows(TankId(t as u32));
            self.tanks[t].set_rate(now, inflow - outflow);
        }
    }

    fn tank_flows(&self, tank: TankId) -> (f64, f64) {
        let mut inflow = 0.0;
        let mut outflow = 0.0;
        for f in &self.flows {
            if is_tank(f.target, tank) {
                inflow += f.rate;
            }
            if is_tank(f.source, tank) {
                outflow += f.rate;
            }
        }
        (inflow, outflow)
    }

    fn next_event_delay(&self) -> Option<f64> {
        let now = self.last_update;
        let bounds = self
            .tanks
            .iter()
            .chain(self.analogs.iter())
            .filter_map(ContinuousValue::time_to_bound);
        let flows = self.flows.iter().filter_map(|f| {
            if let Some(until) = f.until {
                return Some(to_seconds(until.saturating_sub(now)));
            }
            match f.remaining {
                Some(q) if f.rate > 0.0 => Some(q / f.rate),
                _ => None,
            }
        });
        let watches = self
            .watches
            .iter()
            .filter_map(|&(what, threshold)| self.get(what)?.time_to(threshold));
        bounds.chain(flows).chain(watches).reduce(f64::min)
    }
}

fn is_tank(e: FlowEndpoint, tank: TankId) -> bool {
    matches!(e, FlowEndpoint::Tank { tank: t, .. } if t == tank)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn client() -> ClientKey {
        let mut map: SlotMap<ClientKey, ()> = SlotMap::with_key();
        map.insert(())
    }

    fn tank(capacity: f64, initial: f64, valve: f64) -> TankDef {
        TankDef {
            name: "tank".into(),
            capacity,
            initial,
            valves: vec![valve],
        }
    }

    const T0: FlowEndpoint = FlowEndpoint::Tank {
        tank: TankId(0),
        valve: 0,
    };

    #[test]
    fn linear_update() {
        let mut v = ContinuousValue::new(10.0, None, None, 0);
        v.set_rate(0, 2.0);
        assert_eq!(v.value_at(5000), 20.0);
        v.advance(5000);
        v.set_rate(5000, -1.0);
        assert_eq!(v.value_at(8000), 17.0);
    }

    #[test]
    fn clamps_at_bound_with_exact_integral() {
        let mut v = ContinuousValue::new(0.0, Some(0.0), Some(10.0), 0);
        v.set_rate(0, 5.0);
        v.advance(4000);
        assert_eq!(v.value(), 10.0);
        // 0..2s ramps to 10 (area 10), 2..4s sits at 10 (area 20).
        assert!((v.mean(4000) - 7.5).abs() < 1e-12);
        assert_eq!(v.range(), (0.0, 10.0));
    }

    #[test]
    fn time_to_targets() {
        let mut v = ContinuousValue::new(0.0, Some(0.0), Some(100.0), 0);
        v.set_rate(0, 5.0);
        assert_eq!(v.time_to_bound(), Some(20.0));
        assert_eq!(v.time_to(50.0), Some(10.0));
        assert_eq!(v.time_to(-1.0), None);
        v.set_rate(0, 0.0);
        assert_eq!(v.time_to_bound(), None);
    }

    #[test]
    fn set_value_respects_bounds() {
        let mut v = ContinuousValue::new(0.0, Some(-1.0), Some(1.0), 0);
        v.set_value(0, 5.0);
        assert_eq!(v.value(), 1.0);
        v.set_value(0, -5.0);
        assert_eq!(v.value(), -1.0);
    }

    #[test]
    fn tank_fills_exactly_to_capacity() {
        let mut sys = ContinuousSystem::new(&[tank(100.0, 0.0, 5.0)], &[]);
        sys.start_flow(0, StationId(0), client(), FlowEndpoint::External, T0, FlowStop::Quantity(1e9));
        let r = sys.recompute(0);
        assert_eq!(r.next_event, Some(20_000));
        let r = sys.recompute(20_000);
        assert_eq!(sys.tanks()[0].value(), 100.0);
        assert_eq!(sys.tanks()[0].rate(), 0.0);
        assert_eq!(r.next_event, None);
        assert_eq!(sys.value(ValueRef::Tank(TankId(0)), 90_000), Some(100.0));
    }

    #[test]
    fn quantity_flow_finishes() {
        let mut sys = ContinuousSystem::new(&[tank(100.0, 0.0, 2.0)], &[]);
        let c = client();
        sys.start_flow(0, StationId(3), c, FlowEndpoint::External, T0, FlowStop::Quantity(10.0));
        let r = sys.recompute(0);
        assert_eq!(r.next_event, Some(5_000));
        let r = sys.recompute(5_000);
        assert_eq!(r.finished, vec![(StationId(3), c)]);
        assert!((sys.tanks()[0].value() - 10.0).abs() < 1e-9);
        assert_eq!(sys.active_flows(), 0);
    }

    #[test]
    fn shared_valve_splits_rate() {
        let mut sys = ContinuousSystem::new(&[tank(1000.0, 0.0, 4.0)], &[]);
        let a = client();
        sys.start_flow(0, StationId(0), a, FlowEndpoint::External, T0, FlowStop::Time(10_000));
        sys.start_flow(0, StationId(0), a, FlowEndpoint::External, T0, FlowStop::Time(10_000));
        sys.recompute(0);
        assert_eq!(sys.tanks()[0].rate(), 4.0);
        assert_eq!(sys.flow_rate(a), Some(2.0));
    }

    #[test]
    fn empty_tank_throttles_outflow() {
        let defs = [tank(50.0, 0.0, 10.0), tank(50.0, 0.0, 10.0)];
        let mut sys = ContinuousSystem::new(&defs, &[]);
        let t1 = FlowEndpoint::Tank {
            tank: TankId(1),
            valve: 0,
        };
        // Draining an empty tank into another moves nothing.
        sys.start_flow(0, StationId(0), client(), T0, t1, FlowStop::Time(5_000));
        sys.recompute(0);
        assert_eq!(sys.tanks()[0].rate(), 0.0);
        assert_eq!(sys.tanks()[1].rate(), 0.0);
    }

    #[test]
    fn signal_stops_flow() {
        let mut sys = ContinuousSystem::new(&[tank(100.0, 0.0, 1.0)], &[]);
        let c = client();
        sys.start_flow(0, StationId(1), c, FlowEndpoint::External, T0, FlowStop::Signal(SignalId(2)));
        sys.recompute(0);
        assert!(!sys.stop_signal(SignalId(0)));
        assert!(sys.stop_signal(SignalId(2)));
        let r = sys.recompute(3_000);
        assert_eq!(r.finished, vec![(StationId(1), c)]);
        assert!((sys.tanks()[0].value() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn watched_threshold_is_an_event() {
        let analog = AnalogDef {
            name: "temperature".into(),
            initial: 20.0,
            rate: 0.5,
            min: None,
            max: None,
        };
        let mut sys = ContinuousSystem::new(&[], &[analog]);
        sys.watch(ValueRef::Analog(AnalogId(0)), 25.0);
        let r = sys.recompute(0);
        assert_eq!(r.next_event, Some(10_000));
        let g = sys.generation();
        let r = sys.recompute(10_000);
        assert_eq!(r.next_event, None);
        assert_eq!(sys.generation(), g + 1);
    }
}
