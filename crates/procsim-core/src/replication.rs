//! One independent run of a compiled network.
//!
//! A [`Replication`] owns every piece of mutable simulation state: the event
//! queue, the client registry, resource and vehicle pools, continuous values,
//! station runtime states and statistics. It borrows the immutable
//! [`Network`] for its whole lifetime, so any number of replications can run
//! side by side over one compiled network.
//!
//! Stations talk to the kernel exclusively through the methods below. None of
//! them re-enters another station: effects on other stations are deferred
//! through pending flags (state change, released resources, fired signals,
//! continuous recompute) that the kernel settles after each event.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::client::{Client, ClientRegistry, HeldUnits, TimeBucket};
use crate::config::RunConfig;
use crate::continuous::{ContinuousSystem, ValueRef};
use crate::error::SimError;
use crate::event::{EventKind, EventQueue};
use crate::expr::{CalcError, EvalScope, Formula, StationQuery};
use crate::id::{AnalogId, ClientKey, ClientTypeId, CounterId, ResourceId, SignalId, StationId, TankId, VariableId};
use crate::journal::{Journal, SimEvent};
use crate::network::Network;
use crate::param::{TimeExpr, TypedFormula, TypedTime};
use crate::queue::WaitingQueue;
use crate::resource::{Demand, ResourcePools};
use crate::rng::SimRng;
use crate::sim::{SimTime, to_seconds, to_sim_time};
use crate::station::{ScriptBridge, ScriptContext, ScriptOutcome, StationState};
use crate::stats::{
    ClientTypeSummary, ContinuousSummary, CounterSummary, Indicator, Recorder, ReplicationStatistics,
    ResourceSummary, StationSummary,
};
use crate::transporter::TransporterPools;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Live per-station counts, kept eagerly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationCounters {
    /// Clients at the station, including members of nested stations for
    /// groups.
    pub at_station: u32,
    pub in_queue: u32,
    /// Clients with a pending zero-delay move to this station.
    pub announced: u32,
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Empty,
    Ready(StationState),
    /// Taken out for a station call.
    InUse,
}

/// Notifications raised during an event, settled afterwards.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    pub change: bool,
    pub free_resources: bool,
    pub continuous: bool,
    pub signals: Vec<SignalId>,
}

impl Pending {
    pub(crate) fn is_clear(&self) -> bool {
        !self.change && !self.free_resources && !self.continuous && self.signals.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

pub struct Replication<'n> {
    pub(crate) net: &'n Network,
    pub(crate) config: RunConfig,
    index: u32,
    seed: u64,
    pub(crate) rng: SimRng,
    pub(crate) queue: EventQueue,
    pub(crate) clients: ClientRegistry,
    pub(crate) resources: ResourcePools,
    pub(crate) transporters: TransporterPools,
    pub(crate) continuous: ContinuousSystem,
    pub(crate) recorder: Recorder,
    pub(crate) journal: Journal,
    pub(crate) counters: Vec<StationCounters>,
    pub(crate) variables: Vec<f64>,
    pub(crate) user_counters: Vec<f64>,
    pub(crate) pending: Pending,
    pub(crate) signals_fired: Vec<u64>,
    pub(crate) timed_check_scheduled: bool,
    pub(crate) terminated_by_condition: bool,
    pub(crate) started: bool,
    pub(crate) events_processed: u64,
    /// Clients created before this time belong to the warm-up phase.
    pub(crate) warm_up_end: SimTime,
    /// Start of the statistics window.
    pub(crate) stats_since: SimTime,
    states: Vec<Slot>,
    scratch: Vec<f64>,
    warnings: Vec<String>,
    warnings_suppressed: u64,
    shutdown: Option<String>,
    pub(crate) stopped: bool,
    clients_disposed: u64,
}

impl std::fmt::Debug for Replication<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replication")
            .field("network", &self.net.name)
            .field("index", &self.index)
            .field("now", &self.queue.now())
            .field("pending_events", &self.queue.len())
            .field("clients", &self.clients.in_system())
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl<'n> Replication<'n> {
    /// A fresh replication. Replication `index` draws from its own random
    /// stream derived from `config.seed`.
    pub fn new(net: &'n Network, config: RunConfig, index: u32) -> Self {
        let seed = SimRng::replication_seed(config.seed, u64::from(index));
        let capacities: Vec<u32> = net.resources.iter().map(|r| r.capacity.initial()).collect();
        Self {
            net,
            index,
            seed,
            rng: SimRng::new(seed),
            queue: EventQueue::new(),
            clients: ClientRegistry::new(),
            resources: ResourcePools::new(&net.resources),
            transporters: TransporterPools::new(&net.transporters),
            continuous: ContinuousSystem::new(&net.tanks, &net.analogs),
            recorder: Recorder::new(net.len(), net.client_types.len(), &capacities),
            journal: Journal::new(config.journal_capacity),
            counters: vec![StationCounters::default(); net.len()],
            variables: net.variable_initial.clone(),
            user_counters: vec![0.0; net.counters.len()],
            pending: Pending::default(),
            signals_fired: vec![0; net.signals.len()],
            timed_check_scheduled: false,
            terminated_by_condition: false,
            started: false,
            events_processed: 0,
            warm_up_end: config.warm_up_time.map_or(0, to_sim_time),
            stats_since: 0,
            states: std::iter::repeat_with(Slot::default).take(net.len()).collect(),
            scratch: Vec::new(),
            warnings: Vec::new(),
            warnings_suppressed: 0,
            shutdown: None,
            stopped: false,
            clients_disposed: 0,
            config,
        }
    }

    // -- Accessors --------------------------------------------------------

    pub fn network(&self) -> &'n Network {
        self.net
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Reason of the emergency shutdown, if one happened.
    pub fn shutdown_reason(&self) -> Option<&str> {
        self.shutdown.as_deref()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn station_counters(&self, id: StationId) -> Option<&StationCounters> {
        self.counters.get(id.index())
    }

    /// Runtime state of a station, if it has been created.
    pub fn station_state(&self, id: StationId) -> Option<&StationState> {
        match self.states.get(id.index())? {
            Slot::Ready(state) => Some(state),
            Slot::Empty | Slot::InUse => None,
        }
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn resources(&self) -> &ResourcePools {
        &self.resources
    }

    pub fn transporters(&self) -> &TransporterPools {
        &self.transporters
    }

    pub fn continuous(&self) -> &ContinuousSystem {
        &self.continuous
    }

    pub fn variables(&self) -> &[f64] {
        &self.variables
    }

    pub fn user_counter(&self, id: CounterId) -> f64 {
        self.user_counters.get(id.0 as usize).copied().unwrap_or(0.0)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Mutable journal access, for subscribing listeners before the run.
    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Name of a station, for messages.
    pub fn station_name(&self, id: StationId) -> &'n str {
        let net: &'n Network = self.net;
        net.station(id).map_or("", |s| s.name.as_str())
    }

    // -- Running ----------------------------------------------------------

    /// Process one event and settle its consequences. Returns `false` once
    /// the replication has nothing left to do.
    pub fn step(&mut self) -> bool {
        if !self.started {
            self.start();
        }
        if self.stopped {
            return false;
        }
        let Some(event) = self.queue.pop_next() else {
            return false;
        };
        self.events_processed += 1;
        self.handle(event.kind);
        self.settle();
        true
    }

    /// Process every event up to and including time `until`.
    pub fn run_until(&mut self, until: SimTime) {
        if !self.started {
            self.start();
        }
        while !self.stopped && self.queue.peek_time().is_some_and(|t| t <= until) {
            self.step();
        }
    }

    /// Run to completion and report.
    pub fn run(mut self) -> ReplicationStatistics {
        while self.step() {}
        debug!(
            replication = self.index,
            time = self.now(),
            events = self.events_processed,
            "replication finished"
        );
        self.statistics()
    }

    // -- Formulas and sampling --------------------------------------------

    fn eval(&mut self, formula: &Formula, client: Option<ClientKey>) -> Result<f64, CalcError> {
        if let Some(value) = formula.constant_value() {
            return Ok(value);
        }
        let now = self.queue.now();
        let view = match client {
            Some(key) => Some(self.clients.get(key).ok_or(CalcError::NoClient)?.view(now)),
            None => None,
        };
        let query = LiveQuery {
            net: self.net,
            counters: &self.counters,
            resources: &self.resources,
            continuous: &self.continuous,
            user_counters: &self.user_counters,
            in_system: self.clients.in_system(),
            now,
        };
        let mut scope = EvalScope {
            variables: &self.variables,
            now: to_seconds(now),
            client: view,
            query: &query,
            scratch: &mut self.scratch,
        };
        formula.eval(&mut scope)
    }

    fn calc_at(&mut self, formula: &Formula, client: Option<ClientKey>, at: Option<StationId>) -> f64 {
        match self.eval(formula, client) {
            Ok(value) => value,
            Err(error) => {
                let place = match at {
                    Some(id) => format!("station `{}`", self.station_name(id)),
                    None => "model".to_owned(),
                };
                let message = format!("{place}: formula `{}`: {error}", formula.text());
                if self.config.stop_on_calc_error {
                    self.emergency_shutdown(message);
                } else {
                    self.warn(message);
                }
                0.0
            }
        }
    }

    /// Evaluate `formula` at station `at`. Errors yield zero and a warning,
    /// or an emergency shutdown under the strict policy.
    pub fn calc(&mut self, formula: &Formula, client: Option<ClientKey>, at: StationId) -> f64 {
        self.calc_at(formula, client, Some(at))
    }

    /// Evaluate a condition. Any non-zero value is true.
    pub fn calc_bool(&mut self, formula: &Formula, client: Option<ClientKey>, at: StationId) -> bool {
        self.calc(formula, client, at) != 0.0
    }

    /// Evaluate a formula that belongs to no station.
    pub fn calc_global(&mut self, formula: &Formula) -> f64 {
        self.calc_at(formula, None, None)
    }

    /// Draw a duration.
    pub fn sample(&mut self, expr: &TimeExpr, client: Option<ClientKey>, at: StationId) -> SimTime {
        let seconds = match expr {
            TimeExpr::Distribution(d) => d.sample(&mut self.rng),
            TimeExpr::Formula(f) => self.calc(f, client, at),
        };
        to_sim_time(seconds)
    }

    /// Draw the duration configured for the client's type; zero if none.
    pub fn sample_typed(&mut self, time: &TypedTime, client: ClientKey, at: StationId) -> SimTime {
        let ty = self.client_type_of(client);
        match time.get(ty) {
            Some(expr) => self.sample(expr, Some(client), at),
            None => 0,
        }
    }

    /// Queue positions ordered by descending priority. Ties keep arrival
    /// order. Without a priority formula the score is the waiting time in
    /// seconds, which yields FIFO.
    pub fn queue_scores(&mut self, queue: &WaitingQueue, priority: &TypedFormula, at: StationId) -> Vec<(usize, f64)> {
        let now = self.now();
        let mut scores: Vec<(usize, f64)> = queue
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let ty = self.client_type_of(entry.client);
                let score = match priority.get(ty) {
                    Some(f) => self.calc(f, Some(entry.client), at),
                    None => to_seconds(now.saturating_sub(entry.enqueued_at)),
                };
                (index, score)
            })
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores
    }

    pub fn run_script(
        &mut self,
        script: &dyn ScriptBridge,
        client: ClientKey,
        options: usize,
    ) -> Result<ScriptOutcome, String> {
        let now = self.now();
        let context = ScriptContext {
            now: to_seconds(now),
            client: self.clients.get(client).map(|c| c.view(now)),
            variables: &self.variables,
            options,
        };
        script.execute(&context)
    }

    // -- Clients ----------------------------------------------------------

    pub fn client(&self, key: ClientKey) -> Option<&Client> {
        self.clients.get(key)
    }

    pub fn client_mut(&mut self, key: ClientKey) -> Option<&mut Client> {
        self.clients.get_mut(key)
    }

    pub fn client_type_of(&self, key: ClientKey) -> ClientTypeId {
        self.clients.get(key).map_or(ClientTypeId(0), |c| c.type_id)
    }

    /// Station `at` plus every enclosing group.
    fn lineage(&self, at: StationId) -> Vec<StationId> {
        let mut out = vec![at];
        let mut parent = self.net.station(at).and_then(|s| s.parent);
        while let Some(p) = parent {
            if out.len() > self.net.len() {
                break;
            }
            out.push(p);
            parent = self.net.station(p).and_then(|s| s.parent);
        }
        out
    }

    fn unannounce(&mut self, key: ClientKey) {
        let Some(target) = self.clients.get_mut(key).and_then(|c| c.announced_to.take()) else {
            return;
        };
        if let Some(c) = self.counters.get_mut(target.index()) {
            c.announced = c.announced.saturating_sub(1);
        }
    }

    /// Create a client at source station `at`.
    pub fn create_client_at(&mut self, at: StationId, client_type: ClientTypeId) -> ClientKey {
        let now = self.now();
        let is_warm_up = now < self.warm_up_end;
        let key = self.clients.create(client_type, at, now, is_warm_up);
        if let Some(c) = self.clients.get(key) {
            self.journal.record(SimEvent::ClientCreated {
                client: c.number,
                station: at,
                time: now,
            });
        }
        self.recorder.wip.set(now, self.clients.in_system() as f64);
        self.enter_station(at, key);
        key
    }

    /// Copy a client. The copy is not at any station yet.
    pub fn clone_client(&mut self, original: ClientKey) -> Option<ClientKey> {
        let now = self.now();
        let copy = self.clients.duplicate(original, now)?;
        if let Some(c) = self.clients.get_mut(copy) {
            c.current_station = None;
            c.station_entered = now;
            self.journal.record(SimEvent::ClientCreated {
                client: c.number,
                station: original_station(c),
                time: now,
            });
        }
        self.recorder.wip.set(now, self.clients.in_system() as f64);
        Some(copy)
    }

    /// Book a client into station `at`.
    pub(crate) fn enter_station(&mut self, at: StationId, key: ClientKey) {
        let now = self.now();
        self.unannounce(key);
        let Some(c) = self.clients.get_mut(key) else {
            return;
        };
        c.current_station = Some(at);
        c.station_entered = now;
        let number = c.number;
        for id in self.lineage(at) {
            if let Some(counter) = self.counters.get_mut(id.index()) {
                counter.at_station += 1;
                let level = f64::from(counter.at_station);
                if let Some(ind) = self.recorder.station(id) {
                    ind.at_station.set(now, level);
                }
            }
        }
        if let Some(ind) = self.recorder.station(at) {
            ind.arrivals.increment();
        }
        self.journal.record(SimEvent::ClientArrived {
            client: number,
            station: at,
            time: now,
        });
    }

    /// Book a client out of station `at`. Does nothing if it is not there.
    pub fn leave_station(&mut self, at: StationId, key: ClientKey) {
        let now = self.now();
        let Some(c) = self.clients.get_mut(key) else {
            return;
        };
        if c.current_station != Some(at) {
            return;
        }
        c.current_station = None;
        c.last_station = Some(at);
        let stay = now.saturating_sub(c.station_entered);
        let number = c.number;
        for id in self.lineage(at) {
            if let Some(counter) = self.counters.get_mut(id.index()) {
                counter.at_station = counter.at_station.saturating_sub(1);
                let level = f64::from(counter.at_station);
                if let Some(ind) = self.recorder.station(id) {
                    ind.at_station.set(now, level);
                }
            }
        }
        if let Some(ind) = self.recorder.station(at) {
            ind.departures.increment();
            ind.residence.add(to_seconds(stay));
        }
        self.journal.record(SimEvent::ClientLeft {
            client: number,
            station: at,
            time: now,
        });
    }

    /// Remove a client and every batch member it carries.
    pub fn remove_client(&mut self, key: ClientKey) {
        self.unannounce(key);
        let Some(client) = self.clients.remove(key) else {
            return;
        };
        if let Some(at) = client.current_station {
            for id in self.lineage(at) {
                if let Some(counter) = self.counters.get_mut(id.index()) {
                    counter.at_station = counter.at_station.saturating_sub(1);
                }
            }
        }
        for member in client.batch {
            self.remove_client(member);
        }
        let now = self.now();
        self.recorder.wip.set(now, self.clients.in_system() as f64);
    }

    /// A client leaves the system at dispose station `at`.
    pub fn dispose_client(&mut self, at: StationId, key: ClientKey) {
        let now = self.now();
        self.leave_station(at, key);
        if let Some(c) = self.clients.get(key) {
            if !c.is_warm_up {
                let residence = to_seconds(c.residence(now));
                let (waiting, transfer, process) =
                    (to_seconds(c.waiting), to_seconds(c.transfer), to_seconds(c.process));
                if let Some(ind) = self.recorder.client_type(c.type_id) {
                    ind.disposed.increment();
                    ind.waiting.add(waiting);
                    ind.transfer.add(transfer);
                    ind.process.add(process);
                    ind.residence.add(residence);
                }
                self.recorder.system_residence.add(residence);
            }
            self.journal.record(SimEvent::ClientDisposed {
                client: c.number,
                station: at,
                time: now,
            });
        }
        self.clients_disposed += 1;
        self.remove_client(key);
    }

    // -- Queues -----------------------------------------------------------

    pub fn enqueue(&mut self, at: StationId, queue: &mut WaitingQueue, key: ClientKey) {
        let now = self.now();
        queue.push(key, now);
        if let Some(c) = self.clients.get_mut(key) {
            c.last_waiting_start = now;
        }
        if let Some(counter) = self.counters.get_mut(at.index()) {
            counter.in_queue += 1;
            let level = f64::from(counter.in_queue);
            if let Some(ind) = self.recorder.station(at) {
                ind.in_queue.set(now, level);
            }
        }
    }

    /// Take the client at `index` out of the queue and book its wait.
    pub fn dequeue_at(&mut self, at: StationId, queue: &mut WaitingQueue, index: usize) -> Option<ClientKey> {
        let entry = queue.remove(index)?;
        let now = self.now();
        let waited = now.saturating_sub(entry.enqueued_at);
        if let Some(c) = self.clients.get_mut(entry.client) {
            c.book(TimeBucket::Waiting, waited);
        }
        if let Some(counter) = self.counters.get_mut(at.index()) {
            counter.in_queue = counter.in_queue.saturating_sub(1);
            let level = f64::from(counter.in_queue);
            if let Some(ind) = self.recorder.station(at) {
                ind.in_queue.set(now, level);
                ind.waiting.add(to_seconds(waited));
            }
        }
        Some(entry.client)
    }

    /// Dequeue several positions at once. Clients come back in the order of
    /// `indices`.
    pub fn dequeue_many(&mut self, at: StationId, queue: &mut WaitingQueue, indices: &[usize]) -> Vec<ClientKey> {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut taken = BTreeMap::new();
        for &index in sorted.iter().rev() {
            if let Some(client) = self.dequeue_at(at, queue, index) {
                taken.insert(index, client);
            }
        }
        indices.iter().filter_map(|i| taken.remove(i)).collect()
    }

    // -- Scheduling -------------------------------------------------------

    pub fn schedule_in(&mut self, delay: SimTime, kind: EventKind) {
        self.queue.schedule_in(delay, kind);
    }

    /// Withdraw pending events. Returns how many were removed.
    pub fn cancel_events(&mut self, pred: impl FnMut(&EventKind) -> bool) -> usize {
        self.queue.cancel_where(pred)
    }

    /// Schedule the client's departure from `at`.
    pub fn schedule_leave(&mut self, at: StationId, client: ClientKey, delay: SimTime) {
        self.queue.schedule_in(delay, EventKind::Leave { station: at, client });
    }

    /// Send a client on to `next` at the current instant. The move is
    /// announced so that occupancy checks see it before it happens.
    pub fn release_to(&mut self, at: StationId, client: ClientKey, next: StationId) {
        self.unannounce(client);
        if let Some(c) = self.clients.get_mut(client) {
            c.announced_to = Some(next);
            if let Some(counter) = self.counters.get_mut(next.index()) {
                counter.announced += 1;
            }
        }
        self.schedule_leave(at, client, 0);
    }

    /// [`release_to`](Self::release_to) after `delay`.
    pub fn release_after(&mut self, at: StationId, client: ClientKey, next: StationId, delay: SimTime) {
        if delay == 0 {
            self.release_to(at, client, next);
        } else {
            self.schedule_leave(at, client, delay);
        }
    }

    pub fn book(&mut self, client: ClientKey, bucket: TimeBucket, duration: SimTime) {
        if let Some(c) = self.clients.get_mut(client) {
            c.book(bucket, duration);
        }
    }

    pub fn record_process(&mut self, at: StationId, duration: SimTime) {
        if let Some(ind) = self.recorder.station(at) {
            ind.process.add(to_seconds(duration));
        }
    }

    // -- Resources --------------------------------------------------------

    /// Lock a demand for `owner`. Returns the relocation delay.
    pub fn lock(&mut self, demand: &Demand, owner: StationId) -> Option<SimTime> {
        let extra = self.resources.try_lock(demand, owner)?;
        let now = self.now();
        for &(id, units) in demand.units.iter().filter(|(_, n)| *n > 0) {
            let in_use = f64::from(self.resources.in_use(id));
            if let Some(ind) = self.recorder.resource(id) {
                ind.in_use.set(now, in_use);
                ind.seizes.increment();
            }
            self.journal.record(SimEvent::ResourceSeized {
                resource: id,
                units,
                station: owner,
                time: now,
            });
        }
        Some(extra)
    }

    /// Return units to their pools and wake waiting stations.
    pub fn release_resources(&mut self, demand: &Demand, owner: StationId) {
        self.resources.release(demand, owner);
        let now = self.now();
        for &(id, units) in demand.units.iter().filter(|(_, n)| *n > 0) {
            let in_use = f64::from(self.resources.in_use(id));
            if let Some(ind) = self.recorder.resource(id) {
                ind.in_use.set(now, in_use);
            }
            self.journal.record(SimEvent::ResourceReleased {
                resource: id,
                units,
                time: now,
            });
        }
        self.pending.free_resources = true;
    }

    pub fn hold_units(&mut self, client: ClientKey, seize: StationId, demand: Demand) {
        if let Some(c) = self.clients.get_mut(client) {
            c.held.push(HeldUnits { seize, demand });
        }
    }

    pub fn take_held(&mut self, client: ClientKey, seize: StationId) -> Option<Demand> {
        self.clients.get_mut(client)?.take_held(seize)
    }

    /// Clients at or announced to the given stations.
    pub fn occupancy(&self, stations: &[StationId]) -> u32 {
        stations
            .iter()
            .filter_map(|s| self.counters.get(s.index()))
            .map(|c| c.at_station + c.announced)
            .sum()
    }

    // -- Notifications and globals ----------------------------------------

    pub fn notify_state_change(&mut self) {
        self.pending.change = true;
    }

    pub fn notify_continuous(&mut self) {
        self.pending.continuous = true;
    }

    pub fn fire_signal(&mut self, signal: SignalId) {
        self.pending.signals.push(signal);
    }

    pub fn set_variable(&mut self, id: VariableId, value: f64) {
        if let Some(v) = self.variables.get_mut(id.0 as usize) {
            *v = value;
            self.pending.change = true;
        }
    }

    pub fn add_to_counter(&mut self, id: CounterId, by: f64) {
        if let Some(v) = self.user_counters.get_mut(id.0 as usize) {
            *v += by;
            self.pending.change = true;
        }
    }

    // -- Warnings and stopping --------------------------------------------

    /// Record a warning. Only the first `warning_cap` are kept and logged.
    pub fn warn(&mut self, message: String) {
        if self.warnings.len() < self.config.warning_cap {
            warn!(replication = self.index, time = self.now(), "{message}");
            self.warnings.push(message);
        } else {
            self.warnings_suppressed += 1;
        }
    }

    /// Stop the replication for good. Only the first reason is kept.
    pub fn emergency_shutdown(&mut self, reason: impl Into<String>) {
        if self.shutdown.is_some() {
            return;
        }
        let reason = reason.into();
        let now = self.now();
        warn!(replication = self.index, time = now, reason = %reason, "emergency shutdown");
        self.journal.record(SimEvent::Shutdown {
            reason: reason.clone(),
            time: now,
        });
        self.queue.cancel_all();
        self.stopped = true;
        self.shutdown = Some(reason);
    }

    /// Regular end of the run.
    pub fn terminate(&mut self, reason: &str) {
        if self.stopped {
            return;
        }
        debug!(replication = self.index, time = self.now(), reason, "replication terminated");
        self.queue.cancel_all();
        self.stopped = true;
    }

    // -- State arena ------------------------------------------------------

    pub(crate) fn take_state(&mut self, at: StationId) -> Result<Option<StationState>, SimError> {
        let slot = self.states.get_mut(at.index()).ok_or(SimError::UnknownStation(at))?;
        match std::mem::replace(slot, Slot::InUse) {
            Slot::Empty => Ok(None),
            Slot::Ready(state) => Ok(Some(state)),
            Slot::InUse => Err(SimError::Reentrant(at)),
        }
    }

    pub(crate) fn put_state(&mut self, at: StationId, state: StationState) {
        if let Some(slot) = self.states.get_mut(at.index()) {
            *slot = Slot::Ready(state);
        }
    }

    pub(crate) fn state_in_use(&self, at: StationId) -> bool {
        matches!(self.states.get(at.index()), Some(Slot::InUse))
    }

    // -- Results ----------------------------------------------------------

    /// Everything measured so far.
    pub fn statistics(&self) -> ReplicationStatistics {
        let now = self.now();
        let net = self.net;
        let hours = to_seconds(now.saturating_sub(self.stats_since)) / 3600.0;

        let stations = net
            .stations
            .iter()
            .zip(&self.recorder.stations)
            .map(|(s, ind)| StationSummary {
                name: s.name.clone(),
                model_id: s.model_id,
                arrivals: ind.arrivals.get(),
                departures: ind.departures.get(),
                at_station: ind.at_station.get(now),
                in_queue: ind.in_queue.get(now),
                waiting: ind.waiting.get(now),
                process: ind.process.get(now),
                residence: ind.residence.get(now),
            })
            .collect();

        let client_types = net
            .client_types
            .iter()
            .zip(&self.recorder.client_types)
            .map(|(name, ind)| ClientTypeSummary {
                name: name.clone(),
                disposed: ind.disposed.get(),
                waiting: ind.waiting.get(now),
                transfer: ind.transfer.get(now),
                process: ind.process.get(now),
                residence: ind.residence.get(now),
            })
            .collect();

        let resources = net
            .resources
            .iter()
            .zip(&self.recorder.resources)
            .enumerate()
            .map(|(i, (def, ind))| {
                let id = ResourceId(i as u32);
                let in_use = ind.in_use.get(now);
                let capacity = ind.capacity.get(now);
                let utilization = if capacity.mean > 0.0 { in_use.mean / capacity.mean } else { 0.0 };
                let idle = (capacity.mean - in_use.mean).max(0.0);
                let seizes = ind.seizes.get();
                ResourceSummary {
                    name: def.name.clone(),
                    in_use,
                    capacity,
                    utilization,
                    seizes,
                    seized_units: self.resources.seized_total(id),
                    released_units: self.resources.released_total(id),
                    cost: in_use.mean * hours * def.cost_per_hour_busy
                        + idle * hours * def.cost_per_hour_idle
                        + seizes as f64 * def.cost_per_seize,
                }
            })
            .collect();

        let continuous = |name: &str, what: ValueRef| {
            let value = self.continuous.get(what)?;
            let (min, max) = value.range();
            Some(ContinuousSummary {
                name: name.to_owned(),
                final_value: value.value_at(now),
                mean: value.mean(now),
                min,
                max,
            })
        };
        let tanks = net
            .tanks
            .iter()
            .enumerate()
            .filter_map(|(i, t)| continuous(&t.name, ValueRef::Tank(TankId(i as u32))))
            .collect();
        let analogs = net
            .analogs
            .iter()
            .enumerate()
            .filter_map(|(i, a)| continuous(&a.name, ValueRef::Analog(AnalogId(i as u32))))
            .collect();

        let named = |names: &[String], values: &[f64]| -> Vec<CounterSummary> {
            names
                .iter()
                .zip(values)
                .map(|(name, &value)| CounterSummary {
                    name: name.clone(),
                    value,
                })
                .collect()
        };

        ReplicationStatistics {
            replication: self.index,
            seed: self.seed,
            end_time: to_seconds(now),
            events_processed: self.events_processed,
            clients_created: self.clients.created(),
            clients_disposed: self.clients_disposed,
            clients_in_system: self.clients.in_system() as u64,
            wip: self.recorder.wip.get(now),
            system_residence: self.recorder.system_residence.get(now),
            stations,
            client_types,
            resources,
            tanks,
            analogs,
            counters: named(&net.counters, &self.user_counters),
            variables: named(&net.variables, &self.variables),
            signals_fired: self.signals_fired.clone(),
            warnings: self.warnings.clone(),
            warnings_suppressed: self.warnings_suppressed,
            shutdown: self.shutdown.clone(),
            terminated_by_condition: self.terminated_by_condition,
        }
    }
}

fn original_station(c: &Client) -> StationId {
    c.last_station.unwrap_or(c.source)
}

// ---------------------------------------------------------------------------
// Live query
// ---------------------------------------------------------------------------

/// Formula access to live replication state. Resource, tank, analog and
/// counter numbers are 1-based.
struct LiveQuery<'a> {
    net: &'a Network,
    counters: &'a [StationCounters],
    resources: &'a ResourcePools,
    continuous: &'a ContinuousSystem,
    user_counters: &'a [f64],
    in_system: usize,
    now: SimTime,
}

fn one_based(n: i64) -> Option<u32> {
    u32::try_from(n.checked_sub(1)?).ok()
}

impl LiveQuery<'_> {
    fn station(&self, model_id: i64) -> Option<&StationCounters> {
        let id = self.net.by_model_id(model_id)?;
        self.counters.get(id.index())
    }
}

impl StationQuery for LiveQuery<'_> {
    fn clients_at_station(&self, model_id: i64) -> Option<f64> {
        self.station(model_id).map(|c| f64::from(c.at_station))
    }

    fn clients_in_queue(&self, model_id: i64) -> Option<f64> {
        self.station(model_id).map(|c| f64::from(c.in_queue))
    }

    fn resource_in_use(&self, resource: i64) -> Option<f64> {
        let id = one_based(resource)?;
        (id < self.resources.len() as u32).then(|| f64::from(self.resources.in_use(ResourceId(id))))
    }

    fn tank_level(&self, tank: i64) -> Option<f64> {
        self.continuous.value(ValueRef::Tank(TankId(one_based(tank)?)), self.now)
    }

    fn analog_value(&self, analog: i64) -> Option<f64> {
        self.continuous.value(ValueRef::Analog(AnalogId(one_based(analog)?)), self.now)
    }

    fn counter(&self, counter: i64) -> Option<f64> {
        self.user_counters.get(one_based(counter)? as usize).copied()
    }

    fn clients_in_system(&self) -> f64 {
        self.in_system as f64
    }
}
