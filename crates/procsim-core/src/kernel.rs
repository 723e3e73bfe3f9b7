//! Event handling.
//!
//! Every popped event runs exactly one handler below. Handlers may change
//! clients, queues and pools, but anything that affects other stations is
//! only flagged; [`settle`](crate::cascade) runs afterwards and resolves the
//! flags at the same simulated instant.

use tracing::{debug, trace};

use crate::error::SimError;
use crate::event::EventKind;
use crate::id::{ClientKey, ResourceId, StationId};
use crate::replication::Replication;
use crate::resource::Capacity;
use crate::sim::to_sim_time;
use crate::station::{Forward, StationKind, dispatch};
use crate::stats::capacity_level;

impl Replication<'_> {
    /// Schedule the initial events. Runs once, before the first event.
    pub(crate) fn start(&mut self) {
        self.started = true;
        if self.stopped {
            return;
        }
        let net = self.net;

        for &source in &net.sources {
            match dispatch::first_arrival(self, source) {
                Ok(Some(time)) => self.queue.schedule(time, EventKind::Arrival { station: source }),
                Ok(None) => {}
                Err(e) => {
                    self.emergency_shutdown(e.to_string());
                    return;
                }
            }
        }
        if self.warm_up_end > 0 {
            self.queue.schedule(self.warm_up_end, EventKind::WarmUpEnd);
        }
        if let Some(seconds) = self.config.termination_time {
            self.queue.schedule(to_sim_time(seconds), EventKind::Terminate);
        }
        for (i, def) in net.resources.iter().enumerate() {
            if let Capacity::Schedule { interval, .. } = def.capacity {
                self.queue.schedule_in(
                    to_sim_time(interval).max(1),
                    EventKind::CapacityChange {
                        resource: ResourceId(i as u32),
                    },
                );
            }
        }
        for &sensor in &net.sensors {
            if let Some(StationKind::Sensor(s)) = net.station(sensor).map(|st| &st.kind) {
                self.continuous.watch(s.value, s.threshold);
            }
        }

        debug!(
            replication = self.index(),
            seed = self.seed(),
            stations = net.len(),
            "replication started"
        );
        self.pending.continuous = true;
        self.settle();
    }

    pub(crate) fn handle(&mut self, kind: EventKind) {
        trace!(time = self.now(), event = ?kind, "event");
        let result = match kind {
            EventKind::Arrival { station } => dispatch::generate(self, station),
            EventKind::Leave { station, client } => self.process_leave(station, client),
            EventKind::ResourceRelease { station, demand } => {
                self.release_resources(&demand, station);
                Ok(())
            }
            EventKind::HoldTimeout { .. } | EventKind::SystemChange => {
                self.pending.change = true;
                Ok(())
            }
            EventKind::TimedCheck => {
                self.timed_check_scheduled = false;
                self.pending.change = true;
                Ok(())
            }
            EventKind::WaitingCancel { station, client } => dispatch::cancel_waiting(self, station, client),
            EventKind::BatchWait { station } => dispatch::batch_wait(self, station),
            EventKind::TransportDelivery {
                destination,
                transporter,
                vehicle,
                clients,
            } => {
                self.transporters.park(transporter, vehicle, destination);
                self.pending.free_resources = true;
                self.send_many(clients.into_iter().map(|c| (c, destination)).collect())
            }
            EventKind::ContinuousUpdate { generation } => {
                if generation == self.continuous.generation() {
                    self.pending.continuous = true;
                }
                Ok(())
            }
            EventKind::CapacityChange { resource } => {
                self.change_capacity(resource);
                Ok(())
            }
            EventKind::WarmUpEnd => {
                let now = self.now();
                self.recorder.reset(now);
                self.continuous.reset_stats(now);
                self.stats_since = now;
                debug!(replication = self.index(), time = now, "warm-up finished");
                Ok(())
            }
            EventKind::Terminate => {
                self.terminate("termination time reached");
                Ok(())
            }
        };
        if let Err(e) = result {
            self.emergency_shutdown(e.to_string());
        }
    }

    fn process_leave(&mut self, at: StationId, client: ClientKey) -> Result<(), SimError> {
        // Stale: the client was removed or moved on in the meantime.
        let here = self.client(client).is_some_and(|c| c.current_station == Some(at));
        if !here {
            return Ok(());
        }
        self.leave_station(at, client);
        let forward = dispatch::leave(self, at, client)?;
        match forward {
            Forward::To(next) => self.send_to_station(next, client),
            Forward::Many(moves) => self.send_many(moves),
            Forward::Consumed => Ok(()),
        }
    }

    fn send_to_station(&mut self, next: StationId, client: ClientKey) -> Result<(), SimError> {
        self.enter_station(next, client);
        dispatch::arrival(self, next, client)?;
        self.notify_state_change();
        Ok(())
    }

    /// Move every client before running any arrival.
    fn send_many(&mut self, moves: Vec<(ClientKey, StationId)>) -> Result<(), SimError> {
        for &(client, next) in &moves {
            self.enter_station(next, client);
        }
        for (client, next) in moves {
            if self.clients.contains(client) {
                dispatch::arrival(self, next, client)?;
            }
        }
        self.notify_state_change();
        Ok(())
    }

    fn change_capacity(&mut self, resource: ResourceId) {
        let net = self.net;
        let Some(def) = net.resources.get(resource.0 as usize) else {
            return;
        };
        let Capacity::Schedule { interval, .. } = def.capacity else {
            return;
        };
        if let Some(capacity) = self.resources.advance_schedule(resource, &def.capacity) {
            let now = self.now();
            if let Some(ind) = self.recorder.resource(resource) {
                ind.capacity.set(now, capacity_level(capacity));
            }
            self.pending.free_resources = true;
            self.pending.change = true;
        }
        // A schedule alone does not keep the run alive.
        if !self.queue.is_empty() {
            self.queue.schedule_in(to_sim_time(interval).max(1), EventKind::CapacityChange { resource });
        }
    }
}
