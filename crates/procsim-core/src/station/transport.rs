//! Vehicle transport between a transport source and transport destinations.
//!
//! Clients queue at the source until a vehicle of the configured type is
//! free. The nearest free vehicle drives to the source, loads up to its
//! capacity of clients sharing one destination, and delivers them. The
//! vehicle then stays parked at the destination.

use crate::client::TimeBucket;
use crate::compile::BuildContext;
use crate::error::SimError;
use crate::event::EventKind;
use crate::id::{ClientKey, ClientTypeId, StationId, TransporterTypeId};
use crate::model::TransportSourceDescription;
use crate::param::TypedFormula;
use crate::queue::WaitingQueue;
use crate::replication::Replication;
use crate::sim::{SimTime, to_sim_time};

use super::{FreeResourcesListener, Forward, Links, StationBehavior};

#[derive(Debug, Clone)]
pub struct TransportSourceStation {
    pub transporter: TransporterTypeId,
    pub destination: Option<StationId>,
    pub destination_by_type: Vec<(ClientTypeId, StationId)>,
    pub priority: TypedFormula,
}

#[derive(Debug, Default)]
pub struct TransportSourceState {
    pub(crate) queue: WaitingQueue,
}

impl TransportSourceStation {
    pub(crate) fn build(desc: &TransportSourceDescription, cx: &mut BuildContext<'_>) -> Self {
        if desc.destination.is_none() && desc.destination_by_type.is_empty() {
            cx.error("transport source has no destination");
        }
        Self {
            transporter: cx.transporter(&desc.transporter),
            destination: desc.destination.as_deref().map(|d| cx.station(d)),
            destination_by_type: desc
                .destination_by_type
                .iter()
                .map(|(ty, d)| (cx.client_type(ty), cx.station(d)))
                .collect(),
            priority: cx.typed_formula(&desc.priority),
        }
    }

    fn destination_of(&self, rep: &Replication<'_>, client: ClientKey) -> Option<StationId> {
        let ty = rep.client_type_of(client);
        self.destination_by_type
            .iter()
            .find(|(t, _)| *t == ty)
            .map(|&(_, d)| d)
            .or(self.destination)
    }

    fn try_dispatch(&self, rep: &mut Replication<'_>, state: &mut TransportSourceState, at: StationId) -> Result<bool, SimError> {
        if state.queue.is_empty() {
            return Ok(false);
        }
        let net = rep.net;
        let def = net
            .transporters
            .get(self.transporter.0 as usize)
            .ok_or_else(|| SimError::Fatal(format!("unknown transporter type {:?}", self.transporter)))?;
        let Some(vehicle) = rep.transporters.nearest_free(self.transporter, def, at) else {
            return Ok(false);
        };

        let order = rep.queue_scores(&state.queue, &self.priority, at);
        let Some(&(first_index, _)) = order.first() else {
            return Ok(false);
        };
        let Some(first) = state.queue.get(first_index).map(|e| e.client) else {
            return Ok(false);
        };
        let Some(destination) = self.destination_of(rep, first) else {
            rep.emergency_shutdown(format!(
                "no transport destination for client type {} at `{}`",
                rep.client_type_of(first).0,
                rep.station_name(at)
            ));
            return Ok(false);
        };

        let load: Vec<usize> = order
            .iter()
            .filter_map(|&(index, _)| {
                let client = state.queue.get(index)?.client;
                (self.destination_of(rep, client) == Some(destination)).then_some(index)
            })
            .take(def.capacity.max(1) as usize)
            .collect();
        let clients = rep.dequeue_many(at, &mut state.queue, &load);
        for &client in &clients {
            rep.leave_station(at, client);
        }

        let Some(parked_at) = rep.transporters.dispatch(self.transporter, vehicle) else {
            return Err(SimError::Fatal(format!("vehicle {vehicle} is not free")));
        };
        let seconds = def.travel_time(parked_at, at)
            + def.load_time
            + def.travel_time(at, destination)
            + def.unload_time;
        let duration: SimTime = to_sim_time(seconds);
        for &client in &clients {
            rep.book(client, TimeBucket::Transfer, duration);
        }
        rep.schedule_in(
            duration,
            EventKind::TransportDelivery {
                destination,
                transporter: self.transporter,
                vehicle,
                clients,
            },
        );
        Ok(true)
    }

    pub(crate) fn dispatch_all(&self, rep: &mut Replication<'_>, state: &mut TransportSourceState, at: StationId) -> Result<(), SimError> {
        while self.try_dispatch(rep, state, at)? {}
        Ok(())
    }
}

impl Links for TransportSourceStation {
    fn successors(&self) -> Vec<StationId> {
        let mut out: Vec<StationId> = self.destination.into_iter().collect();
        out.extend(self.destination_by_type.iter().map(|&(_, d)| d));
        out
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        let mut out: Vec<&mut StationId> = self.destination.as_mut().into_iter().collect();
        out.extend(self.destination_by_type.iter_mut().map(|(_, d)| d));
        out
    }
}

impl StationBehavior for TransportSourceStation {
    type State = TransportSourceState;

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) -> TransportSourceState {
        TransportSourceState::default()
    }

    fn arrival(&self, rep: &mut Replication<'_>, state: &mut TransportSourceState, at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.enqueue(at, &mut state.queue, client);
        self.dispatch_all(rep, state, at)
    }

    // Clients leave by vehicle, never through a leave event.
    fn leave(&self, _: &mut Replication<'_>, _: &mut TransportSourceState, at: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Err(SimError::Fatal(format!("transport source {at:?} got a leave event")))
    }
}

impl FreeResourcesListener for TransportSourceStation {
    fn waiting_priority(&self, rep: &mut Replication<'_>, state: &mut TransportSourceState, at: StationId) -> Option<(f64, SimTime)> {
        if !rep.transporters.has_free(self.transporter) {
            return None;
        }
        let (index, score) = rep.queue_scores(&state.queue, &self.priority, at).into_iter().next()?;
        state.queue.get(index).map(|e| (score, e.enqueued_at))
    }

    fn resources_released(&self, rep: &mut Replication<'_>, state: &mut TransportSourceState, at: StationId) -> Result<bool, SimError> {
        self.try_dispatch(rep, state, at)
    }
}

/// Where vehicles unload. Clients continue to `next`.
#[derive(Debug, Clone)]
pub struct TransportDestinationStation {
    pub next: StationId,
}

impl Links for TransportDestinationStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.next]
    }
}

impl StationBehavior for TransportDestinationStation {
    type State = ();

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) {}

    fn arrival(&self, rep: &mut Replication<'_>, _: &mut (), at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.release_to(at, client, self.next);
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut (), _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}
