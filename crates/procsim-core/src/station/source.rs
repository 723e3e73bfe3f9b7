//! Client generation.

use crate::compile::BuildContext;
use crate::error::SimError;
use crate::event::EventKind;
use crate::id::{ClientKey, ClientTypeId, StationId};
use crate::model::SourceDescription;
use crate::param::TimeExpr;
use crate::replication::Replication;
use crate::sim::{SimTime, to_sim_time};

use super::{Forward, Links, StationBehavior};

/// Creates clients of one type at sampled interarrival times.
#[derive(Debug, Clone)]
pub struct SourceStation {
    pub client_type: ClientTypeId,
    pub interarrival: TimeExpr,
    /// Clients created per arrival event.
    pub batch: u32,
    pub first_arrival: Option<SimTime>,
    pub limit: Option<u64>,
    pub next: StationId,
}

#[derive(Debug, Default)]
pub struct SourceState {
    pub generated: u64,
}

impl SourceStation {
    pub(crate) fn build(desc: &SourceDescription, cx: &mut BuildContext<'_>) -> Self {
        if desc.batch == 0 {
            cx.error("batch size must be at least 1");
        }
        let interarrival = cx.time(&desc.interarrival);
        let never_advances = interarrival.constant_value().is_some_and(|v| to_sim_time(v) == 0);
        if never_advances && desc.limit.is_none() {
            cx.error("zero interarrival time without a client limit");
        }
        Self {
            client_type: cx.client_type(&desc.client_type),
            interarrival,
            batch: desc.batch,
            first_arrival: desc.first_arrival.map(to_sim_time),
            limit: desc.limit,
            next: cx.next(desc.next),
        }
    }

    fn exhausted(&self, state: &SourceState) -> bool {
        self.limit.is_some_and(|l| state.generated >= l)
    }

    /// Absolute time of the first arrival event, if any.
    pub(crate) fn first_arrival(
        &self,
        rep: &mut Replication<'_>,
        state: &mut SourceState,
        at: StationId,
    ) -> Option<SimTime> {
        if self.exhausted(state) {
            return None;
        }
        let delay = match self.first_arrival {
            Some(t) => t,
            None => rep.sample(&self.interarrival, None, at),
        };
        Some(rep.now().saturating_add(delay))
    }

    /// Handle an arrival event: create a batch and schedule the next one.
    pub(crate) fn generate(
        &self,
        rep: &mut Replication<'_>,
        state: &mut SourceState,
        at: StationId,
    ) -> Result<(), SimError> {
        for _ in 0..self.batch {
            if self.exhausted(state) {
                break;
            }
            if let Some(max) = rep.config.max_clients_in_system {
                if rep.clients.in_system() >= max {
                    rep.emergency_shutdown(format!(
                        "more than {max} clients in the system"
                    ));
                    return Ok(());
                }
            }
            let client = rep.create_client_at(at, self.client_type);
            state.generated += 1;
            rep.release_to(at, client, self.next);
        }
        if !self.exhausted(state) {
            let delay = rep.sample(&self.interarrival, None, at);
            rep.schedule_in(delay, EventKind::Arrival { station: at });
        }
        Ok(())
    }
}

impl Links for SourceStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.next]
    }
}

impl StationBehavior for SourceStation {
    type State = SourceState;

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) -> SourceState {
        SourceState::default()
    }

    // Clients routed into a source just pass through.
    fn arrival(
        &self,
        rep: &mut Replication<'_>,
        _: &mut SourceState,
        at: StationId,
        client: ClientKey,
    ) -> Result<(), SimError> {
        rep.release_to(at, client, self.next);
        Ok(())
    }

    fn leave(
        &self,
        _: &mut Replication<'_>,
        _: &mut SourceState,
        _: StationId,
        _: ClientKey,
    ) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}
