//! Seize / release pairs: units stay with the client between the two.

use crate::compile::BuildContext;
use crate::error::SimError;
use crate::event::EventKind;
use crate::id::{ClientKey, StationId};
use crate::model::{ReleaseDescription, SeizeDescription};
use crate::param::{TypedFormula, TypedTime};
use crate::queue::WaitingQueue;
use crate::replication::Replication;
use crate::resource::Demand;
use crate::sim::SimTime;

use super::{FreeResourcesListener, Forward, Links, StationBehavior};

#[derive(Debug, Clone)]
pub struct SeizeStation {
    pub demand: Demand,
    pub priority: TypedFormula,
    pub next: StationId,
}

#[derive(Debug, Default)]
pub struct SeizeState {
    pub(crate) queue: WaitingQueue,
}

impl SeizeStation {
    pub(crate) fn build(desc: &SeizeDescription, cx: &mut BuildContext<'_>) -> Self {
        Self {
            demand: cx.demand(&desc.resources),
            priority: cx.typed_formula(&desc.priority),
            next: cx.next(desc.next),
        }
    }

    fn try_seize(&self, rep: &mut Replication<'_>, state: &mut SeizeState, at: StationId) -> bool {
        let Some((index, _)) = rep.queue_scores(&state.queue, &self.priority, at).into_iter().next() else {
            return false;
        };
        let Some(extra) = rep.lock(&self.demand, at) else {
            return false;
        };
        let Some(client) = rep.dequeue_at(at, &mut state.queue, index) else {
            return false;
        };
        rep.hold_units(client, at, self.demand.clone());
        rep.release_after(at, client, self.next, extra);
        true
    }
}

impl Links for SeizeStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.next]
    }
}

impl StationBehavior for SeizeStation {
    type State = SeizeState;

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) -> SeizeState {
        SeizeState::default()
    }

    fn arrival(&self, rep: &mut Replication<'_>, state: &mut SeizeState, at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.enqueue(at, &mut state.queue, client);
        while self.try_seize(rep, state, at) {}
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut SeizeState, _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}

impl FreeResourcesListener for SeizeStation {
    fn waiting_priority(&self, rep: &mut Replication<'_>, state: &mut SeizeState, at: StationId) -> Option<(f64, SimTime)> {
        let (index, score) = rep.queue_scores(&state.queue, &self.priority, at).into_iter().next()?;
        state.queue.get(index).map(|e| (score, e.enqueued_at))
    }

    fn resources_released(&self, rep: &mut Replication<'_>, state: &mut SeizeState, at: StationId) -> Result<bool, SimError> {
        Ok(self.try_seize(rep, state, at))
    }
}

/// Returns the units a client took at a seize station.
#[derive(Debug, Clone)]
pub struct ReleaseStation {
    pub seize: StationId,
    /// Units return to the pool this long after the client passed.
    pub delay: Option<TypedTime>,
    pub next: StationId,
}

impl ReleaseStation {
    pub(crate) fn build(desc: &ReleaseDescription, cx: &mut BuildContext<'_>) -> Self {
        Self {
            seize: cx.station(&desc.seize),
            delay: desc.delay.as_ref().map(|d| cx.typed_time(d)),
            next: cx.next(desc.next),
        }
    }
}

impl Links for ReleaseStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.seize, &mut self.next]
    }
}

impl StationBehavior for ReleaseStation {
    type State = ();

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) {}

    fn arrival(&self, rep: &mut Replication<'_>, _: &mut (), at: StationId, client: ClientKey) -> Result<(), SimError> {
        match rep.take_held(client, self.seize) {
            Some(demand) => {
                let delay = match &self.delay {
                    Some(d) => rep.sample_typed(d, client, at),
                    None => 0,
                };
                if delay == 0 {
                    rep.release_resources(&demand, self.seize);
                } else {
                    rep.schedule_in(
                        delay,
                        EventKind::ResourceRelease {
                            station: self.seize,
                            demand,
                        },
                    );
                }
            }
            None => {
                let number = rep.client(client).map_or(0, |c| c.number);
                let name = rep.station_name(self.seize).to_owned();
                rep.warn(format!("client {number} holds no units of `{name}`"));
            }
        }
        rep.release_to(at, client, self.next);
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut (), _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}
