use crate::compile::BuildContext;
use crate::error::SimError;
use crate::id::{ClientKey, StationId};
use crate::model::PickUpDescription;
use crate::queue::WaitingQueue;
use crate::replication::Replication;

use super::{Forward, Links, StateChangeListener, StationBehavior, dispatch};

/// Carriers wait here until they can take clients out of a process or hold
/// queue. The taken clients ride along as the carrier's temporary batch.
#[derive(Debug, Clone)]
pub struct PickUpStation {
    pub queue_station: StationId,
    pub count: u32,
    pub next: StationId,
}

#[derive(Debug, Default)]
pub struct PickUpState {
    pub(crate) queue: WaitingQueue,
}

impl PickUpStation {
    pub(crate) fn build(desc: &PickUpDescription, cx: &mut BuildContext<'_>) -> Self {
        if desc.count == 0 {
            cx.error("pick up count must be at least 1");
        }
        Self {
            queue_station: cx.station(&desc.queue),
            count: desc.count,
            next: cx.next(desc.next),
        }
    }
}

impl Links for PickUpStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.queue_station, &mut self.next]
    }
}

impl StationBehavior for PickUpStation {
    type State = PickUpState;

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) -> PickUpState {
        PickUpState::default()
    }

    fn arrival(&self, rep: &mut Replication<'_>, state: &mut PickUpState, at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.enqueue(at, &mut state.queue, client);
        rep.notify_state_change();
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut PickUpState, _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}

impl StateChangeListener for PickUpStation {
    fn interested(&self, state: &PickUpState) -> bool {
        !state.queue.is_empty()
    }

    fn recheck(&self, rep: &mut Replication<'_>, state: &mut PickUpState, at: StationId) -> Result<bool, SimError> {
        if state.queue.is_empty() {
            return Ok(false);
        }
        let picked = dispatch::pick_up(rep, self.queue_station, self.count as usize)?;
        if picked.is_empty() {
            return Ok(false);
        }
        let Some(carrier) = rep.dequeue_at(at, &mut state.queue, 0) else {
            return Ok(false);
        };
        if let Some(c) = rep.client_mut(carrier) {
            c.batch.extend(picked);
        }
        rep.release_to(at, carrier, self.next);
        Ok(true)
    }
}
