//! Resource-constrained processing with optional batching, setup times and
//! waiting tolerance.

use crate::client::TimeBucket;
use crate::compile::BuildContext;
use crate::error::SimError;
use crate::event::EventKind;
use crate::id::{ClientKey, ClientTypeId, StationId};
use crate::model::ProcessDescription;
use crate::param::{TypedFormula, TypedTime};
use crate::queue::WaitingQueue;
use crate::replication::Replication;
use crate::resource::Demand;
use crate::sim::SimTime;

use super::{FreeResourcesListener, Forward, Links, PickUpQueue, StationBehavior};

#[derive(Debug, Clone)]
pub struct ProcessStation {
    /// Alternative resource sets. The first one that can be locked is used;
    /// an empty list means the station needs no resources.
    pub alternatives: Vec<Demand>,
    pub process_time: TypedTime,
    pub setup_time: Option<TypedTime>,
    pub post_process_time: Option<TypedTime>,
    pub priority: TypedFormula,
    pub batch_min: u32,
    pub batch_max: u32,
    pub cancel_after: Option<TypedTime>,
    pub next: StationId,
    pub cancel_next: Option<StationId>,
}

#[derive(Debug, Default)]
pub struct ProcessState {
    pub(crate) queue: WaitingQueue,
    last_type: Option<ClientTypeId>,
    /// Pending wait for a fuller batch.
    batch_ready_at: Option<SimTime>,
    /// Clients that gave up waiting and leave through the cancel edge.
    cancelled: Vec<ClientKey>,
    /// Set while the station itself takes clients out of its queue.
    dequeuing: bool,
}

impl ProcessState {
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl ProcessStation {
    pub(crate) fn build(desc: &ProcessDescription, cx: &mut BuildContext<'_>) -> Self {
        let alternatives = desc.resources.iter().map(|set| cx.demand(set)).collect();
        let batch_min = desc.batch_min.unwrap_or(1);
        let batch_max = desc.batch_max.unwrap_or(batch_min);
        if batch_min == 0 {
            cx.error("batch minimum must be at least 1");
        }
        if batch_max < batch_min {
            cx.error(format!("batch maximum {batch_max} is below the minimum {batch_min}"));
        }
        match (&desc.cancel_after, desc.cancel_next) {
            (Some(_), None) => cx.error("waiting tolerance needs a cancel edge"),
            (None, Some(_)) => cx.error("cancel edge without a waiting tolerance"),
            _ => {}
        }
        Self {
            alternatives,
            process_time: cx.typed_time(&desc.process_time),
            setup_time: desc.setup_time.as_ref().map(|t| cx.typed_time(t)),
            post_process_time: desc.post_process_time.as_ref().map(|t| cx.typed_time(t)),
            priority: cx.typed_formula(&desc.priority),
            batch_min,
            batch_max,
            cancel_after: desc.cancel_after.as_ref().map(|t| cx.typed_time(t)),
            next: cx.next(desc.next),
            cancel_next: desc.cancel_next.map(|n| cx.next(n)),
        }
    }

    /// Lock the first alternative that fits. Yields the locked demand (if
    /// any resources are needed) and the relocation delay.
    fn lock_any(&self, rep: &mut Replication<'_>, at: StationId) -> Option<(Option<&Demand>, SimTime)> {
        if self.alternatives.is_empty() {
            return Some((None, 0));
        }
        self.alternatives
            .iter()
            .find_map(|d| rep.lock(d, at).map(|extra| (Some(d), extra)))
    }

    /// Start one service if the queue and resources allow it.
    fn try_start(&self, rep: &mut Replication<'_>, state: &mut ProcessState, at: StationId) -> Result<bool, SimError> {
        let now = rep.now();
        let len = state.queue.len();
        if len == 0 || len < self.batch_min as usize {
            state.batch_ready_at = None;
            return Ok(false);
        }
        if len < self.batch_max as usize {
            match state.batch_ready_at {
                None => {
                    state.batch_ready_at = Some(now + 1);
                    rep.schedule_in(1, EventKind::BatchWait { station: at });
                    return Ok(false);
                }
                Some(t) if now < t => return Ok(false),
                Some(_) => {}
            }
        }
        let Some((demand, extra)) = self.lock_any(rep, at) else {
            return Ok(false);
        };
        state.batch_ready_at = None;

        let count = len.min(self.batch_max as usize);
        let picked: Vec<usize> = rep
            .queue_scores(&state.queue, &self.priority, at)
            .into_iter()
            .take(count)
            .map(|(i, _)| i)
            .collect();
        let clients = rep.dequeue_many(at, &mut state.queue, &picked);
        self.drop_patience(rep, at, &clients);
        let Some(&first) = clients.first() else {
            return Err(SimError::Fatal(format!("station {at:?} started an empty batch")));
        };

        let client_type = rep.client_type_of(first);
        let mut duration = extra;
        if let Some(setup) = &self.setup_time {
            if state.last_type != Some(client_type) {
                duration += rep.sample_typed(setup, first, at);
            }
        }
        state.last_type = Some(client_type);
        duration += rep.sample_typed(&self.process_time, first, at);
        let post = match &self.post_process_time {
            Some(p) => rep.sample_typed(p, first, at),
            None => 0,
        };

        for &client in &clients {
            rep.book(client, TimeBucket::Process, duration);
            rep.record_process(at, duration);
            rep.release_after(at, client, self.next, duration);
        }
        if let Some(demand) = demand {
            rep.schedule_in(
                duration + post,
                EventKind::ResourceRelease {
                    station: at,
                    demand: demand.clone(),
                },
            );
        }
        Ok(true)
    }

    pub(crate) fn start_all(&self, rep: &mut Replication<'_>, state: &mut ProcessState, at: StationId) -> Result<(), SimError> {
        state.dequeuing = true;
        let mut result = Ok(());
        loop {
            match self.try_start(rep, state, at) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        state.dequeuing = false;
        result
    }

    /// Served or picked-up clients no longer wait, so their pending
    /// patience events are withdrawn.
    fn drop_patience(&self, rep: &mut Replication<'_>, at: StationId, clients: &[ClientKey]) {
        if self.cancel_after.is_none() || clients.is_empty() {
            return;
        }
        rep.cancel_events(|kind| {
            matches!(kind, EventKind::WaitingCancel { station, client } if *station == at && clients.contains(client))
        });
    }

    /// Waiting tolerance expired for `client`.
    pub(crate) fn cancel_waiting(&self, rep: &mut Replication<'_>, state: &mut ProcessState, at: StationId, client: ClientKey) {
        let Some(index) = state.queue.position(client) else {
            return;
        };
        if rep.dequeue_at(at, &mut state.queue, index).is_some() {
            state.cancelled.push(client);
            rep.schedule_leave(at, client, 0);
            rep.notify_state_change();
        }
    }
}

impl Links for ProcessStation {
    fn successors(&self) -> Vec<StationId> {
        let mut out = vec![self.next];
        out.extend(self.cancel_next);
        out
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        let mut out = vec![&mut self.next];
        out.extend(self.cancel_next.as_mut());
        out
    }
}

impl StationBehavior for ProcessStation {
    type State = ProcessState;

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) -> ProcessState {
        ProcessState::default()
    }

    fn arrival(&self, rep: &mut Replication<'_>, state: &mut ProcessState, at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.enqueue(at, &mut state.queue, client);
        if let Some(tolerance) = &self.cancel_after {
            let patience = rep.sample_typed(tolerance, client, at);
            rep.schedule_in(patience, EventKind::WaitingCancel { station: at, client });
        }
        self.start_all(rep, state, at)
    }

    fn leave(&self, _: &mut Replication<'_>, state: &mut ProcessState, _: StationId, client: ClientKey) -> Result<Forward, SimError> {
        if let Some(pos) = state.cancelled.iter().position(|&c| c == client) {
            state.cancelled.swap_remove(pos);
            if let Some(cancel_next) = self.cancel_next {
                return Ok(Forward::To(cancel_next));
            }
        }
        Ok(Forward::To(self.next))
    }
}

impl FreeResourcesListener for ProcessStation {
    fn waiting_priority(&self, rep: &mut Replication<'_>, state: &mut ProcessState, at: StationId) -> Option<(f64, SimTime)> {
        if state.queue.len() < self.batch_min as usize {
            return None;
        }
        let (index, score) = rep.queue_scores(&state.queue, &self.priority, at).into_iter().next()?;
        state.queue.get(index).map(|e| (score, e.enqueued_at))
    }

    fn resources_released(&self, rep: &mut Replication<'_>, state: &mut ProcessState, at: StationId) -> Result<bool, SimError> {
        state.dequeuing = true;
        let started = self.try_start(rep, state, at);
        state.dequeuing = false;
        started
    }
}

impl PickUpQueue for ProcessStation {
    fn queue_locked_for_pick_up(&self, state: &ProcessState) -> bool {
        state.dequeuing
    }

    fn pick_up(&self, rep: &mut Replication<'_>, state: &mut ProcessState, at: StationId, max: usize) -> Vec<ClientKey> {
        let mut picked = Vec::new();
        while picked.len() < max {
            let Some(client) = rep.dequeue_at(at, &mut state.queue, 0) else {
                break;
            };
            rep.leave_station(at, client);
            picked.push(client);
        }
        if state.queue.is_empty() {
            state.batch_ready_at = None;
        }
        self.drop_patience(rep, at, &picked);
        picked
    }
}
