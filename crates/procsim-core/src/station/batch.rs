//! Batching: grouping clients by count (batch), by matching property
//! (match), and splitting temporary batches again (separate).

use crate::client::{Client, TimeBucket};
use crate::compile::BuildContext;
use crate::error::SimError;
use crate::event::EventKind;
use crate::expr::Formula;
use crate::id::{ClientKey, ClientTypeId, StationId};
use crate::model::{BatchDescription, BatchMode, MatchDescription, MatchProperty, TransferMode};
use crate::queue::WaitingQueue;
use crate::replication::Replication;
use crate::sim::SimTime;

use super::{Forward, Links, StationBehavior};

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Combine member values according to `mode`.
pub fn combine(mode: TransferMode, values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let folded = match mode {
        TransferMode::Off => return None,
        TransferMode::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        TransferMode::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        TransferMode::Mean => values.iter().sum::<f64>() / values.len() as f64,
        TransferMode::Sum => values.iter().sum(),
        TransferMode::Multiply => values.iter().product(),
    };
    Some(folded)
}

/// What happens to a completed group. Shared by batch and match stations.
#[derive(Debug, Clone)]
pub struct Grouping {
    pub mode: BatchMode,
    pub new_client_type: Option<ClientTypeId>,
    pub transfer_times: TransferMode,
    pub transfer_numbers: TransferMode,
    pub next: StationId,
}

impl Grouping {
    fn transfer_into(&self, carrier: &mut Client, members: &[&Client]) {
        for bucket in [TimeBucket::Waiting, TimeBucket::Transfer, TimeBucket::Process] {
            let values: Vec<f64> = members
                .iter()
                .map(|m| match bucket {
                    TimeBucket::Waiting => m.waiting,
                    TimeBucket::Transfer => m.transfer,
                    TimeBucket::Process => m.process,
                } as f64)
                .collect();
            if let Some(v) = combine(self.transfer_times, &values) {
                carrier.book(bucket, v.max(0.0).round() as SimTime);
            }
        }
        let slots = members.iter().map(|m| m.numbers.len()).max().unwrap_or(0);
        for slot in 0..slots {
            let values: Vec<f64> = members.iter().map(|m| m.number_slot(slot)).collect();
            if let Some(v) = combine(self.transfer_numbers, &values) {
                carrier.set_number(slot, v);
            }
        }
    }

    /// Send a completed group on.
    pub(crate) fn release(&self, rep: &mut Replication<'_>, at: StationId, members: Vec<ClientKey>) {
        let Some(&first) = members.first() else {
            return;
        };
        if self.mode == BatchMode::Collect {
            for m in members {
                rep.release_to(at, m, self.next);
            }
            return;
        }

        let client_type = self.new_client_type.unwrap_or_else(|| rep.client_type_of(first));
        let carrier = rep.create_client_at(at, client_type);
        let mut combined = rep.client(carrier).cloned();
        if let Some(carrier_copy) = combined.as_mut() {
            let refs: Vec<&Client> = members.iter().filter_map(|&m| rep.client(m)).collect();
            self.transfer_into(carrier_copy, &refs);
        }
        if let (Some(values), Some(c)) = (combined, rep.client_mut(carrier)) {
            c.waiting = values.waiting;
            c.transfer = values.transfer;
            c.process = values.process;
            c.numbers = values.numbers;
        }

        for &m in &members {
            rep.leave_station(at, m);
        }
        match self.mode {
            BatchMode::Temporary => {
                if let Some(c) = rep.client_mut(carrier) {
                    c.batch = members;
                }
            }
            _ => {
                for m in members {
                    rep.remove_client(m);
                }
            }
        }
        rep.release_to(at, carrier, self.next);
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Groups clients by count. A group forms as soon as `max` clients wait, or
/// one millisecond after at least `min` clients wait.
#[derive(Debug, Clone)]
pub struct BatchStation {
    pub min: Formula,
    pub max: Formula,
    pub grouping: Grouping,
}

#[derive(Debug, Default)]
pub struct BatchState {
    pub(crate) queue: WaitingQueue,
    wait_until: Option<SimTime>,
}

impl BatchStation {
    pub(crate) fn build(desc: &BatchDescription, cx: &mut BuildContext<'_>) -> Self {
        let min = cx.formula(&desc.min);
        let max = cx.formula(&desc.max);
        if min.constant_value().is_some_and(|v| v < 1.0) {
            cx.error("batch minimum must be at least 1");
        }
        Self {
            min,
            max,
            grouping: Grouping {
                mode: desc.mode,
                new_client_type: desc.new_client_type.as_deref().map(|t| cx.client_type(t)),
                transfer_times: desc.transfer_times,
                transfer_numbers: desc.transfer_numbers,
                next: cx.next(desc.next),
            },
        }
    }

    fn try_form(&self, rep: &mut Replication<'_>, state: &mut BatchState, at: StationId) -> bool {
        let waiting = state.queue.len();
        if waiting == 0 {
            state.wait_until = None;
            return false;
        }
        let min = rep.calc(&self.min, None, at);
        if min < 1.0 {
            rep.emergency_shutdown(format!(
                "batch minimum at `{}` evaluated to {min}",
                rep.station_name(at)
            ));
            return false;
        }
        let min = min.floor() as usize;
        let max = (rep.calc(&self.max, None, at).floor().max(0.0) as usize).max(min);

        let size = if waiting >= max {
            max
        } else if waiting >= min {
            let now = rep.now();
            match state.wait_until {
                None => {
                    state.wait_until = Some(now + 1);
                    rep.schedule_in(1, EventKind::BatchWait { station: at });
                    return false;
                }
                Some(t) if now < t => return false,
                Some(_) => waiting,
            }
        } else {
            state.wait_until = None;
            return false;
        };

        state.wait_until = None;
        let members: Vec<ClientKey> = (0..size)
            .filter_map(|_| rep.dequeue_at(at, &mut state.queue, 0))
            .collect();
        self.grouping.release(rep, at, members);
        true
    }

    pub(crate) fn form_all(&self, rep: &mut Replication<'_>, state: &mut BatchState, at: StationId) {
        while !rep.is_stopped() && self.try_form(rep, state, at) {}
    }
}

impl Links for BatchStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.grouping.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.grouping.next]
    }
}

impl StationBehavior for BatchStation {
    type State = BatchState;

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) -> BatchState {
        BatchState::default()
    }

    fn arrival(&self, rep: &mut Replication<'_>, state: &mut BatchState, at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.enqueue(at, &mut state.queue, client);
        self.form_all(rep, state, at);
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut BatchState, _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.grouping.next))
    }
}

// ---------------------------------------------------------------------------
// Separate
// ---------------------------------------------------------------------------

/// Splits a temporary batch. Members continue individually; the carrier's
/// accumulated times are added to each member and the carrier is removed.
/// Clients without a batch pass through.
#[derive(Debug, Clone)]
pub struct SeparateStation {
    pub next: StationId,
}

impl Links for SeparateStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.next]
    }
}

impl StationBehavior for SeparateStation {
    type State = ();

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) {}

    fn arrival(&self, rep: &mut Replication<'_>, _: &mut (), at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.schedule_leave(at, client, 0);
        Ok(())
    }

    fn leave(&self, rep: &mut Replication<'_>, _: &mut (), _: StationId, client: ClientKey) -> Result<Forward, SimError> {
        let Some(carrier) = rep.client_mut(client) else {
            return Ok(Forward::Consumed);
        };
        if carrier.batch.is_empty() {
            return Ok(Forward::To(self.next));
        }
        let members = std::mem::take(&mut carrier.batch);
        let (waiting, transfer, process) = (carrier.waiting, carrier.transfer, carrier.process);
        for &m in &members {
            if let Some(member) = rep.client_mut(m) {
                member.book(TimeBucket::Waiting, waiting);
                member.book(TimeBucket::Transfer, transfer);
                member.book(TimeBucket::Process, process);
            }
        }
        rep.remove_client(client);
        Ok(Forward::Many(members.into_iter().map(|m| (m, self.next)).collect()))
    }
}

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum MatchKey {
    /// Any one client from every incoming edge.
    None,
    Number(usize),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
enum KeyValue {
    Any,
    Number(f64),
    Text(Option<String>),
}

/// Waits for one client from every incoming station with an equal key and
/// groups them.
#[derive(Debug, Clone)]
pub struct MatchStation {
    pub key: MatchKey,
    pub grouping: Grouping,
    /// Predecessor stations, one queue each. Resolved after compilation.
    pub incoming: Vec<StationId>,
}

#[derive(Debug, Default)]
pub struct MatchState {
    pub(crate) queues: Vec<WaitingQueue>,
}

impl MatchStation {
    pub(crate) fn build(desc: &MatchDescription, cx: &mut BuildContext<'_>) -> Self {
        let key = match &desc.property {
            MatchProperty::None => MatchKey::None,
            MatchProperty::Number { slot } => MatchKey::Number(*slot),
            MatchProperty::Text { key } => MatchKey::Text(key.clone()),
        };
        Self {
            key,
            grouping: Grouping {
                mode: desc.mode,
                new_client_type: desc.new_client_type.as_deref().map(|t| cx.client_type(t)),
                transfer_times: desc.transfer_times,
                transfer_numbers: desc.transfer_numbers,
                next: cx.next(desc.next),
            },
            incoming: Vec::new(),
        }
    }

    fn key_of(&self, rep: &Replication<'_>, client: ClientKey) -> KeyValue {
        let c = rep.client(client);
        match &self.key {
            MatchKey::None => KeyValue::Any,
            MatchKey::Number(slot) => KeyValue::Number(c.map_or(0.0, |c| c.number_slot(*slot))),
            MatchKey::Text(key) => KeyValue::Text(c.and_then(|c| c.text(key)).map(str::to_owned)),
        }
    }

    /// Positions of one matching client per queue, if a full match exists.
    fn find_match(&self, rep: &Replication<'_>, state: &MatchState) -> Option<Vec<usize>> {
        let (first, rest) = state.queues.split_first()?;
        'candidates: for (i, entry) in first.iter().enumerate() {
            let key = self.key_of(rep, entry.client);
            let mut positions = vec![i];
            for queue in rest {
                match queue.iter().position(|e| self.key_of(rep, e.client) == key) {
                    Some(p) => positions.push(p),
                    None => continue 'candidates,
                }
            }
            return Some(positions);
        }
        None
    }
}

impl Links for MatchStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.grouping.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        let mut out = vec![&mut self.grouping.next];
        out.extend(self.incoming.iter_mut());
        out
    }
}

impl StationBehavior for MatchStation {
    type State = MatchState;

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) -> MatchState {
        MatchState {
            queues: self.incoming.iter().map(|_| WaitingQueue::new()).collect(),
        }
    }

    fn arrival(&self, rep: &mut Replication<'_>, state: &mut MatchState, at: StationId, client: ClientKey) -> Result<(), SimError> {
        let from = rep.client(client).and_then(|c| c.last_station);
        let Some(index) = from.and_then(|f| self.incoming.iter().position(|&s| s == f)) else {
            rep.warn(format!(
                "client reached match station `{}` from an unconnected station",
                rep.station_name(at)
            ));
            rep.release_to(at, client, self.grouping.next);
            return Ok(());
        };
        rep.enqueue(at, &mut state.queues[index], client);
        while let Some(positions) = self.find_match(rep, state) {
            let members: Vec<ClientKey> = positions
                .into_iter()
                .zip(state.queues.iter_mut())
                .filter_map(|(p, queue)| rep.dequeue_at(at, queue, p))
                .collect();
            self.grouping.release(rep, at, members);
        }
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut MatchState, _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.grouping.next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_modes() {
        let v = [2.0, 3.0, 4.0];
        assert_eq!(combine(TransferMode::Off, &v), None);
        assert_eq!(combine(TransferMode::Min, &v), Some(2.0));
        assert_eq!(combine(TransferMode::Max, &v), Some(4.0));
        assert_eq!(combine(TransferMode::Mean, &v), Some(3.0));
        assert_eq!(combine(TransferMode::Sum, &v), Some(9.0));
        assert_eq!(combine(TransferMode::Multiply, &v), Some(24.0));
        assert_eq!(combine(TransferMode::Sum, &[]), None);
    }
}
