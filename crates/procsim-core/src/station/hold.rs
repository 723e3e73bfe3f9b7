use crate::compile::BuildContext;
use crate::error::SimError;
use crate::event::EventKind;
use crate::expr::Formula;
use crate::id::{ClientKey, StationId};
use crate::model::{HoldDescription, TypedFormulaSpec};
use crate::param::TypedFormula;
use crate::queue::WaitingQueue;
use crate::replication::Replication;
use crate::sim::{SimTime, to_sim_time};

use super::{Forward, Links, PickUpQueue, StateChangeListener, StationBehavior};

/// Keeps clients until a condition holds or their maximum wait expires.
#[derive(Debug, Clone)]
pub struct HoldStation {
    pub condition: Formula,
    /// Evaluate the condition for each waiting client.
    pub client_based: bool,
    pub priority: TypedFormula,
    pub max_wait: Option<SimTime>,
    pub timed_checks: bool,
    pub next: StationId,
}

#[derive(Debug, Default)]
pub struct HoldState {
    pub(crate) queue: WaitingQueue,
    /// Set while a re-check scans the queue.
    scanning: bool,
}

impl HoldStation {
    pub(crate) fn build(desc: &HoldDescription, cx: &mut BuildContext<'_>) -> Self {
        let priority = TypedFormulaSpec {
            default: desc.priority.clone(),
            ..TypedFormulaSpec::default()
        };
        Self {
            condition: cx.formula(&desc.condition),
            client_based: desc.client_based,
            priority: cx.typed_formula(&priority),
            max_wait: desc.max_wait.map(to_sim_time),
            timed_checks: desc.timed_checks,
            next: cx.next(desc.next),
        }
    }
}

impl Links for HoldStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.next]
    }
}

impl StationBehavior for HoldStation {
    type State = HoldState;

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) -> HoldState {
        HoldState::default()
    }

    fn arrival(&self, rep: &mut Replication<'_>, state: &mut HoldState, at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.enqueue(at, &mut state.queue, client);
        if let Some(wait) = self.max_wait {
            rep.schedule_in(wait, EventKind::HoldTimeout { station: at });
        }
        rep.notify_state_change();
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut HoldState, _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}

impl StateChangeListener for HoldStation {
    fn interested(&self, state: &HoldState) -> bool {
        !state.queue.is_empty()
    }

    /// Releases at most one client per call.
    fn recheck(&self, rep: &mut Replication<'_>, state: &mut HoldState, at: StationId) -> Result<bool, SimError> {
        if state.queue.is_empty() {
            return Ok(false);
        }
        state.scanning = true;
        let released = self.release_one(rep, state, at);
        state.scanning = false;
        Ok(released)
    }

    fn wants_timed_checks(&self, state: &HoldState) -> bool {
        self.timed_checks && !state.queue.is_empty()
    }
}

impl HoldStation {
    fn release_one(&self, rep: &mut Replication<'_>, state: &mut HoldState, at: StationId) -> bool {
        let now = rep.now();
        // With a priority formula and per-client conditions only clients
        // scoring above zero are eligible.
        let positive_only = self.client_based && !self.priority.is_empty();
        let global = if self.client_based {
            None
        } else {
            Some(rep.calc_bool(&self.condition, None, at))
        };
        for (index, score) in rep.queue_scores(&state.queue, &self.priority, at) {
            let Some(entry) = state.queue.get(index) else {
                continue;
            };
            let client = entry.client;
            let expired = self
                .max_wait
                .is_some_and(|w| now >= entry.enqueued_at.saturating_add(w));
            if positive_only && score <= 0.0 && !expired {
                continue;
            }
            let pass = expired
                || match global {
                    Some(open) => open,
                    None => rep.calc_bool(&self.condition, Some(client), at),
                };
            if pass {
                if let Some(client) = rep.dequeue_at(at, &mut state.queue, index) {
                    rep.release_to(at, client, self.next);
                    return true;
                }
            }
            if global == Some(false) && self.max_wait.is_none() {
                break;
            }
        }
        false
    }
}

impl PickUpQueue for HoldStation {
    fn queue_locked_for_pick_up(&self, state: &HoldState) -> bool {
        state.scanning
    }

    fn pick_up(&self, rep: &mut Replication<'_>, state: &mut HoldState, at: StationId, max: usize) -> Vec<ClientKey> {
        let mut picked = Vec::new();
        while picked.len() < max {
            let Some(client) = rep.dequeue_at(at, &mut state.queue, 0) else {
                break;
            };
            rep.leave_station(at, client);
            picked.push(client);
        }
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::model::NodeKind;
    use crate::network::Network;
    use crate::station::{StateSlot, dispatch};
    use crate::test_utils::*;

    fn gated(desc: HoldDescription, clients: u64) -> Network {
        let mut m = model("gated", &["job"]);
        m.node(1, "Arrivals", source("job", 1.0, Some(clients), 2))
            .node(2, "Gate", NodeKind::Hold(desc))
            .node(3, "Exit", dispose());
        build(&m)
    }

    fn per_client(priority: &str) -> HoldDescription {
        HoldDescription {
            condition: "1".into(),
            client_based: true,
            priority: Some(priority.into()),
            max_wait: None,
            timed_checks: false,
            next: 3,
        }
    }

    fn take(rep: &mut Replication<'_>, at: StationId) -> HoldState {
        rep.take_state(at).unwrap().and_then(HoldState::from_slot).unwrap()
    }

    #[test]
    fn client_based_priority_releases_only_positive_scores() {
        for priority in ["0", "-1"] {
            let stats = run_once(&gated(per_client(priority), 2), RunConfig::default());
            assert_eq!(stats.clients_disposed, 0, "priority {priority}");
            assert_eq!(stats.clients_in_system, 2, "priority {priority}");
            assert_eq!(stats.station("Gate").unwrap().departures, 0);
        }

        let stats = run_once(&gated(per_client("2"), 2), RunConfig::default());
        assert_eq!(stats.clients_disposed, 2);
    }

    #[test]
    fn zero_priority_still_passes_a_global_condition() {
        let desc = HoldDescription {
            client_based: false,
            ..per_client("0")
        };
        let stats = run_once(&gated(desc, 2), RunConfig::default());
        assert_eq!(stats.clients_disposed, 2);
    }

    #[test]
    fn pick_up_skips_the_queue_while_it_is_scanned() {
        let net = gated(
            HoldDescription {
                condition: "0".into(),
                client_based: false,
                priority: None,
                ..per_client("1")
            },
            1,
        );
        let gate = net.find("Gate").unwrap();
        let mut rep = Replication::new(&net, RunConfig::default(), 0);
        rep.run_until(0);

        let mut state = take(&mut rep, gate);
        assert_eq!(state.queue.len(), 1);
        state.scanning = true;
        rep.put_state(gate, state.into_slot());
        assert!(dispatch::pick_up(&mut rep, gate, 1).unwrap().is_empty());

        let mut state = take(&mut rep, gate);
        state.scanning = false;
        rep.put_state(gate, state.into_slot());
        assert_eq!(dispatch::pick_up(&mut rep, gate, 1).unwrap().len(), 1);
        assert!(take(&mut rep, gate).queue.is_empty());
    }
}
