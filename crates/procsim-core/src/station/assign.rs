use crate::client::MAX_NUMBER_SLOTS;
use crate::compile::BuildContext;
use crate::error::SimError;
use crate::expr::Formula;
use crate::id::{ClientKey, ClientTypeId, CounterId, SignalId, StationId, VariableId};
use crate::model::{AssignActionDescription, AssignDescription};
use crate::replication::Replication;

use super::{Forward, Links, StationBehavior};

#[derive(Debug, Clone)]
pub enum AssignAction {
    ClientType(ClientTypeId),
    Variable { variable: VariableId, formula: Formula },
    Number { slot: usize, formula: Formula },
    Text { key: String, value: String },
    /// Adds `increment` (default 1) to a user counter.
    Counter { counter: CounterId, increment: Option<Formula> },
    Signal(SignalId),
}

/// Applies a list of assignments to the passing client or to global state.
#[derive(Debug, Clone)]
pub struct AssignStation {
    pub actions: Vec<AssignAction>,
    pub next: StationId,
}

impl AssignStation {
    pub(crate) fn build(desc: &AssignDescription, cx: &mut BuildContext<'_>) -> Self {
        let actions = desc
            .actions
            .iter()
            .map(|a| match a {
                AssignActionDescription::ClientType { client_type } => AssignAction::ClientType(cx.client_type(client_type)),
                AssignActionDescription::Variable { variable, formula } => AssignAction::Variable {
                    variable: cx.variable(variable),
                    formula: cx.formula(formula),
                },
                AssignActionDescription::Number { slot, formula } => {
                    if *slot >= MAX_NUMBER_SLOTS {
                        cx.error(format!("number slot {slot} is out of range"));
                    }
                    AssignAction::Number {
                        slot: *slot,
                        formula: cx.formula(formula),
                    }
                }
                AssignActionDescription::Text { key, value } => AssignAction::Text {
                    key: key.clone(),
                    value: value.clone(),
                },
                AssignActionDescription::Counter { counter, increment } => AssignAction::Counter {
                    counter: cx.counter(counter),
                    increment: increment.as_deref().map(|f| cx.formula(f)),
                },
                AssignActionDescription::Signal { signal } => AssignAction::Signal(cx.signal(signal)),
            })
            .collect();
        Self {
            actions,
            next: cx.next(desc.next),
        }
    }

    fn apply(&self, rep: &mut Replication<'_>, at: StationId, client: ClientKey, action: &AssignAction) {
        match action {
            AssignAction::ClientType(ty) => {
                if let Some(c) = rep.client_mut(client) {
                    c.type_id = *ty;
                }
            }
            AssignAction::Variable { variable, formula } => {
                let value = rep.calc(formula, Some(client), at);
                rep.set_variable(*variable, value);
            }
            AssignAction::Number { slot, formula } => {
                let value = rep.calc(formula, Some(client), at);
                if let Some(c) = rep.client_mut(client) {
                    c.set_number(*slot, value);
                }
            }
            AssignAction::Text { key, value } => {
                if let Some(c) = rep.client_mut(client) {
                    c.set_text(key.as_str(), value.as_str());
                }
            }
            AssignAction::Counter { counter, increment } => {
                let by = match increment {
                    Some(f) => rep.calc(f, Some(client), at),
                    None => 1.0,
                };
                rep.add_to_counter(*counter, by);
            }
            AssignAction::Signal(signal) => rep.fire_signal(*signal),
        }
    }
}

impl Links for AssignStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.next]
    }
}

impl StationBehavior for AssignStation {
    type State = ();

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) {}

    fn arrival(&self, rep: &mut Replication<'_>, _: &mut (), at: StationId, client: ClientKey) -> Result<(), SimError> {
        for action in &self.actions {
            self.apply(rep, at, client, action);
        }
        rep.release_to(at, client, self.next);
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut (), _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}
