//! Routing decisions.
//!
//! A decide station picks one outgoing option when the client leaves. The
//! rule is one of: weighted chance, ordered conditions, client type, client
//! text value, a repeating sequence, or an external script.

use std::fmt;
use std::sync::Arc;

use crate::compile::BuildContext;
use crate::error::SimError;
use crate::expr::{ClientView, Formula};
use crate::id::{ClientKey, ClientTypeId, StationId};
use crate::model::{DecideDescription, DecideMode};
use crate::replication::Replication;

use super::{Forward, Links, StationBehavior};

// ---------------------------------------------------------------------------
// Script bridge
// ---------------------------------------------------------------------------

/// Read-only context handed to a decision script.
pub struct ScriptContext<'a> {
    /// Current simulated time in seconds.
    pub now: f64,
    pub client: Option<ClientView<'a>>,
    pub variables: &'a [f64],
    /// Number of options of the calling station.
    pub options: usize,
}

/// What a decision script produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptOutcome {
    /// 1-based option index.
    Number(f64),
    /// The script ran but chose nothing.
    Done,
}

/// A host-provided decision script, registered by name with the compiler.
pub trait ScriptBridge: Send + Sync + fmt::Debug {
    fn execute(&self, context: &ScriptContext<'_>) -> Result<ScriptOutcome, String>;
}

// ---------------------------------------------------------------------------
// Station
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum DecideRule {
    Chance {
        weights: Vec<Formula>,
        /// Normalized cumulative weights when every weight is constant.
        cumulative: Option<Vec<f64>>,
    },
    /// One condition per option except the last, which is the fallback.
    Condition(Vec<Formula>),
    ClientType(Vec<Vec<ClientTypeId>>),
    KeyValue { key: String, values: Vec<String> },
    /// Option indices in the order they are used, repeated forever.
    Sequence(Vec<usize>),
    Script(Arc<dyn ScriptBridge>),
}

#[derive(Debug, Clone)]
pub struct DecideOption {
    pub next: StationId,
    /// Clients taking this option change to this type.
    pub new_client_type: Option<ClientTypeId>,
}

#[derive(Debug, Clone)]
pub struct DecideStation {
    pub rule: DecideRule,
    pub options: Vec<DecideOption>,
}

#[derive(Debug, Default)]
pub struct DecideState {
    sequence_position: usize,
}

fn cumulative(weights: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = weights.iter().map(|w| w.max(0.0)).sum();
    if total <= 0.0 {
        return None;
    }
    let mut acc = 0.0;
    Some(
        weights
            .iter()
            .map(|w| {
                acc += w.max(0.0) / total;
                acc
            })
            .collect(),
    )
}

fn pick(cumulative: &[f64], draw: f64) -> usize {
    cumulative
        .iter()
        .position(|&c| draw < c)
        .unwrap_or(cumulative.len().saturating_sub(1))
}

impl DecideStation {
    pub(crate) fn build(desc: &DecideDescription, cx: &mut BuildContext<'_>) -> Self {
        if desc.options.is_empty() {
            cx.error("decide station has no options");
        }
        let fallback_free = desc.options.len().saturating_sub(1);
        let rule = match desc.mode {
            DecideMode::Chance => {
                let weights: Vec<Formula> = desc
                    .options
                    .iter()
                    .map(|o| cx.formula(o.rate.as_deref().unwrap_or("1")))
                    .collect();
                let constants: Option<Vec<f64>> = weights.iter().map(Formula::constant_value).collect();
                let cumulative = match constants {
                    Some(values) => {
                        let c = cumulative(&values);
                        if c.is_none() {
                            cx.error("chance weights sum to zero");
                        }
                        c
                    }
                    None => None,
                };
                DecideRule::Chance { weights, cumulative }
            }
            DecideMode::Condition => {
                let mut conditions = Vec::new();
                for (i, o) in desc.options.iter().take(fallback_free).enumerate() {
                    match &o.condition {
                        Some(text) => conditions.push(cx.formula(text)),
                        None => cx.error(format!("option {} has no condition", i + 1)),
                    }
                }
                DecideRule::Condition(conditions)
            }
            DecideMode::ClientType => DecideRule::ClientType(
                desc.options
                    .iter()
                    .take(fallback_free)
                    .map(|o| o.client_types.iter().map(|t| cx.client_type(t)).collect())
                    .collect(),
            ),
            DecideMode::KeyValue => {
                let key = desc.key.clone().unwrap_or_else(|| {
                    cx.error("key value decide needs a key");
                    String::new()
                });
                let values = desc
                    .options
                    .iter()
                    .take(fallback_free)
                    .map(|o| o.value.clone().unwrap_or_default())
                    .collect();
                DecideRule::KeyValue { key, values }
            }
            DecideMode::Sequence => {
                let order: Vec<usize> = desc
                    .options
                    .iter()
                    .enumerate()
                    .flat_map(|(i, o)| std::iter::repeat(i).take(o.multiplicity.unwrap_or(1) as usize))
                    .collect();
                if order.is_empty() && !desc.options.is_empty() {
                    cx.error("sequence multiplicities are all zero");
                }
                DecideRule::Sequence(order)
            }
            DecideMode::Script => {
                let name = desc.script.as_deref().unwrap_or_default();
                match cx.script(name) {
                    Some(script) => DecideRule::Script(script),
                    None => {
                        cx.error(format!("no script registered as `{name}`"));
                        DecideRule::Sequence(vec![0])
                    }
                }
            }
        };
        let options = desc
            .options
            .iter()
            .map(|o| DecideOption {
                next: cx.next(o.next),
                new_client_type: o.new_client_type.as_deref().map(|t| cx.client_type(t)),
            })
            .collect();
        Self { rule, options }
    }

    fn last(&self) -> usize {
        self.options.len().saturating_sub(1)
    }

    /// Index of the option `client` takes.
    fn choose(&self, rep: &mut Replication<'_>, state: &mut DecideState, at: StationId, client: ClientKey) -> usize {
        match &self.rule {
            DecideRule::Chance { weights, cumulative: fixed } => {
                let table = match fixed {
                    Some(c) => c.clone(),
                    None => {
                        let values: Vec<f64> = weights.iter().map(|w| rep.calc(w, Some(client), at)).collect();
                        match cumulative(&values) {
                            Some(c) => c,
                            None => {
                                rep.warn(format!("chance weights at `{}` sum to zero", rep.station_name(at)));
                                return 0;
                            }
                        }
                    }
                };
                let draw = rep.rng.next_f64();
                pick(&table, draw)
            }
            DecideRule::Condition(conditions) => conditions
                .iter()
                .position(|c| rep.calc_bool(c, Some(client), at))
                .unwrap_or(self.last()),
            DecideRule::ClientType(types) => {
                let ty = rep.client_type_of(client);
                types.iter().position(|set| set.contains(&ty)).unwrap_or(self.last())
            }
            DecideRule::KeyValue { key, values } => {
                let text = rep.client(client).and_then(|c| c.text(key)).map(str::to_owned);
                match text {
                    Some(text) => values.iter().position(|v| *v == text).unwrap_or(self.last()),
                    None => self.last(),
                }
            }
            DecideRule::Sequence(order) => {
                if order.is_empty() {
                    return 0;
                }
                let index = order[state.sequence_position % order.len()];
                state.sequence_position = (state.sequence_position + 1) % order.len();
                index
            }
            DecideRule::Script(script) => {
                let outcome = rep.run_script(script.as_ref(), client, self.options.len());
                match outcome {
                    Ok(ScriptOutcome::Number(n)) if n >= 1.0 && (n.round() as usize) <= self.options.len() => {
                        n.round() as usize - 1
                    }
                    Ok(other) => {
                        rep.warn(format!(
                            "script at `{}` returned no valid option: {other:?}",
                            rep.station_name(at)
                        ));
                        0
                    }
                    Err(message) => {
                        rep.warn(format!("script at `{}` failed: {message}", rep.station_name(at)));
                        0
                    }
                }
            }
        }
    }
}

impl Links for DecideStation {
    fn successors(&self) -> Vec<StationId> {
        self.options.iter().map(|o| o.next).collect()
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        self.options.iter_mut().map(|o| &mut o.next).collect()
    }
}

impl StationBehavior for DecideStation {
    type State = DecideState;

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) -> DecideState {
        DecideState::default()
    }

    fn arrival(&self, rep: &mut Replication<'_>, _: &mut DecideState, at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.schedule_leave(at, client, 0);
        Ok(())
    }

    fn leave(&self, rep: &mut Replication<'_>, state: &mut DecideState, at: StationId, client: ClientKey) -> Result<Forward, SimError> {
        let index = self.choose(rep, state, at, client);
        let option = self
            .options
            .get(index)
            .ok_or_else(|| SimError::Fatal(format!("decide station {at:?} has no option {index}")))?;
        if let Some(ty) = option.new_client_type {
            if let Some(c) = rep.client_mut(client) {
                c.type_id = ty;
            }
        }
        Ok(Forward::To(option.next))
    }
}
