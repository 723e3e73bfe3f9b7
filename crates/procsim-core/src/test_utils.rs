//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use std::sync::Arc;

use crate::compile::compile;
use crate::config::RunConfig;
use crate::expr::{CalcError, CompiledExpr, EvalScope, Evaluator, ParseError};
use crate::model::*;
use crate::network::Network;
use crate::replication::Replication;
use crate::resource::Capacity;
use crate::stats::ReplicationStatistics;

// ===========================================================================
// Literal evaluator
// ===========================================================================

/// An evaluator that understands numbers, variable names and `time`, and
/// nothing else. Enough to drive the kernel without the full expression
/// language.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralEvaluator;

#[derive(Debug)]
enum Literal {
    Number(f64),
    Variable(usize),
    Time,
}

impl CompiledExpr for Literal {
    fn calc(&self, scope: &mut EvalScope<'_>) -> Result<f64, CalcError> {
        match *self {
            Literal::Number(v) => Ok(v),
            Literal::Variable(i) => scope
                .variables
                .get(i)
                .copied()
                .ok_or(CalcError::UnknownReference { what: "variable", id: i as i64 }),
            Literal::Time => Ok(scope.now),
        }
    }

    fn constant_value(&self) -> Option<f64> {
        match *self {
            Literal::Number(v) => Some(v),
            _ => None,
        }
    }
}

impl Evaluator for LiteralEvaluator {
    fn parse(&self, text: &str, variables: &[String]) -> Result<Arc<dyn CompiledExpr>, ParseError> {
        let text = text.trim();
        if let Ok(v) = text.parse::<f64>() {
            return Ok(Arc::new(Literal::Number(v)));
        }
        if text == "time" {
            return Ok(Arc::new(Literal::Time));
        }
        match variables.iter().position(|v| v == text) {
            Some(i) => Ok(Arc::new(Literal::Variable(i))),
            None => Err(ParseError::new(0, format!("unsupported literal `{text}`"))),
        }
    }
}

// ===========================================================================
// Model entities
// ===========================================================================

pub fn fixed_resource(name: &str, units: u32) -> ResourceDescription {
    ResourceDescription {
        name: name.into(),
        capacity: Capacity::Fixed { units },
        relocation_time: 0.0,
        cost_per_hour_busy: 0.0,
        cost_per_hour_idle: 0.0,
        cost_per_seize: 0.0,
    }
}

pub fn variable(name: &str, initial: f64) -> VariableDescription {
    VariableDescription {
        name: name.into(),
        initial,
    }
}

pub fn tank(name: &str, capacity: f64, valves: &[f64]) -> TankDescription {
    TankDescription {
        name: name.into(),
        capacity,
        initial: 0.0,
        valves: valves.to_vec(),
    }
}

// ===========================================================================
// Node constructors
// ===========================================================================

/// Constant interarrival source with the first arrival at time zero.
pub fn source(client_type: &str, every: f64, limit: Option<u64>, next: i64) -> NodeKind {
    NodeKind::Source(SourceDescription {
        client_type: client_type.into(),
        interarrival: TimeSpec::Constant(every),
        batch: 1,
        first_arrival: Some(0.0),
        limit,
        next,
    })
}

pub fn dispose() -> NodeKind {
    NodeKind::Dispose { stop_simulation: false }
}

pub fn delay(seconds: f64, next: i64) -> NodeKind {
    NodeKind::Delay(DelayDescription {
        time: TimeSpec::Constant(seconds).into(),
        bucket: Default::default(),
        next,
    })
}

/// Single-resource process with a constant process time.
pub fn process(resource: &str, seconds: f64, next: i64) -> NodeKind {
    NodeKind::Process(ProcessDescription {
        resources: vec![vec![ResourceUse {
            resource: resource.into(),
            units: 1,
        }]],
        process_time: TimeSpec::Constant(seconds).into(),
        next,
        ..ProcessDescription::default()
    })
}

pub fn seize(resource: &str, units: u32, next: i64) -> NodeKind {
    NodeKind::Seize(SeizeDescription {
        resources: vec![ResourceUse {
            resource: resource.into(),
            units,
        }],
        priority: TypedFormulaSpec::default(),
        next,
    })
}

pub fn release(seize: &str, next: i64) -> NodeKind {
    NodeKind::Release(ReleaseDescription {
        seize: seize.into(),
        delay: None,
        next,
    })
}

pub fn hold(condition: &str, next: i64) -> NodeKind {
    NodeKind::Hold(HoldDescription {
        condition: condition.into(),
        client_based: false,
        priority: None,
        max_wait: None,
        timed_checks: false,
        next,
    })
}

pub fn assign_variable(variable: &str, formula: &str, next: i64) -> NodeKind {
    NodeKind::Assign(AssignDescription {
        actions: vec![AssignActionDescription::Variable {
            variable: variable.into(),
            formula: formula.into(),
        }],
        next,
    })
}

// ===========================================================================
// Model builder helpers
// ===========================================================================

/// A model with the given client types and nothing else.
pub fn model(name: &str, client_types: &[&str]) -> ModelDescription {
    let mut m = ModelDescription::new(name);
    m.client_types = client_types.iter().map(|t| t.to_string()).collect();
    m
}

/// Compile with [`LiteralEvaluator`], panicking with every build error.
pub fn build(model: &ModelDescription) -> Network {
    match compile(model, &LiteralEvaluator) {
        Ok(net) => net,
        Err(errors) => {
            let lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            panic!("model `{}` failed to compile:\n{}", model.name, lines.join("\n"));
        }
    }
}

/// Run replication zero of `net` to completion.
pub fn run_once(net: &Network, config: RunConfig) -> ReplicationStatistics {
    Replication::new(net, config, 0).run()
}

/// Source -> process (one `server`) -> dispose, `clients` arrivals every
/// `every` seconds each served for `service` seconds.
pub fn single_server(clients: u64, every: f64, service: f64) -> ModelDescription {
    let mut m = model("single-server", &["job"]);
    m.resources.push(fixed_resource("server", 1));
    m.node(1, "Arrivals", source("job", every, Some(clients), 2))
        .node(2, "Machine", process("server", service, 3))
        .node(3, "Exit", dispose());
    m
}
