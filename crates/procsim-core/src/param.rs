//! Compiled station parameters: durations and per-client-type formulas.

use crate::distribution::Distribution;
use crate::expr::Formula;
use crate::id::ClientTypeId;

/// A duration in seconds.
#[derive(Debug, Clone)]
pub enum TimeExpr {
    Distribution(Distribution),
    Formula(Formula),
}

impl TimeExpr {
    pub fn constant(seconds: f64) -> Self {
        TimeExpr::Distribution(Distribution::Deterministic { value: seconds })
    }

    /// The value if the duration never varies.
    pub fn constant_value(&self) -> Option<f64> {
        match self {
            TimeExpr::Distribution(d) => d.constant(),
            TimeExpr::Formula(f) => f.constant_value(),
        }
    }
}

/// A duration that may differ per client type, with an optional default.
#[derive(Debug, Clone, Default)]
pub struct TypedTime {
    pub default: Option<TimeExpr>,
    pub by_type: Vec<Option<TimeExpr>>,
}

impl TypedTime {
    pub fn constant(seconds: f64) -> Self {
        Self {
            default: Some(TimeExpr::constant(seconds)),
            by_type: Vec::new(),
        }
    }

    /// The duration for `client_type`, falling back to the default.
    pub fn get(&self, client_type: ClientTypeId) -> Option<&TimeExpr> {
        self.by_type
            .get(client_type.0 as usize)
            .and_then(Option::as_ref)
            .or(self.default.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_type.iter().all(Option::is_none)
    }
}

/// A formula that may differ per client type.
#[derive(Debug, Clone, Default)]
pub struct TypedFormula {
    pub default: Option<Formula>,
    pub by_type: Vec<Option<Formula>>,
}

impl TypedFormula {
    pub fn get(&self, client_type: ClientTypeId) -> Option<&Formula> {
        self.by_type
            .get(client_type.0 as usize)
            .and_then(Option::as_ref)
            .or(self.default.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_type.iter().all(Option::is_none)
    }
}
