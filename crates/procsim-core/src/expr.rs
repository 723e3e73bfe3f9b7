//! Expression evaluator contract.
//!
//! Almost every station parameter can be a formula. The kernel does not parse
//! formulas itself; it consumes an [`Evaluator`] that compiles text against
//! the model's variable table into a read-only [`CompiledExpr`]. Compiled
//! expressions are `Arc`-shared across replication threads and must be free
//! of interior mutability; all per-evaluation working memory lives in the
//! scratch buffer carried by [`EvalScope`], which each replication owns.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A formula could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("formula error at position {position}: {message}")]
pub struct ParseError {
    /// Zero-based character offset of the problem.
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Evaluating a compiled formula failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("argument out of domain for {0}")]
    Domain(String),
    #[error("unknown {what} {id}")]
    UnknownReference { what: &'static str, id: i64 },
    #[error("no client in scope")]
    NoClient,
    #[error("result is not a finite number")]
    NotFinite,
    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Evaluation scope
// ---------------------------------------------------------------------------

/// Read access to live replication state for formulas that reference
/// stations, resources, tanks and counters by number.
pub trait StationQuery {
    /// Clients currently at the station with the given model id.
    fn clients_at_station(&self, model_id: i64) -> Option<f64>;
    /// Clients waiting in the station's queue.
    fn clients_in_queue(&self, model_id: i64) -> Option<f64>;
    /// Units of a resource (1-based) currently in use.
    fn resource_in_use(&self, resource: i64) -> Option<f64>;
    /// Current fill level of a tank (1-based).
    fn tank_level(&self, tank: i64) -> Option<f64>;
    /// Current value of an analog value (1-based).
    fn analog_value(&self, analog: i64) -> Option<f64>;
    /// Current value of a user counter (1-based).
    fn counter(&self, counter: i64) -> Option<f64>;
    /// Clients currently in the whole system.
    fn clients_in_system(&self) -> f64;
}

/// A query with nothing in it. Useful for constant folding and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyQuery;

impl StationQuery for EmptyQuery {
    fn clients_at_station(&self, _: i64) -> Option<f64> {
        None
    }
    fn clients_in_queue(&self, _: i64) -> Option<f64> {
        None
    }
    fn resource_in_use(&self, _: i64) -> Option<f64> {
        None
    }
    fn tank_level(&self, _: i64) -> Option<f64> {
        None
    }
    fn analog_value(&self, _: i64) -> Option<f64> {
        None
    }
    fn counter(&self, _: i64) -> Option<f64> {
        None
    }
    fn clients_in_system(&self) -> f64 {
        0.0
    }
}

/// The client a formula is evaluated for. Times are in seconds.
#[derive(Debug, Clone, Copy)]
pub struct ClientView<'a> {
    pub type_id: u32,
    pub number: u64,
    pub waiting: f64,
    pub transfer: f64,
    pub process: f64,
    pub residence: f64,
    pub numbers: &'a [f64],
    pub texts: &'a BTreeMap<String, String>,
}

impl ClientView<'_> {
    /// User number slot `index`; unset slots read as zero.
    pub fn number_slot(&self, index: usize) -> f64 {
        self.numbers.get(index).copied().unwrap_or(0.0)
    }
}

/// Everything a formula may read, plus the caller-owned scratch buffer.
pub struct EvalScope<'a> {
    /// Current values of the model variables, in declaration order.
    pub variables: &'a [f64],
    /// Current simulated time in seconds.
    pub now: f64,
    pub client: Option<ClientView<'a>>,
    pub query: &'a dyn StationQuery,
    /// Working memory for the evaluator. Cleared by the evaluator as needed.
    pub scratch: &'a mut Vec<f64>,
}

// ---------------------------------------------------------------------------
// Evaluator traits
// ---------------------------------------------------------------------------

/// A compiled, immutable formula.
pub trait CompiledExpr: Send + Sync + fmt::Debug {
    fn calc(&self, scope: &mut EvalScope<'_>) -> Result<f64, CalcError>;

    /// The value if the formula does not depend on any runtime input.
    fn constant_value(&self) -> Option<f64> {
        None
    }
}

/// Compiles formula text against a variable table.
pub trait Evaluator: Send + Sync {
    fn parse(&self, text: &str, variables: &[String]) -> Result<Arc<dyn CompiledExpr>, ParseError>;

    /// Syntax check only. The default compiles and discards.
    fn check(&self, text: &str, variables: &[String]) -> Result<(), ParseError> {
        self.parse(text, variables).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Formula
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ConstExpr(f64);

impl CompiledExpr for ConstExpr {
    fn calc(&self, _: &mut EvalScope<'_>) -> Result<f64, CalcError> {
        Ok(self.0)
    }

    fn constant_value(&self) -> Option<f64> {
        Some(self.0)
    }
}

/// A formula as stored on a compiled station: source text for diagnostics
/// plus the shared compiled form.
#[derive(Clone)]
pub struct Formula {
    text: String,
    compiled: Arc<dyn CompiledExpr>,
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Formula({:?})", self.text)
    }
}

impl Formula {
    pub fn new(text: impl Into<String>, compiled: Arc<dyn CompiledExpr>) -> Self {
        Self {
            text: text.into(),
            compiled,
        }
    }

    /// A formula that always yields `value`.
    pub fn constant(value: f64) -> Self {
        Self {
            text: format!("{value}"),
            compiled: Arc::new(ConstExpr(value)),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn constant_value(&self) -> Option<f64> {
        self.compiled.constant_value()
    }

    /// Evaluate. Non-finite results are reported as [`CalcError::NotFinite`].
    pub fn eval(&self, scope: &mut EvalScope<'_>) -> Result<f64, CalcError> {
        let value = self.compiled.calc(scope)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(CalcError::NotFinite)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_formula_evaluates() {
        let f = Formula::constant(4.5);
        let mut scratch = Vec::new();
        let mut scope = EvalScope {
            variables: &[],
            now: 0.0,
            client: None,
            query: &EmptyQuery,
            scratch: &mut scratch,
        };
        assert_eq!(f.eval(&mut scope), Ok(4.5));
        assert_eq!(f.constant_value(), Some(4.5));
        assert_eq!(f.text(), "4.5");
    }

    #[test]
    fn non_finite_results_are_errors() {
        let f = Formula::constant(f64::INFINITY);
        let mut scratch = Vec::new();
        let mut scope = EvalScope {
            variables: &[],
            now: 0.0,
            client: None,
            query: &EmptyQuery,
            scratch: &mut scratch,
        };
        assert_eq!(f.eval(&mut scope), Err(CalcError::NotFinite));
    }

    #[test]
    fn client_view_reads_missing_slots_as_zero() {
        let texts = BTreeMap::new();
        let view = ClientView {
            type_id: 0,
            number: 1,
            waiting: 0.0,
            transfer: 0.0,
            process: 0.0,
            residence: 0.0,
            numbers: &[1.5],
            texts: &texts,
        };
        assert_eq!(view.number_slot(0), 1.5);
        assert_eq!(view.number_slot(5), 0.0);
    }
}
