//! Formula language for procsim models.
//!
//! [`ExprEvaluator`] implements the kernel's [`Evaluator`] contract. A
//! formula is tokenized, parsed into a syntax tree, constant-folded and
//! compiled into a postfix [`program::Program`]. Programs are immutable and
//! evaluate on the scratch stack the replication passes in.
//!
//! # Language
//!
//! - Numbers: `12`, `0.5`, `1e-3`. Constants `pi`, `e`, `true`, `false`.
//! - Arithmetic `+ - * / % ^`, comparisons `= == <> != < <= > >=`, logic
//!   `&& || !` (`&`, `|` also accepted). Comparisons and logic yield 1 or 0;
//!   any non-zero value counts as true.
//! - Model variables by name. Variables shadow every built-in name.
//! - Scope values: `time`, `WIP`, `ClientNumber`, `ClientType`,
//!   `WaitingTime`, `TransferTime`, `ProcessTime`, `ResidenceTime`.
//! - Functions: `abs sqrt exp ln log floor ceil round sign sin cos tan`,
//!   `pow(x, y)`, `min(...)`, `max(...)`, `if(condition, then, else)`.
//! - State queries: `N(station)`, `NQ(station)` by model id, and
//!   `Resource(i)`, `Tank(i)`, `Analog(i)`, `Counter(i)`, `ClientData(i)`
//!   one-based.
//!
//! Built-in names are case-insensitive; variable names are not.

pub mod function;
pub mod ops;
pub mod parser;
pub mod program;
pub mod token;

use std::sync::Arc;

use procsim_core::expr::{CompiledExpr, Evaluator, ParseError};
use tracing::trace;

use program::{Program, fold};

/// The standard evaluator.
#[derive(Debug, Clone, Copy)]
pub struct ExprEvaluator {
    fold_constants: bool,
}

impl Default for ExprEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprEvaluator {
    pub fn new() -> Self {
        Self {
            fold_constants: true,
        }
    }

    /// An evaluator that compiles formulas exactly as written.
    pub fn without_folding() -> Self {
        Self {
            fold_constants: false,
        }
    }

    /// Compile to the concrete program type.
    pub fn compile(&self, text: &str, variables: &[String]) -> Result<Program, ParseError> {
        let mut node = parser::parse(text, variables)?;
        if self.fold_constants {
            node = fold(node);
        }
        let program = Program::compile(&node);
        trace!(
            formula = text,
            instructions = program.instructions().len(),
            "compiled formula"
        );
        Ok(program)
    }
}

impl Evaluator for ExprEvaluator {
    fn parse(&self, text: &str, variables: &[String]) -> Result<Arc<dyn CompiledExpr>, ParseError> {
        Ok(Arc::new(self.compile(text, variables)?))
    }

    fn check(&self, text: &str, variables: &[String]) -> Result<(), ParseError> {
        parser::parse(text, variables).map(|_| ())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use procsim_core::expr::{CalcError, ClientView, EvalScope, StationQuery};

    /// Station 7 holds three clients, two of them queued. Resource 1 has
    /// four units in use.
    struct Shop;

    impl StationQuery for Shop {
        fn clients_at_station(&self, id: i64) -> Option<f64> {
            (id == 7).then_some(3.0)
        }
        fn clients_in_queue(&self, id: i64) -> Option<f64> {
            (id == 7).then_some(2.0)
        }
        fn resource_in_use(&self, id: i64) -> Option<f64> {
            (id == 1).then_some(4.0)
        }
        fn tank_level(&self, id: i64) -> Option<f64> {
            (id == 1).then_some(55.5)
        }
        fn analog_value(&self, _: i64) -> Option<f64> {
            None
        }
        fn counter(&self, id: i64) -> Option<f64> {
            (id == 2).then_some(9.0)
        }
        fn clients_in_system(&self) -> f64 {
            11.0
        }
    }

    fn eval_with(text: &str, client: Option<ClientView<'_>>) -> Result<f64, CalcError> {
        let vars = vec!["queue_limit".to_string(), "open".to_string()];
        let compiled = ExprEvaluator::new().parse(text, &vars).unwrap();
        let mut scratch = Vec::new();
        let mut scope = EvalScope {
            variables: &[5.0, 1.0],
            now: 100.0,
            client,
            query: &Shop,
            scratch: &mut scratch,
        };
        compiled.calc(&mut scope)
    }

    fn eval(text: &str) -> Result<f64, CalcError> {
        eval_with(text, None)
    }

    #[test]
    fn station_queries() {
        assert_eq!(eval("NQ(7) < queue_limit"), Ok(1.0));
        assert_eq!(eval("N(7) - NQ(7)"), Ok(1.0));
        assert_eq!(eval("Resource(1) / 2"), Ok(2.0));
        assert_eq!(eval("Tank(1) >= 50 && open"), Ok(1.0));
        assert_eq!(eval("Counter(2) + WIP"), Ok(20.0));
        assert_eq!(
            eval("Analog(1)"),
            Err(CalcError::UnknownReference { what: "analog value", id: 1 })
        );
    }

    #[test]
    fn client_values() {
        let texts = BTreeMap::new();
        let client = ClientView {
            type_id: 1,
            number: 42,
            waiting: 3.0,
            transfer: 0.5,
            process: 2.0,
            residence: 6.0,
            numbers: &[10.0, 20.0],
            texts: &texts,
        };
        assert_eq!(eval_with("ClientNumber", Some(client)), Ok(42.0));
        assert_eq!(eval_with("clienttype", Some(client)), Ok(2.0));
        assert_eq!(
            eval_with("WaitingTime + TransferTime + ProcessTime", Some(client)),
            Ok(5.5)
        );
        assert_eq!(eval_with("ClientData(2) - ClientData(1)", Some(client)), Ok(10.0));
        assert_eq!(eval_with("ClientData(9)", Some(client)), Ok(0.0));
        assert!(eval_with("ClientData(0)", Some(client)).is_err());
    }

    #[test]
    fn constant_formulas_report_their_value() {
        let e = ExprEvaluator::new();
        let c = e.parse("60 * 2", &[]).unwrap();
        assert_eq!(c.constant_value(), Some(120.0));
        let c = ExprEvaluator::without_folding().parse("60 * 2", &[]).unwrap();
        assert_eq!(c.constant_value(), None);
    }

    #[test]
    fn check_reports_syntax_errors_only() {
        let e = ExprEvaluator::new();
        assert!(e.check("1 / 0", &[]).is_ok());
        assert!(e.check("1 +", &[]).is_err());
        assert!(e.check("queue_limit", &[]).is_err());
        assert!(e.check("queue_limit", &["queue_limit".to_string()]).is_ok());
    }

    #[test]
    fn evaluator_is_usable_as_trait_object() {
        let e: &dyn Evaluator = &ExprEvaluator::default();
        assert!(e.parse("time", &[]).unwrap().constant_value().is_none());
    }
}
