//! Operators and their evaluation.

use procsim_core::expr::CalcError;

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

/// Arithmetic operation between two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

/// Apply an arithmetic operation. Division and modulo by zero are errors.
pub fn apply_arithmetic(left: f64, op: ArithmeticOp, right: f64) -> Result<f64, CalcError> {
    match op {
        ArithmeticOp::Add => Ok(left + right),
        ArithmeticOp::Subtract => Ok(left - right),
        ArithmeticOp::Multiply => Ok(left * right),
        ArithmeticOp::Divide => {
            if right == 0.0 {
                Err(CalcError::DivisionByZero)
            } else {
                Ok(left / right)
            }
        }
        ArithmeticOp::Modulo => {
            if right == 0.0 {
                Err(CalcError::DivisionByZero)
            } else {
                Ok(left % right)
            }
        }
        ArithmeticOp::Power => {
            let v = left.powf(right);
            if v.is_nan() {
                Err(CalcError::Domain("^".into()))
            } else {
                Ok(v)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison and logic
// ---------------------------------------------------------------------------

/// Comparison operator. Results are 1 for true and 0 for false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
    Ne,
}

pub fn compare(left: f64, op: ComparisonOp, right: f64) -> bool {
    match op {
        ComparisonOp::Gt => left > right,
        ComparisonOp::Lt => left < right,
        ComparisonOp::Eq => left == right,
        ComparisonOp::Gte => left >= right,
        ComparisonOp::Lte => left <= right,
        ComparisonOp::Ne => left != right,
    }
}

/// Any non-zero value is true.
pub fn truthy(value: f64) -> bool {
    value != 0.0
}

pub fn from_bool(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

pub fn apply_unary(op: UnaryOp, value: f64) -> f64 {
    match op {
        UnaryOp::Negate => -value,
        UnaryOp::Not => from_bool(!truthy(value)),
    }
}

/// Any binary operator of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Arithmetic(ArithmeticOp),
    Comparison(ComparisonOp),
    And,
    Or,
}

pub fn apply_binary(left: f64, op: BinaryOp, right: f64) -> Result<f64, CalcError> {
    match op {
        BinaryOp::Arithmetic(op) => apply_arithmetic(left, op, right),
        BinaryOp::Comparison(op) => Ok(from_bool(compare(left, op, right))),
        BinaryOp::And => Ok(from_bool(truthy(left) && truthy(right))),
        BinaryOp::Or => Ok(from_bool(truthy(left) || truthy(right))),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_basics() {
        assert_eq!(apply_arithmetic(2.0, ArithmeticOp::Add, 3.0), Ok(5.0));
        assert_eq!(apply_arithmetic(2.0, ArithmeticOp::Subtract, 3.0), Ok(-1.0));
        assert_eq!(apply_arithmetic(2.0, ArithmeticOp::Multiply, 3.0), Ok(6.0));
        assert_eq!(apply_arithmetic(3.0, ArithmeticOp::Divide, 2.0), Ok(1.5));
        assert_eq!(apply_arithmetic(7.0, ArithmeticOp::Modulo, 4.0), Ok(3.0));
        assert_eq!(apply_arithmetic(2.0, ArithmeticOp::Power, 10.0), Ok(1024.0));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(
            apply_arithmetic(1.0, ArithmeticOp::Divide, 0.0),
            Err(CalcError::DivisionByZero)
        );
        assert_eq!(
            apply_arithmetic(1.0, ArithmeticOp::Modulo, 0.0),
            Err(CalcError::DivisionByZero)
        );
    }

    #[test]
    fn negative_base_fractional_power_is_a_domain_error() {
        assert!(matches!(
            apply_arithmetic(-8.0, ArithmeticOp::Power, 0.5),
            Err(CalcError::Domain(_))
        ));
    }

    #[test]
    fn comparisons_yield_zero_or_one() {
        assert_eq!(apply_binary(2.0, BinaryOp::Comparison(ComparisonOp::Gt), 1.0), Ok(1.0));
        assert_eq!(apply_binary(2.0, BinaryOp::Comparison(ComparisonOp::Lte), 1.0), Ok(0.0));
        assert_eq!(apply_binary(2.0, BinaryOp::Comparison(ComparisonOp::Ne), 2.0), Ok(0.0));
    }

    #[test]
    fn logic_treats_non_zero_as_true() {
        assert_eq!(apply_binary(0.5, BinaryOp::And, -3.0), Ok(1.0));
        assert_eq!(apply_binary(0.0, BinaryOp::Or, 0.0), Ok(0.0));
        assert_eq!(apply_unary(UnaryOp::Not, 7.0), 0.0);
        assert_eq!(apply_unary(UnaryOp::Negate, 7.0), -7.0);
    }
}
