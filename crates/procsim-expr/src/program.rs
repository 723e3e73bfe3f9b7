//! Constant folding, code generation and the stack interpreter.
//!
//! A compiled [`Program`] is a flat postfix instruction list. It holds no
//! mutable state: the operand stack lives in the caller's scratch buffer,
//! so one program is shared by every replication thread.

use procsim_core::expr::{CalcError, CompiledExpr, EvalScope};

use crate::function::{Function, Query, ScopeValue};
use crate::ops::{BinaryOp, UnaryOp, apply_binary, apply_unary, truthy};
use crate::parser::Node;

// ---------------------------------------------------------------------------
// Folding
// ---------------------------------------------------------------------------

/// Replace every subtree that does not read the scope with its value.
/// Subtrees whose evaluation fails are kept, so the error surfaces at run
/// time with the normal calculation-error policy.
pub fn fold(node: Node) -> Node {
    match node {
        Node::Unary(op, a) => match fold(*a) {
            Node::Number(v) => Node::Number(apply_unary(op, v)),
            a => Node::Unary(op, Box::new(a)),
        },
        Node::Binary(op, a, b) => match (fold(*a), fold(*b)) {
            (Node::Number(l), Node::Number(r)) => match apply_binary(l, op, r) {
                Ok(v) if v.is_finite() => Node::Number(v),
                _ => Node::Binary(op, Box::new(Node::Number(l)), Box::new(Node::Number(r))),
            },
            (a, b) => Node::Binary(op, Box::new(a), Box::new(b)),
        },
        Node::Call(f, args) => {
            let args: Vec<Node> = args.into_iter().map(fold).collect();
            let values: Option<Vec<f64>> = args
                .iter()
                .map(|a| match a {
                    Node::Number(v) => Some(*v),
                    _ => None,
                })
                .collect();
            match values.map(|v| f.apply(&v)) {
                Some(Ok(v)) if v.is_finite() => Node::Number(v),
                _ => Node::Call(f, args),
            }
        }
        Node::Query(q, a) => Node::Query(q, Box::new(fold(*a))),
        Node::If(c, a, b) => match fold(*c) {
            Node::Number(v) if truthy(v) => fold(*a),
            Node::Number(_) => fold(*b),
            c => Node::If(Box::new(c), Box::new(fold(*a)), Box::new(fold(*b))),
        },
        leaf => leaf,
    }
}

// ---------------------------------------------------------------------------
// Code generation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instr {
    Push(f64),
    Variable(usize),
    Scope(ScopeValue),
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Call with this many arguments from the top of the stack.
    Call(Function, usize),
    Query(Query),
    JumpIfFalse(usize),
    Jump(usize),
}

fn emit(node: &Node, code: &mut Vec<Instr>) {
    match node {
        Node::Number(v) => code.push(Instr::Push(*v)),
        Node::Variable(i) => code.push(Instr::Variable(*i)),
        Node::Scope(s) => code.push(Instr::Scope(*s)),
        Node::Unary(op, a) => {
            emit(a, code);
            code.push(Instr::Unary(*op));
        }
        Node::Binary(op, a, b) => {
            emit(a, code);
            emit(b, code);
            code.push(Instr::Binary(*op));
        }
        Node::Call(f, args) => {
            for a in args {
                emit(a, code);
            }
            code.push(Instr::Call(*f, args.len()));
        }
        Node::Query(q, a) => {
            emit(a, code);
            code.push(Instr::Query(*q));
        }
        Node::If(c, a, b) => {
            emit(c, code);
            let to_else = code.len();
            code.push(Instr::JumpIfFalse(0));
            emit(a, code);
            let to_end = code.len();
            code.push(Instr::Jump(0));
            code[to_else] = Instr::JumpIfFalse(code.len());
            emit(b, code);
            code[to_end] = Instr::Jump(code.len());
        }
    }
}

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// A compiled formula.
#[derive(Debug, Clone)]
pub struct Program {
    code: Vec<Instr>,
    constant: Option<f64>,
}

impl Program {
    pub fn compile(node: &Node) -> Self {
        let constant = match node {
            Node::Number(v) => Some(*v),
            _ => None,
        };
        let mut code = Vec::new();
        emit(node, &mut code);
        Self { code, constant }
    }

    pub fn instructions(&self) -> &[Instr] {
        &self.code
    }

    fn run(&self, scope: &mut EvalScope<'_>, base: usize) -> Result<f64, CalcError> {
        let mut pc = 0;
        while let Some(instr) = self.code.get(pc) {
            match *instr {
                Instr::Push(v) => scope.scratch.push(v),
                Instr::Variable(i) => {
                    let v = scope.variables.get(i).copied().ok_or(CalcError::UnknownReference {
                        what: "variable",
                        id: i as i64,
                    })?;
                    scope.scratch.push(v);
                }
                Instr::Scope(s) => {
                    let v = s.read(scope)?;
                    scope.scratch.push(v);
                }
                Instr::Unary(op) => {
                    let v = pop(scope.scratch, base)?;
                    scope.scratch.push(apply_unary(op, v));
                }
                Instr::Binary(op) => {
                    let r = pop(scope.scratch, base)?;
                    let l = pop(scope.scratch, base)?;
                    scope.scratch.push(apply_binary(l, op, r)?);
                }
                Instr::Call(f, argc) => {
                    let start = scope
                        .scratch
                        .len()
                        .checked_sub(argc)
                        .filter(|s| *s >= base)
                        .ok_or_else(underflow)?;
                    let v = f.apply(&scope.scratch[start..])?;
                    scope.scratch.truncate(start);
                    scope.scratch.push(v);
                }
                Instr::Query(q) => {
                    let arg = pop(scope.scratch, base)?;
                    let v = q.read(scope, arg)?;
                    scope.scratch.push(v);
                }
                Instr::JumpIfFalse(target) => {
                    if !truthy(pop(scope.scratch, base)?) {
                        pc = target;
                        continue;
                    }
                }
                Instr::Jump(target) => {
                    pc = target;
                    continue;
                }
            }
            pc += 1;
        }
        pop(scope.scratch, base)
    }
}

fn underflow() -> CalcError {
    CalcError::Other("operand stack underflow".into())
}

fn pop(stack: &mut Vec<f64>, base: usize) -> Result<f64, CalcError> {
    if stack.len() > base {
        stack.pop().ok_or_else(underflow)
    } else {
        Err(underflow())
    }
}

impl CompiledExpr for Program {
    fn calc(&self, scope: &mut EvalScope<'_>) -> Result<f64, CalcError> {
        if let Some(v) = self.constant {
            return Ok(v);
        }
        let base = scope.scratch.len();
        let result = self.run(scope, base);
        scope.scratch.truncate(base);
        result
    }

    fn constant_value(&self) -> Option<f64> {
        self.constant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use procsim_core::expr::EmptyQuery;

    fn eval(text: &str, vars: &[f64]) -> Result<f64, CalcError> {
        let names: Vec<String> = (0..vars.len()).map(|i| format!("v{i}")).collect();
        let program = Program::compile(&fold(parse(text, &names).unwrap()));
        let mut scratch = vec![99.0];
        let mut scope = EvalScope {
            variables: vars,
            now: 12.5,
            client: None,
            query: &EmptyQuery,
            scratch: &mut scratch,
        };
        let result = program.calc(&mut scope);
        assert_eq!(scratch, vec![99.0], "scratch must be restored");
        result
    }

    #[test]
    fn constants_fold_away() {
        let program = Program::compile(&fold(parse("2 * (3 + 4) - sqrt(16)", &[]).unwrap()));
        assert_eq!(program.constant_value(), Some(10.0));
        assert_eq!(program.instructions(), &[Instr::Push(10.0)]);
    }

    #[test]
    fn failing_constant_subtree_is_kept() {
        let node = fold(parse("1 / 0", &[]).unwrap());
        assert!(matches!(node, Node::Binary(..)));
        assert_eq!(eval("1 / 0", &[]), Err(CalcError::DivisionByZero));
    }

    #[test]
    fn variables_and_time_are_read_at_run_time() {
        assert_eq!(eval("v0 * 2 + v1", &[3.0, 1.0]), Ok(7.0));
        assert_eq!(eval("time + 0.5", &[]), Ok(13.0));
    }

    #[test]
    fn if_evaluates_only_the_chosen_branch() {
        assert_eq!(eval("if(v0 > 1, 10, 1 / 0)", &[2.0]), Ok(10.0));
        assert_eq!(eval("if(v0 > 1, 1 / 0, 20)", &[0.0]), Ok(20.0));
    }

    #[test]
    fn constant_condition_folds_the_if() {
        let node = fold(parse("if(1, v0, 1 / 0)", &["v0".to_string()]).unwrap());
        assert_eq!(node, Node::Variable(0));
    }

    #[test]
    fn variadic_calls_take_their_arguments() {
        assert_eq!(eval("max(v0, 4, v1) + min(v0, v1)", &[1.0, 7.0]), Ok(8.0));
    }

    #[test]
    fn client_values_need_a_client() {
        assert_eq!(eval("WaitingTime", &[]), Err(CalcError::NoClient));
    }

    #[test]
    fn unknown_station_is_reported() {
        assert_eq!(
            eval("NQ(v0)", &[4.0]),
            Err(CalcError::UnknownReference { what: "station", id: 4 })
        );
    }
}
