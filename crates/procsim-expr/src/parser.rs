//! Recursive-descent parser from tokens to a syntax tree.
//!
//! Precedence, loosest first: `||`, `&&`, comparisons, `+ -`, `* / %`,
//! unary `- ! +`, `^` (right associative, so `-2^2` is `-4`).

use procsim_core::expr::ParseError;

use crate::function::{Function, Query, ScopeValue, constant};
use crate::ops::{ArithmeticOp, BinaryOp, ComparisonOp, UnaryOp};
use crate::token::{Spanned, Token, tokenize};

/// A parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(f64),
    Variable(usize),
    Scope(ScopeValue),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(Function, Vec<Node>),
    Query(Query, Box<Node>),
    /// `if(condition, then, else)`; only the chosen branch is evaluated.
    If(Box<Node>, Box<Node>, Box<Node>),
}

/// Parse `text`, resolving bare names against `variables` first and the
/// built-in names second.
pub fn parse(text: &str, variables: &[String]) -> Result<Node, ParseError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        end: text.chars().count(),
        variables,
    };
    if tokens.is_empty() {
        return Err(ParseError::new(0, "empty formula"));
    }
    let node = parser.or()?;
    match parser.peek() {
        None => Ok(node),
        Some(t) => Err(ParseError::new(
            t.position,
            format!("unexpected {}", describe(&t.token)),
        )),
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    end: usize,
    variables: &'a [String],
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn position(&self) -> usize {
        self.peek().map_or(self.end, |t| t.position)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().is_some_and(|t| t.token == *token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(ParseError::new(
                self.position(),
                format!("expected {}", describe(token)),
            ))
        }
    }

    fn or(&mut self) -> Result<Node, ParseError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Node::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Node, ParseError> {
        let mut left = self.comparison()?;
        while self.eat(&Token::And) {
            let right = self.comparison()?;
            left = Node::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Node, ParseError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek().map(|t| &t.token) {
                Some(Token::Eq) => ComparisonOp::Eq,
                Some(Token::Ne) => ComparisonOp::Ne,
                Some(Token::Lt) => ComparisonOp::Lt,
                Some(Token::Le) => ComparisonOp::Lte,
                Some(Token::Gt) => ComparisonOp::Gt,
                Some(Token::Ge) => ComparisonOp::Gte,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = Node::Binary(BinaryOp::Comparison(op), Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> Result<Node, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().map(|t| &t.token) {
                Some(Token::Plus) => ArithmeticOp::Add,
                Some(Token::Minus) => ArithmeticOp::Subtract,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Node::Binary(BinaryOp::Arithmetic(op), Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Node, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek().map(|t| &t.token) {
                Some(Token::Star) => ArithmeticOp::Multiply,
                Some(Token::Slash) => ArithmeticOp::Divide,
                Some(Token::Percent) => ArithmeticOp::Modulo,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Node::Binary(BinaryOp::Arithmetic(op), Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Node, ParseError> {
        if self.eat(&Token::Minus) {
            return Ok(Node::Unary(UnaryOp::Negate, Box::new(self.unary()?)));
        }
        if self.eat(&Token::Not) {
            return Ok(Node::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<Node, ParseError> {
        let base = self.primary()?;
        if self.eat(&Token::Caret) {
            let exponent = self.unary()?;
            return Ok(Node::Binary(
                BinaryOp::Arithmetic(ArithmeticOp::Power),
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node, ParseError> {
        let Some(spanned) = self.peek().cloned() else {
            return Err(ParseError::new(self.end, "unexpected end of formula"));
        };
        self.pos += 1;
        match spanned.token {
            Token::Number(v) => Ok(Node::Number(v)),
            Token::LParen => {
                let inner = self.or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    self.call(&name, spanned.position)
                } else {
                    self.name(&name, spanned.position)
                }
            }
            other => Err(ParseError::new(
                spanned.position,
                format!("unexpected {}", describe(&other)),
            )),
        }
    }

    fn name(&self, name: &str, position: usize) -> Result<Node, ParseError> {
        if let Some(i) = self.variables.iter().position(|v| v == name) {
            return Ok(Node::Variable(i));
        }
        if let Some(v) = ScopeValue::lookup(name) {
            return Ok(Node::Scope(v));
        }
        if let Some(v) = constant(name) {
            return Ok(Node::Number(v));
        }
        Err(ParseError::new(position, format!("unknown name `{name}`")))
    }

    /// The opening parenthesis has been consumed.
    fn call(&mut self, name: &str, position: usize) -> Result<Node, ParseError> {
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.or()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(&Token::RParen)?;
                break;
            }
        }

        let got = args.len();
        let arity_error = |expected: &str| {
            ParseError::new(position, format!("`{name}` takes {expected}, got {got}"))
        };

        if name.eq_ignore_ascii_case("if") {
            let mut args = args.into_iter();
            return match (args.next(), args.next(), args.next(), args.next()) {
                (Some(c), Some(a), Some(b), None) => {
                    Ok(Node::If(Box::new(c), Box::new(a), Box::new(b)))
                }
                _ => Err(arity_error("3 arguments")),
            };
        }
        if let Some(query) = Query::lookup(name) {
            return match (args.pop(), got) {
                (Some(arg), 1) => Ok(Node::Query(query, Box::new(arg))),
                _ => Err(arity_error("1 argument")),
            };
        }
        if let Some(function) = Function::lookup(name) {
            let (min, max) = function.arity();
            if got < min || got > max {
                let expected = if min == max {
                    format!("{min} argument{}", if min == 1 { "" } else { "s" })
                } else {
                    format!("at least {min} argument")
                };
                return Err(arity_error(&expected));
            }
            return Ok(Node::Call(function, args));
        }
        Err(ParseError::new(position, format!("unknown function `{name}`")))
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(v) => format!("number {v}"),
        Token::Ident(name) => format!("name `{name}`"),
        Token::LParen => "`(`".into(),
        Token::RParen => "`)`".into(),
        Token::Comma => "`,`".into(),
        _ => "operator".into(),
    }
}
