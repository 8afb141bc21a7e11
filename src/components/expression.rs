//! Free-form arithmetic over implicitly declared inputs.
//!
//! Every identifier in the formula that is not a known function or constant
//! becomes an input socket, in order of first appearance. Grammar, loosest
//! binding first:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary | unary)*    juxtaposition multiplies
//! unary   := ('-' | '+') unary | power
//! power   := primary ('^' unary)?                         right associative
//! primary := number | constant | variable | function '(' args ')' | '(' expr ')'
//! ```

use crate::components::align::{intersection_alignment, numeric_output, Operand};
use crate::components::{Category, Component, ComponentError, ComponentResult, EvalContext, EvalRequest};
use crate::graph::node::NodeData;
use crate::graph::socket::{Socket, SocketKind, Sockets};
use crate::graph::value::{Outputs, Value};
use crate::grid::TileGrid;
use async_trait::async_trait;
use std::f64::consts::{E, PI};
use std::fmt;

pub const EXPRESSION: &str = "Expression";

/// Deepest nesting of parentheses, signs and exponents the parser accepts
const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Empty expression")]
    Empty,

    #[error("Unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },

    #[error("Invalid number '{0}'")]
    InvalidNumber(String),

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unexpected '{0}'")]
    UnexpectedToken(String),

    #[error("{name} expects {expected}, got {actual} argument(s)")]
    Arity {
        name: &'static str,
        expected: &'static str,
        actual: usize,
    },

    #[error("'{0}' is a function and needs arguments")]
    BareFunction(String),

    #[error("Expression nests deeper than {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    Open,
    Close,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Ident(name) => f.write_str(name),
            Token::Op(op) => write!(f, "{}", op),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent only when digits follow, so "2e" reads as 2 * e
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::InvalidNumber(text.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => {
                return Err(ExpressionError::UnexpectedCharacter {
                    character: other,
                    position: i,
                })
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sqrt,
    Exp,
    Ln,
    Log,
    Min,
    Max,
    Pow,
    Floor,
    Ceil,
}

impl Function {
    fn lookup(name: &str) -> Option<Function> {
        Some(match name {
            "abs" => Function::Abs,
            "sqrt" => Function::Sqrt,
            "exp" => Function::Exp,
            "ln" => Function::Ln,
            "log" => Function::Log,
            "min" => Function::Min,
            "max" => Function::Max,
            "pow" => Function::Pow,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            _ => return None,
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Function::Abs => "abs",
            Function::Sqrt => "sqrt",
            Function::Exp => "exp",
            Function::Ln => "ln",
            Function::Log => "log",
            Function::Min => "min",
            Function::Max => "max",
            Function::Pow => "pow",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
        }
    }

    fn check_arity(&self, actual: usize) -> Result<(), ExpressionError> {
        let (ok, expected) = match self {
            Function::Log => ((1..=2).contains(&actual), "1 or 2 arguments"),
            Function::Min | Function::Max => (actual >= 1, "at least 1 argument"),
            Function::Pow => (actual == 2, "2 arguments"),
            _ => (actual == 1, "1 argument"),
        };
        if ok {
            Ok(())
        } else {
            Err(ExpressionError::Arity {
                name: self.name(),
                expected,
                actual,
            })
        }
    }

    fn apply(&self, args: &[f64]) -> f64 {
        let first = args.first().copied().unwrap_or(f64::NAN);
        match self {
            Function::Abs => first.abs(),
            Function::Sqrt => first.sqrt(),
            Function::Exp => first.exp(),
            Function::Ln => first.ln(),
            Function::Log => match args.get(1) {
                Some(base) => first.ln() / base.ln(),
                None => first.ln(),
            },
            Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Function::Pow => first.powf(args.get(1).copied().unwrap_or(f64::NAN)),
            Function::Floor => first.floor(),
            Function::Ceil => first.ceil(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Variable(usize),
    Negate(Box<Expr>),
    Binary(char, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    fn eval(&self, vars: &[f64]) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Variable(i) => vars.get(*i).copied().unwrap_or(f64::NAN),
            Expr::Negate(inner) => -inner.eval(vars),
            Expr::Binary(op, a, b) => {
                let (a, b) = (a.eval(vars), b.eval(vars));
                match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    '/' => a / b,
                    '%' => a % b,
                    '^' => a.powf(b),
                    _ => f64::NAN,
                }
            }
            Expr::Call(function, args) => {
                let args: Vec<f64> = args.iter().map(|arg| arg.eval(vars)).collect();
                function.apply(&args)
            }
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    variables: Vec<String>,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, ops: &[char]) -> Option<char> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, wanted: Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(token) if token == wanted => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.term()?;
        while let Some(op) = self.eat_op(&['+', '-']) {
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.eat_op(&['*', '/', '%']) {
                Some(op) => op,
                None if matches!(
                    self.peek(),
                    Some(Token::Number(_) | Token::Ident(_) | Token::Open)
                ) =>
                {
                    '*'
                }
                None => break,
            };
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        // Every nested sub-expression passes through here
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ExpressionError::TooDeep(MAX_NESTING));
        }
        let result = match self.eat_op(&['-', '+']) {
            Some('-') => self.unary().map(|inner| Expr::Negate(Box::new(inner))),
            Some(_) => self.unary(),
            None => self.power(),
        };
        self.depth -= 1;
        result
    }

    fn power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.primary()?;
        if self.eat_op(&['^']).is_some() {
            let exponent = self.unary()?;
            return Ok(Expr::Binary('^', Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Open) => {
                let inner = self.expr()?;
                self.expect(Token::Close)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.identifier(name),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Expr, ExpressionError> {
        if let Some(function) = Function::lookup(&name) {
            if self.peek() != Some(&Token::Open) {
                return Err(ExpressionError::BareFunction(name));
            }
            self.pos += 1;
            let mut args = vec![self.expr()?];
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                args.push(self.expr()?);
            }
            self.expect(Token::Close)?;
            function.check_arity(args.len())?;
            return Ok(Expr::Call(function, args));
        }

        match name.as_str() {
            "pi" => Ok(Expr::Number(PI)),
            "e" => Ok(Expr::Number(E)),
            _ => {
                let index = match self.variables.iter().position(|v| *v == name) {
                    Some(index) => index,
                    None => {
                        self.variables.push(name);
                        self.variables.len() - 1
                    }
                };
                Ok(Expr::Variable(index))
            }
        }
    }
}

/// A parsed formula and the variables it reads
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    root: Expr,
    variables: Vec<String>,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Formula, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            variables: Vec::new(),
            depth: 0,
        };
        let root = parser.expr()?;
        if let Some(token) = parser.peek() {
            return Err(ExpressionError::UnexpectedToken(token.to_string()));
        }
        Ok(Formula {
            root,
            variables: parser.variables,
        })
    }

    /// Variable names in order of first appearance
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Evaluates with one value per variable, in `variables()` order
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.root.eval(values)
    }
}

fn formula(data: &NodeData) -> ComponentResult<Formula> {
    let source = data.get("expression").and_then(|v| v.as_str()).unwrap_or("");
    Formula::parse(source).map_err(|e| ComponentError::Config(e.to_string()))
}

/// NaN and infinite results read as 0
fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

pub struct Expression;

#[async_trait]
impl Component for Expression {
    fn tag(&self) -> &'static str {
        EXPRESSION
    }

    fn category(&self) -> Category {
        Category::Arithmetic
    }

    fn sockets(&self, data: &NodeData) -> ComponentResult<Sockets> {
        let formula = formula(data)?;
        let sockets = formula.variables().iter().fold(Sockets::new(), |sockets, name| {
            sockets.input(Socket::new(name.as_str(), name.as_str(), SocketKind::NumericOrNumber))
        });
        Ok(sockets.output(Socket::new("out", "Result", SocketKind::NumericOrNumber)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let formula = formula(&request.data)?;

        let operands = formula
            .variables()
            .iter()
            .map(|name| {
                let value = request.require(name)?;
                Operand::from_value(value).ok_or_else(|| {
                    ComponentError::InvalidInput(format!(
                        "Expected a numeric raster or number on '{}'",
                        name
                    ))
                })
            })
            .collect::<ComponentResult<Vec<Operand>>>()?;

        let grids: Vec<&TileGrid> = operands.iter().filter_map(Operand::grid).collect();
        if grids.is_empty() {
            let values: Vec<f64> = operands.iter().map(|o| o.get(0, 0)).collect();
            let result = finite_or_zero(formula.evaluate(&values));
            return Ok(Outputs::from([("out".to_string(), Value::Number(result))]));
        }

        let alignment = intersection_alignment(&grids)
            .ok_or_else(|| ComponentError::InvalidInput("Input rasters do not overlap".to_string()))?;
        let aligned: Vec<Operand> = operands.iter().map(|o| o.aligned(&alignment)).collect();

        let mut out = numeric_output(&alignment);
        let mut values = vec![0.0; aligned.len()];
        out.fill_with(|x, y| {
            for (slot, operand) in values.iter_mut().zip(&aligned) {
                *slot = operand.get(x, y);
            }
            finite_or_zero(formula.evaluate(&values))
        });
        Ok(Outputs::from([("out".to_string(), Value::raster(out))]))
    }
}
