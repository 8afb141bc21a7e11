//! Element-wise numeric operators.
//!
//! NaN propagates through every operator here: any NaN operand yields NaN,
//! and comparisons involving NaN are false. `Merge` is the one exception and
//! takes the first non-NaN value in input order.

use crate::components::align::{align, align_operands, numeric_output, union_alignment, Operand};
use crate::components::{Category, Component, ComponentError, ComponentResult, EvalContext, EvalRequest};
use crate::graph::node::NodeData;
use crate::graph::socket::{Socket, SocketKind, Sockets};
use crate::graph::value::{Outputs, Value};
use crate::grid::{BooleanTileGrid, TileGrid};
use async_trait::async_trait;
use std::sync::Arc;

pub const MASK: &str = "Mask";
pub const FILL: &str = "Fill";

fn single_output(value: Value) -> Outputs {
    Outputs::from([("out".to_string(), value)])
}

fn operand(request: &EvalRequest, socket: &str) -> ComponentResult<Operand> {
    let value = request.require(socket)?;
    Operand::from_value(value).ok_or_else(|| {
        ComponentError::InvalidInput(format!(
            "Expected a numeric raster or number on '{}', got a {}",
            socket,
            value.describe()
        ))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Min,
    Max,
    Less,
    Greater,
}

impl BinaryOp {
    pub fn tag(&self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Subtract => "Subtract",
            BinaryOp::Multiply => "Multiply",
            BinaryOp::Divide => "Divide",
            BinaryOp::Power => "Power",
            BinaryOp::Min => "Min",
            BinaryOp::Max => "Max",
            BinaryOp::Less => "Less",
            BinaryOp::Greater => "Greater",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, BinaryOp::Less | BinaryOp::Greater)
    }

    pub fn apply(&self, a: f64, b: f64) -> f64 {
        if a.is_nan() || b.is_nan() {
            return f64::NAN;
        }
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            BinaryOp::Power => a.powf(b),
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::Less => bool_to_f64(a < b),
            BinaryOp::Greater => bool_to_f64(a > b),
        }
    }

    pub fn compare(&self, a: f64, b: f64) -> bool {
        match self {
            BinaryOp::Less => a < b,
            BinaryOp::Greater => a > b,
            _ => false,
        }
    }
}

fn bool_to_f64(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

/// Two operands, each a numeric raster or a number
pub struct BinaryOperator {
    op: BinaryOp,
}

impl BinaryOperator {
    pub fn new(op: BinaryOp) -> Self {
        Self { op }
    }
}

#[async_trait]
impl Component for BinaryOperator {
    fn tag(&self) -> &'static str {
        self.op.tag()
    }

    fn category(&self) -> Category {
        Category::Arithmetic
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        let output = if self.op.is_comparison() {
            SocketKind::BooleanRaster
        } else {
            SocketKind::NumericOrNumber
        };
        Ok(Sockets::new()
            .input(Socket::new("a", "A", SocketKind::NumericOrNumber))
            .input(Socket::new("b", "B", SocketKind::NumericOrNumber))
            .output(Socket::new("out", "Result", output)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let a = operand(&request, "a")?;
        let b = operand(&request, "b")?;

        let (alignment, aligned) = match align_operands(&[a.clone(), b.clone()]) {
            Some(found) => found,
            None => {
                let (Operand::Number(x), Operand::Number(y)) = (a, b) else {
                    return Err(ComponentError::InvalidInput("No raster operand".to_string()));
                };
                return Ok(single_output(Value::Number(self.op.apply(x, y))));
            }
        };
        let (a, b) = (&aligned[0], &aligned[1]);

        let value = if self.op.is_comparison() {
            let mut out = BooleanTileGrid::from_range(alignment.zoom, alignment.range);
            out.fill_with(|x, y| self.op.compare(a.get(x, y), b.get(x, y)));
            Value::raster(out)
        } else {
            let mut out = numeric_output(&alignment);
            out.fill_with(|x, y| self.op.apply(a.get(x, y), b.get(x, y)));
            Value::raster(out)
        };
        Ok(single_output(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Reciprocal,
}

impl UnaryOp {
    pub fn apply(&self, v: f64) -> f64 {
        match self {
            UnaryOp::Negate => -v,
            UnaryOp::Reciprocal => 1.0 / v,
        }
    }
}

pub struct UnaryOperator {
    op: UnaryOp,
}

impl UnaryOperator {
    pub fn new(op: UnaryOp) -> Self {
        Self { op }
    }
}

#[async_trait]
impl Component for UnaryOperator {
    fn tag(&self) -> &'static str {
        match self.op {
            UnaryOp::Negate => "Negate",
            UnaryOp::Reciprocal => "Reciprocal",
        }
    }

    fn category(&self) -> Category {
        Category::Arithmetic
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Input", SocketKind::NumericOrNumber))
            .output(Socket::new("out", "Result", SocketKind::NumericOrNumber)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let value = match operand(&request, "in")? {
            Operand::Number(n) => Value::Number(self.op.apply(n)),
            Operand::Grid(grid) => {
                let input = crate::components::expect_numeric(&grid, "in")?;
                Value::raster(input.map(|_, _, v| self.op.apply(v)))
            }
        };
        Ok(single_output(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariadicOp {
    Sum,
    Product,
    Merge,
}

impl VariadicOp {
    fn combine(&self, values: impl Iterator<Item = f64>) -> f64 {
        match self {
            VariadicOp::Sum => values.sum(),
            VariadicOp::Product => values.product(),
            VariadicOp::Merge => {
                let mut values = values;
                values.find(|v| !v.is_nan()).unwrap_or(f64::NAN)
            }
        }
    }
}

/// Any number of numeric rasters combined tile by tile
pub struct VariadicOperator {
    op: VariadicOp,
}

impl VariadicOperator {
    pub fn new(op: VariadicOp) -> Self {
        Self { op }
    }
}

#[async_trait]
impl Component for VariadicOperator {
    fn tag(&self) -> &'static str {
        match self.op {
            VariadicOp::Sum => "Sum",
            VariadicOp::Product => "Product",
            VariadicOp::Merge => "Merge",
        }
    }

    fn category(&self) -> Category {
        Category::Arithmetic
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Inputs", SocketKind::NumericRaster).variadic())
            .output(Socket::new("out", "Result", SocketKind::NumericRaster)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let grids = request
            .values("in")
            .iter()
            .map(|value| {
                value
                    .as_raster()
                    .filter(|g| g.as_numeric().is_some())
                    .cloned()
                    .ok_or_else(|| {
                        ComponentError::InvalidInput(format!(
                            "Expected numeric rasters on 'in', got a {}",
                            value.describe()
                        ))
                    })
            })
            .collect::<ComponentResult<Vec<Arc<TileGrid>>>>()?;

        let refs: Vec<&TileGrid> = grids.iter().map(|g| g.as_ref()).collect();
        let alignment =
            union_alignment(&refs).ok_or_else(|| ComponentError::MissingInput("in".to_string()))?;
        let aligned: Vec<Arc<TileGrid>> = grids.iter().map(|g| align(g, &alignment)).collect();

        let mut out = numeric_output(&alignment);
        out.fill_with(|x, y| self.op.combine(aligned.iter().map(|g| g.value_at(x, y))));
        Ok(single_output(Value::raster(out)))
    }
}

/// Blanks out numeric tiles where a boolean mask is false
pub struct Mask;

#[async_trait]
impl Component for Mask {
    fn tag(&self) -> &'static str {
        MASK
    }

    fn category(&self) -> Category {
        Category::Arithmetic
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Data", SocketKind::NumericRaster))
            .input(Socket::new("mask", "Mask", SocketKind::BooleanRaster))
            .output(Socket::new("out", "Result", SocketKind::NumericRaster)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let data = request.numeric("in")?;
        let mask = request.boolean("mask")?;
        let mask = mask.rescale_to_range(data.zoom, data.range());

        let out = data.map(|x, y, v| if mask.get(x, y) { v } else { f64::NAN });
        Ok(single_output(Value::raster(out)))
    }
}

/// Replaces NaN tiles with a number
pub struct Fill;

#[async_trait]
impl Component for Fill {
    fn tag(&self) -> &'static str {
        FILL
    }

    fn category(&self) -> Category {
        Category::Arithmetic
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Input", SocketKind::NumericRaster))
            .input(Socket::new("replace", "Replacement", SocketKind::NumericOrNumber))
            .output(Socket::new("out", "Output", SocketKind::NumericRaster)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let input = request.numeric("in")?;
        let replacement = request.number("replace")?;
        let out = input.map(|_, _, v| if v.is_nan() { replacement } else { v });
        Ok(single_output(Value::raster(out)))
    }
}
