//! Boolean set operations over tile masks.

use crate::components::align::{align, union_alignment};
use crate::components::{expect_boolean, Category, Component, ComponentError, ComponentResult, EvalContext, EvalRequest};
use crate::graph::node::NodeData;
use crate::graph::socket::{Socket, SocketKind, Sockets};
use crate::graph::value::{Outputs, Value};
use crate::grid::{BooleanTileGrid, TileGrid};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Intersection,
    SymmetricDifference,
    Difference,
    Complement,
}

impl SetOp {
    pub fn tag(&self) -> &'static str {
        match self {
            SetOp::Union => "Union",
            SetOp::Intersection => "Intersection",
            SetOp::SymmetricDifference => "Symmetric difference",
            SetOp::Difference => "Set difference",
            SetOp::Complement => "Complement",
        }
    }

    fn is_variadic(&self) -> bool {
        matches!(self, SetOp::Union | SetOp::Intersection | SetOp::SymmetricDifference)
    }

    /// Combines the tile values of every operand, in socket order
    fn combine(&self, values: &[bool]) -> bool {
        match self {
            SetOp::Union => values.iter().any(|&v| v),
            SetOp::Intersection => !values.is_empty() && values.iter().all(|&v| v),
            SetOp::SymmetricDifference => values.iter().filter(|&&v| v).count() % 2 == 1,
            SetOp::Difference => values.first().copied().unwrap_or(false) && !values.get(1).copied().unwrap_or(false),
            SetOp::Complement => !values.first().copied().unwrap_or(false),
        }
    }
}

pub struct SetOperator {
    op: SetOp,
}

impl SetOperator {
    pub fn new(op: SetOp) -> Self {
        Self { op }
    }

    fn operands(&self, request: &EvalRequest) -> ComponentResult<Vec<Arc<TileGrid>>> {
        let values: Vec<&Value> = if self.op.is_variadic() {
            request.values("in").iter().collect()
        } else if self.op == SetOp::Difference {
            vec![request.require("a")?, request.require("b")?]
        } else {
            vec![request.require("in")?]
        };
        if values.is_empty() {
            return Err(ComponentError::MissingInput("in".to_string()));
        }

        values
            .into_iter()
            .map(|value| match value.as_raster() {
                Some(grid) if grid.as_boolean().is_some() => Ok(grid.clone()),
                _ => Err(ComponentError::InvalidInput(format!(
                    "Expected a boolean raster, got a {}",
                    value.describe()
                ))),
            })
            .collect()
    }
}

#[async_trait]
impl Component for SetOperator {
    fn tag(&self) -> &'static str {
        self.op.tag()
    }

    fn category(&self) -> Category {
        Category::SetOperations
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        let sockets = match self.op {
            SetOp::Difference => Sockets::new()
                .input(Socket::new("a", "A", SocketKind::BooleanRaster))
                .input(Socket::new("b", "B", SocketKind::BooleanRaster)),
            SetOp::Complement => {
                Sockets::new().input(Socket::new("in", "Input", SocketKind::BooleanRaster))
            }
            _ => Sockets::new()
                .input(Socket::new("in", "Inputs", SocketKind::BooleanRaster).variadic()),
        };
        Ok(sockets.output(Socket::new("out", "Result", SocketKind::BooleanRaster)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let grids = self.operands(&request)?;

        let out = if self.op == SetOp::Complement {
            let input = expect_boolean(&grids[0], "in")?;
            input.map(|_, _, v| !v)
        } else {
            let refs: Vec<&TileGrid> = grids.iter().map(|g| g.as_ref()).collect();
            let alignment = union_alignment(&refs)
                .ok_or_else(|| ComponentError::MissingInput("in".to_string()))?;
            let aligned: Vec<Arc<TileGrid>> = grids.iter().map(|g| align(g, &alignment)).collect();
            let inputs = aligned
                .iter()
                .map(|g| expect_boolean(g, "in"))
                .collect::<ComponentResult<Vec<&BooleanTileGrid>>>()?;

            let mut out = BooleanTileGrid::from_range(alignment.zoom, alignment.range);
            let mut samples = Vec::with_capacity(inputs.len());
            out.fill_with(|x, y| {
                samples.clear();
                samples.extend(inputs.iter().map(|g| g.get(x, y)));
                self.op.combine(&samples)
            });
            out
        };

        Ok(Outputs::from([("out".to_string(), Value::raster(out))]))
    }
}
