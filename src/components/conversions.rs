use crate::components::{Category, Component, ComponentError, ComponentResult, EvalContext, EvalRequest};
use crate::graph::node::NodeData;
use crate::graph::socket::{Socket, SocketKind, Sockets};
use crate::graph::value::{Outputs, Value};
use crate::grid::{CategoricalTileGrid, NumericTileGrid};
use async_trait::async_trait;
use std::collections::BTreeSet;

pub const NUMBER_TO_NUMERIC: &str = "Number to numeric dataset";
pub const NUMERIC_TO_NUMBER: &str = "Numeric dataset to number";
pub const CATEGORICAL: &str = "Categorical";

/// Broadcasts a number over the project window
pub struct NumberToNumeric;

#[async_trait]
impl Component for NumberToNumeric {
    fn tag(&self) -> &'static str {
        NUMBER_TO_NUMERIC
    }

    fn category(&self) -> Category {
        Category::Conversions
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Number", SocketKind::Number))
            .output(Socket::new("out", "Dataset", SocketKind::NumericRaster)))
    }

    async fn evaluate(&self, request: EvalRequest, ctx: &EvalContext) -> ComponentResult<Outputs> {
        let value = request.number("in")?;
        let project = &ctx.project;
        let mut out = NumericTileGrid::from_range(project.zoom, project.tile_range());

        match &ctx.mask {
            Some(mask) => {
                let mask = mask.rescale_to_range(project.zoom, project.tile_range());
                out.fill_with(|x, y| if mask.get(x, y) { value } else { f64::NAN });
            }
            None => out.fill_with(|_, _| value),
        }
        Ok(Outputs::from([("out".to_string(), Value::raster(out))]))
    }
}

/// Sum of every non-NaN tile
pub struct NumericToNumber;

#[async_trait]
impl Component for NumericToNumber {
    fn tag(&self) -> &'static str {
        NUMERIC_TO_NUMBER
    }

    fn category(&self) -> Category {
        Category::Conversions
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Dataset", SocketKind::NumericRaster))
            .output(Socket::new("out", "Number", SocketKind::Number)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let input = request.numeric("in")?;
        let sum: f64 = input.values().iter().filter(|v| !v.is_nan()).sum();
        Ok(Outputs::from([("out".to_string(), Value::Number(sum))]))
    }
}

/// A label selection, by code or by name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum LabelRef {
    Code(u16),
    Name(String),
}

fn selected_labels(data: &NodeData) -> ComponentResult<Vec<LabelRef>> {
    let Some(labels) = data.get("labels") else {
        return Ok(Vec::new());
    };
    let labels = labels
        .as_array()
        .ok_or_else(|| ComponentError::Config("labels must be a list".to_string()))?;

    labels
        .iter()
        .map(|label| match label {
            serde_json::Value::Number(n) => n
                .as_u64()
                .and_then(|code| u16::try_from(code).ok())
                .map(LabelRef::Code)
                .ok_or_else(|| ComponentError::Config(format!("Invalid label code {}", n))),
            serde_json::Value::String(name) => Ok(LabelRef::Name(name.clone())),
            other => Err(ComponentError::Config(format!("Invalid label {}", other))),
        })
        .collect()
}

fn selected_codes(grid: &CategoricalTileGrid, selection: &[LabelRef]) -> BTreeSet<u16> {
    selection
        .iter()
        .filter_map(|label| match label {
            LabelRef::Code(code) => Some(*code),
            LabelRef::Name(name) => grid.labels.iter().find(|l| &l.name == name).map(|l| l.code),
        })
        .collect()
}

/// True where a categorical tile has one of the selected labels
pub struct CategoricalToBoolean;

#[async_trait]
impl Component for CategoricalToBoolean {
    fn tag(&self) -> &'static str {
        CATEGORICAL
    }

    fn category(&self) -> Category {
        Category::Conversions
    }

    fn sockets(&self, data: &NodeData) -> ComponentResult<Sockets> {
        selected_labels(data)?;
        Ok(Sockets::new()
            .input(Socket::new("in", "Categorical dataset", SocketKind::CategoricalRaster))
            .output(Socket::new("out", "Boolean dataset", SocketKind::BooleanRaster)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let input = request.categorical("in")?;
        let codes = selected_codes(input, &selected_labels(&request.data)?);

        let mut out = input.map(|_, _, code| codes.contains(&code));
        out.labels.clear();
        Ok(Outputs::from([("out".to_string(), Value::raster(out))]))
    }
}
