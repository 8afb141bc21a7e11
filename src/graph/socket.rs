use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of value a socket carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SocketKind {
    BooleanRaster,
    NumericRaster,
    CategoricalRaster,
    AnyRaster,
    Number,
    NumericOrNumber,
    Property,
    Chart,
}

impl SocketKind {
    /// Whether an input of this kind may be fed by an output of `output` kind.
    ///
    /// Outputs that are either a raster or a number depending on their inputs
    /// connect to inputs of both kinds; the value is checked on evaluation.
    pub fn accepts(&self, output: SocketKind) -> bool {
        use SocketKind::*;
        if *self == output {
            return true;
        }
        match self {
            AnyRaster => matches!(
                output,
                BooleanRaster | NumericRaster | CategoricalRaster | NumericOrNumber
            ),
            NumericOrNumber => matches!(output, NumericRaster | Number),
            NumericRaster | Number => output == NumericOrNumber,
            _ => false,
        }
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketKind::BooleanRaster => "boolean raster",
            SocketKind::NumericRaster => "numeric raster",
            SocketKind::CategoricalRaster => "categorical raster",
            SocketKind::AnyRaster => "raster",
            SocketKind::Number => "number",
            SocketKind::NumericOrNumber => "numeric raster or number",
            SocketKind::Property => "property",
            SocketKind::Chart => "chart",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Socket {
    pub name: String,
    pub label: String,
    pub kind: SocketKind,
    /// Accepts any number of connections
    #[serde(default)]
    pub variadic: bool,
}

impl Socket {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: SocketKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            variadic: false,
        }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }
}

/// Input and output sockets of one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sockets {
    pub inputs: Vec<Socket>,
    pub outputs: Vec<Socket>,
}

impl Sockets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, socket: Socket) -> Self {
        self.inputs.push(socket);
        self
    }

    pub fn output(mut self, socket: Socket) -> Self {
        self.outputs.push(socket);
        self
    }

    pub fn find_input(&self, name: &str) -> Option<&Socket> {
        self.inputs.iter().find(|s| s.name == name)
    }

    pub fn find_output(&self, name: &str) -> Option<&Socket> {
        self.outputs.iter().find(|s| s.name == name)
    }
}
