use super::{CategoryLabel, Grid, GridVariant};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary of a grid's values, used by layer styling and charts.
///
/// A grid with no valid values reports `min == max == 0` and no kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridStats {
    pub min: f64,
    pub max: f64,
    pub kind: Option<GridVariant>,
    #[serde(default)]
    pub labels: Vec<LabelCount>,
}

impl GridStats {
    fn empty() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            kind: None,
            labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCount {
    pub code: u16,
    pub name: String,
    pub count: usize,
}

fn min_max(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

fn label_name(labels: &[CategoryLabel], code: u16) -> String {
    labels
        .iter()
        .find(|label| label.code == code)
        .map(|label| label.name.clone())
        .unwrap_or_else(|| format!("Unknown ({code})"))
}

impl Grid<f64> {
    /// Minimum and maximum over non-NaN values
    pub fn min_max(&self) -> Option<(f64, f64)> {
        min_max(self.iter().map(|(_, _, v)| v).filter(|v| !v.is_nan()))
    }
}

impl Grid<bool> {
    pub fn count_true(&self) -> usize {
        self.values().iter().filter(|&&v| v).count()
    }
}

impl Grid<u16> {
    /// Tile count per non-zero code, keyed by code
    pub fn code_counts(&self) -> BTreeMap<u16, usize> {
        let mut counts = BTreeMap::new();
        for &code in self.values().iter().filter(|&&c| c != 0) {
            *counts.entry(code).or_insert(0) += 1;
        }
        counts
    }
}

/// Variant-specific statistics
pub trait GridSummary {
    fn stats(&self) -> GridStats;
}

impl GridSummary for Grid<f64> {
    fn stats(&self) -> GridStats {
        match self.min_max() {
            Some((min, max)) => GridStats {
                min,
                max,
                kind: Some(GridVariant::Numeric),
                labels: Vec::new(),
            },
            None => GridStats::empty(),
        }
    }
}

impl GridSummary for Grid<bool> {
    fn stats(&self) -> GridStats {
        let trues = self.count_true();
        let falses = self.values().len() - trues;
        GridStats {
            min: if falses > 0 { 0.0 } else { 1.0 },
            max: if trues > 0 { 1.0 } else { 0.0 },
            kind: Some(GridVariant::Boolean),
            labels: Vec::new(),
        }
    }
}

impl GridSummary for Grid<u16> {
    fn stats(&self) -> GridStats {
        let counts = self.code_counts();
        let (min, max) = match min_max(counts.keys().map(|&c| c as f64)) {
            Some(range) => range,
            None => return GridStats::empty(),
        };
        GridStats {
            min,
            max,
            kind: Some(GridVariant::Categorical),
            labels: counts
                .into_iter()
                .map(|(code, count)| LabelCount {
                    code,
                    name: label_name(&self.labels, code),
                    count,
                })
                .collect(),
        }
    }
}
