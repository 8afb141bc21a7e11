//! Serializable job descriptions and the dispatch table run inside workers.
//!
//! A job crosses the worker boundary as bincode bytes in both directions, so
//! workers never share grid memory with the orchestrating side.

use crate::grid::{GridError, TileGrid, TileGridRecord};
use crate::spatial::{distance_transform, KernelError};
use serde::{Deserialize, Serialize};

/// The kernels a worker knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelKind {
    DistanceTransform,
}

impl KernelKind {
    pub fn name(&self) -> &'static str {
        match self {
            KernelKind::DistanceTransform => "distance transform",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub kernel: KernelKind,
    pub input: TileGridRecord,
}

impl JobDescriptor {
    pub fn new(kernel: KernelKind, input: &TileGrid) -> Self {
        Self {
            kernel,
            input: input.to_record(),
        }
    }
}

/// Why a job produced no grid
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum JobFailure {
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("Invalid job input: {0}")]
    InvalidInput(String),

    #[error("Malformed job: {0}")]
    Codec(String),
}

impl From<GridError> for JobFailure {
    fn from(err: GridError) -> Self {
        JobFailure::InvalidInput(err.to_string())
    }
}

pub type JobResult = Result<TileGridRecord, JobFailure>;

/// Runs a decoded job
pub fn execute(job: JobDescriptor) -> JobResult {
    let input = TileGrid::from_record(job.input)?;
    match job.kernel {
        KernelKind::DistanceTransform => {
            let grid = input.as_boolean().ok_or_else(|| KernelError::WrongInput {
                kernel: job.kernel.name().to_string(),
                expected: "boolean".to_string(),
            })?;
            let output = distance_transform(grid)?;
            Ok(TileGrid::Numeric(output).to_record())
        }
    }
}

/// Worker entry point: bytes in, bytes out
pub fn run_encoded(payload: &[u8]) -> Vec<u8> {
    let result = bincode::deserialize::<JobDescriptor>(payload)
        .map_err(|e| JobFailure::Codec(e.to_string()))
        .and_then(execute);

    match bincode::serialize(&result) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("failed to encode job result: {}", e);
            let fallback: JobResult = Err(JobFailure::Codec(e.to_string()));
            bincode::serialize(&fallback).unwrap_or_default()
        }
    }
}
