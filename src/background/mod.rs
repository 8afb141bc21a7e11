pub mod kernels;
pub mod pool;

pub use kernels::{JobDescriptor, JobFailure, KernelKind};
pub use pool::{JobHandle, PoolError, WorkerPool};
