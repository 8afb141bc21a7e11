pub mod distance;
pub mod index;

pub use distance::{distance_transform, KernelError};
pub use index::{SeedIndex, SeedTile};
