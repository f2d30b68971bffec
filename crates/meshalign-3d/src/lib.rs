#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Batch point transformation.
pub mod linalg;

/// Point cloud container.
pub mod pointcloud;

/// Rigid transforms and rotation helpers.
pub mod transforms;
