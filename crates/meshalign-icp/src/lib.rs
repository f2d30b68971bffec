#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Registration parameters and their JSON loading.
pub mod config;

/// Correspondence search and outlier rejection.
pub mod correspondence;

/// Closed-form rigid motion estimation.
pub mod estimator;

/// Kd-tree stored in one contiguous node buffer.
pub mod flat_kdtree;

/// The nearest-neighbor index abstraction.
pub mod index;

/// Kd-tree with parent-owned nodes.
pub mod kdtree;

/// Execution strategies for batched queries.
pub mod parallel;

/// The per-frame registration loop.
pub mod registration;

pub use config::{ConfigError, RankPolicy, RegistrationConfig, StopPolicy};
pub use correspondence::{Correspondence, OutlierRejection};
pub use estimator::{EstimateError, MotionEstimate, RigidMotionEstimator};
pub use flat_kdtree::FlatKdTree;
pub use index::{build_index, IndexBackend, NearestNeighborIndex, Neighbor};
pub use kdtree::{KdTree, KdTreeError};
pub use parallel::ExecutionStrategy;
pub use registration::{
    LoopState, RegistrationError, RegistrationLoop, StepOutcome, StepReport, TransformHandle,
};
