//! Least-squares Monte Carlo pricing
//!
//! Phases run in order: partition building, forward simulation, backward
//! induction, post-processing and exposure generation.

pub mod backward;
pub mod engine;
pub mod exposure;
pub mod forward;
pub mod partition;
pub mod post;
pub mod pricing_data;
pub mod regression;
pub mod result;
pub mod workspace;

pub use engine::{ExerciseStrategy, LsmConfig, LsmEngine};
pub use exposure::ExposureGrid;
pub use partition::{Partition, PartitionFlags};
pub use regression::{Stabilization, SvdSolve};
pub use result::{ExerciseRecord, Valuation, ValuationDiagnostics};
