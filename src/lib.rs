//! LSM Engine - Least-squares Monte Carlo pricing for instruments with early exercise
//!
//! This library provides:
//! - Callable, putable and game-option valuation on simulated cashflow streams
//! - Per-date SVD regression with box stabilisation of the fitted values
//! - Path-wise exercise decisions and forward-propagated exposure profiles
//! - Reference market, simulation and basis-function implementations
//! - Scenario revaluation and parallel-shift sensitivities

pub mod dates;
pub mod error;
pub mod instrument;
pub mod lsm;
pub mod market;
pub mod scenario;
pub mod simulation;

// Re-export commonly used types
pub use error::{LsmError, LsmResult};
pub use instrument::{BasisFunctions, CashflowStream, ExerciseEvaluator, ExerciseSchedule, Instrument, LegSide};
pub use lsm::{ExerciseStrategy, ExposureGrid, LsmConfig, LsmEngine, Valuation};
pub use market::{Currency, MarketEnvironment, YieldCurve};
pub use scenario::{ScenarioRunner, ShiftSensitivity};
pub use simulation::{GaussianShortRateEngine, ScenarioReplayEngine, SimulationEngine};
