//! Erasure-coded storage durability simulator
//!
//! A discrete-event simulation of hardware failures and repairs in a
//! datacenter / rack / machine / disk hierarchy. It reports how often
//! erasure-coded stripes become unavailable or are lost for good, and how
//! much reconstruction bandwidth the repairs consume.

pub mod config;
pub mod erasure;
pub mod error;
pub mod simulation;
pub mod storage;
pub mod ui;

pub use config::{Config, HardwareConfig, LazyRecoveryTable, RecoveryConfig};
pub use erasure::{create_scheme, RedundancyScheme, RedundancySpec};
pub use error::SimError;
pub use simulation::stats::{SimulationReport, TierAggregate};
pub use simulation::{RunSummary, SimContext, Simulator};
pub use storage::Topology;
pub use ui::TerminalUI;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, SimError>;
