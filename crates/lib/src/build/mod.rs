//! Incremental asset builds.
//!
//! # Submodules
//!
//! - [`execute`] - Build orchestration, artifact collection and archive generation
//! - [`state`] - Persisted incremental build state
//! - [`types`] - Outcomes, artifacts and the context handed to asset kinds

pub mod execute;
pub mod state;
pub mod types;

pub use execute::{BuildOptions, BuildReport, Orchestrator, collect_artifacts, generate_archive};
pub use state::{BuildState, CURRENT_VERSION, StateError};
pub use types::*;
