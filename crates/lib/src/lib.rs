//! starforge-lib: incremental asset builds for game mod projects
//!
//! The pipeline turns a project's asset tree into a `MAPFS` archive:
//! - `asset`: asset discovery, the extension registry and layered asset dirs
//! - `build`: the build state cache and the parallel orchestrator
//! - `archive`: archive building, chain parsing and ROM patching
//! - `package`: distribution packages (manifest, target descriptor, archive)
//! - `watch` and `manager`: debounced rebuilds on file changes

pub mod archive;
pub mod asset;
pub mod build;
pub mod config;
pub mod consts;
pub mod manager;
pub mod package;
pub mod project;
pub mod watch;
