//! Core types for depscan.
//!
//! This crate provides the data model shared by the scanning crates:
//! module identities, per-module and per-translation-unit dependency
//! records, include trees, content ids, errors and service configuration.

mod cas_id;
mod config;
mod deps;
mod error;
mod include_tree;
mod module;

pub use cas_id::CasId;
pub use config::{ScanningMode, ScanningOutputFormat, ServiceConfig, ServiceConfigBuilder};
pub use deps::{AlreadySeen, FullDependencies, FullDependenciesResult};
pub use error::{CasError, ScanError};
pub use include_tree::{IncludeTree, IncludeTreeRoot};
pub use module::{Command, ModuleDeps, ModuleId, ModuleOutputKind, PrebuiltModuleDep};
