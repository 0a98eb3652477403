//! # aea_core - Overhead-Line Structure Engine
//!
//! `aea_core` designs and verifies concrete-pole structures of HV overhead
//! lines under AEA 95301. A structure document goes through a chain of
//! stages, each a pure function of the document and its upstream results:
//!
//! ```text
//! CMC → DGE → DME → ArbolesCarga
//!              ├──→ SPH → Fundacion ──┐
//!              └──→ AEE ──────────────┴→ Costeo
//! ```
//!
//! Results are cached on disk under content fingerprints, so changing a
//! cost coefficient reruns only the costing while changing the span reruns
//! everything.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aea_core::{Pipeline, Scope, StructureConfig};
//! use std::path::Path;
//!
//! let config = StructureConfig::from_path(Path::new("S132.json"))?;
//! let run = Pipeline::new("cache").run(&config, &Scope::standalone(&config.titulo), &[])?;
//! if let Some(costing) = &run.outputs.costing {
//!     println!("total: {:.2} UM", costing.costos.total);
//! }
//! # Ok::<(), aea_core::CalcError>(())
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Structure document and its parameter groups
//! - [`catalog`] - Cables, load hypotheses and commercial poles
//! - [`calculations`] - The solver stages
//! - [`loads`] - Typed nodal load components
//! - [`fingerprint`] - Stage fingerprints
//! - [`cache`] - Artifact store
//! - [`pipeline`] - Orchestrator, run log and cancellation
//! - [`family`] - Families of structures sharing an overlay
//! - [`file_io`] - Atomic writes and locking
//! - [`errors`] - Structured error types

pub mod cache;
pub mod calculations;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod family;
pub mod file_io;
pub mod fingerprint;
pub mod loads;
pub mod pipeline;
pub mod render;
pub mod trace;
pub mod units;

pub use cache::{Artifact, Cache};
pub use calculations::Stage;
pub use config::StructureConfig;
pub use errors::{CalcError, CalcResult, ErrorKind};
pub use family::{Family, FamilyReport, FamilyRunner};
pub use fingerprint::Scope;
pub use pipeline::{CancelToken, Pipeline, PipelineOptions, PipelineRun, RunLog, StageOutcome};
