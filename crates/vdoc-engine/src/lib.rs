//! Embeddable vector document engine: one table, a document store, per-field
//! vector indexes and filtered top-k search.
//!
//! ```no_run
//! use vdoc_core::{config::EngineConfig, DataType, FieldInfo, RetrievalType, Table, VectorInfo};
//! use vdoc_engine::Engine;
//!
//! # fn main() -> anyhow::Result<()> {
//! let engine = Engine::open(EngineConfig::load()?)?;
//! engine.create_table(
//!     Table::new("docs")
//!         .field(FieldInfo::new("title", DataType::String))
//!         .vector(VectorInfo::new("emb", 4, RetrievalType::Flat)),
//! )?;
//! # Ok(())
//! # }
//! ```

mod batch;
mod build;
mod engine;
mod filter;
pub mod gate;
mod persist;
mod query;

pub use batch::StagedBatch;
pub use build::{FieldReport, RebuildOptions, RebuildReport};
pub use engine::{Engine, IndexSnapshot};
pub use gate::{AdmissionGate, Permit};
pub use persist::{DumpManifest, DUMP_FORMAT_VERSION};
