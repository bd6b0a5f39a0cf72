//! Seams between the engine and pluggable similarity-index backends.

use crate::error::{Error, Result};
use crate::schema::VectorInfo;
use crate::types::{DocId, MetricType, RetrievalType};

/// One raw backend hit. `distance` is in the metric's native unit
/// (squared L2 or inner product).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub docid: DocId,
    pub distance: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexHits {
    /// Candidates accepted by `accept_doc`, before the distance filter.
    pub total: u64,
    pub neighbors: Vec<Neighbor>,
}

/// Per-call search knobs handed to a backend.
pub struct SearchOptions<'a> {
    pub k: usize,
    /// Request-level backend parameters (e.g. `nprobe`), opaque to the engine.
    pub params: &'a serde_json::Value,
    /// Liveness and scalar filters.
    pub accept_doc: &'a (dyn Fn(DocId) -> bool + Sync),
    /// Score range, applied after `total` is counted.
    pub accept_distance: &'a (dyn Fn(f32) -> bool + Sync),
}

pub trait VectorIndex: Send + Sync {
    fn kind(&self) -> RetrievalType;
    fn dimension(&self) -> usize;
    fn metric(&self) -> MetricType;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_trained(&self) -> bool;

    /// Fits any learned structure. Backends without training are no-ops.
    fn train(&mut self, _sample: &[&[f32]]) -> Result<()> {
        Ok(())
    }

    fn add(&mut self, docid: DocId, vector: &[f32]) -> Result<()>;

    fn search(&self, query: &[f32], opts: &SearchOptions<'_>) -> Result<IndexHits>;

    fn serialize(&self) -> Result<Vec<u8>>;

    fn memory_bytes(&self) -> usize;

    fn box_clone(&self) -> Box<dyn VectorIndex>;

    /// Checks a vector before it is stored.
    fn validate(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.dimension() {
            Ok(())
        } else {
            Err(Error::InvalidDocument(format!(
                "vector has dimension {}, expected {}",
                vector.len(),
                self.dimension()
            )))
        }
    }
}

pub trait IndexFactory: Send + Sync {
    fn create(&self, info: &VectorInfo) -> Result<Box<dyn VectorIndex>>;
    fn deserialize(&self, info: &VectorInfo, bytes: &[u8]) -> Result<Box<dyn VectorIndex>>;
}
