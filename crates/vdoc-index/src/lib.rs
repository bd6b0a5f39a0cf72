//! Index backends and the registry the engine selects them from.
//!
//! Only the exact FLAT backend ships here. Approximate backends (IVFPQ,
//! IVFFLAT, HNSW) plug in through [`BackendRegistry::register`] with their own
//! [`IndexFactory`].

pub mod flat;
pub mod metric;

use std::collections::HashMap;
use std::sync::Arc;

use vdoc_core::traits::{IndexFactory, VectorIndex};
use vdoc_core::{Error, Result, RetrievalType, VectorInfo};

pub use flat::{FlatFactory, FlatIndex};
pub use metric::{neighbor_order, top_k};

#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<RetrievalType, Arc<dyn IndexFactory>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(RetrievalType::Flat, Arc::new(FlatFactory));
        registry
    }

    pub fn register(&mut self, kind: RetrievalType, factory: Arc<dyn IndexFactory>) -> &mut Self {
        if self.factories.insert(kind, factory).is_some() {
            tracing::debug!(%kind, "replacing index backend");
        }
        self
    }

    pub fn supports(&self, kind: RetrievalType) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn factory(&self, info: &VectorInfo) -> Result<&Arc<dyn IndexFactory>> {
        let kind = info.retrieval()?;
        self.factories.get(&kind).ok_or_else(|| {
            Error::IndexBackend(format!("no backend registered for {} (field '{}')", kind, info.name))
        })
    }

    pub fn create(&self, info: &VectorInfo) -> Result<Box<dyn VectorIndex>> {
        self.factory(info)?.create(info)
    }

    pub fn deserialize(&self, info: &VectorInfo, bytes: &[u8]) -> Result<Box<dyn VectorIndex>> {
        self.factory(info)?.deserialize(info, bytes)
    }
}
