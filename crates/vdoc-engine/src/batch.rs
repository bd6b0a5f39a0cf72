//! Batch ingestion: direct batches of encoded docs and the staged
//! set-count / stage / finish protocol.

use tracing::{debug, warn};
use vdoc_core::request::{BatchItem, BatchResult};
use vdoc_core::{Doc, DocId, Error, Result};

use crate::engine::{Engine, TableCtx};

/// Fixed-size staging area for one two-phase batch. Slots may be filled in
/// any order; [`Engine::finish_batch`] commits them in slot order.
#[derive(Debug, Default)]
pub struct StagedBatch {
    slots: Vec<Option<Vec<u8>>>,
}

impl StagedBatch {
    pub fn new(count: usize) -> Self {
        Self { slots: vec![None; count] }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Places one encoded doc at `slot`, replacing anything staged there.
    pub fn stage(&mut self, slot: usize, buffer: Vec<u8>) -> Result<()> {
        let len = self.slots.len();
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| Error::InvalidRequest(format!("slot {} out of range for batch of {}", slot, len)))?;
        *entry = Some(buffer);
        Ok(())
    }

    pub fn is_staged(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Some(_)))
    }

    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Hands out every staged buffer if all `count` slots are filled. On any
    /// error the staged slots are left untouched.
    pub fn take_complete(&mut self, count: usize) -> Result<Vec<Vec<u8>>> {
        if count != self.slots.len() {
            return Err(Error::InvalidRequest(format!(
                "finish called with {} but batch has {} slots",
                count,
                self.slots.len()
            )));
        }
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(Error::IncompleteBatch { missing });
        }
        Ok(std::mem::take(&mut self.slots).into_iter().flatten().collect())
    }
}

/// How dropped fields affect the reported outcome of a write.
#[derive(Clone, Copy, PartialEq, Eq)]
enum DroppedFields {
    Warn,
    Fail,
}

impl Engine {
    /// Writes one encoded doc. Unknown fields are dropped with a warning.
    pub fn add_or_update(&self, buffer: &[u8]) -> Result<DocId> {
        let doc = vdoc_codec::decode::<Doc>(buffer)?;
        self.add_or_update_doc(doc)
    }

    pub fn add_or_update_doc(&self, doc: Doc) -> Result<DocId> {
        let docid = {
            let _permit = self.gate.acquire()?;
            self.require_operational("write")?;
            let ctx = self.ctx()?;
            self.commit_one(&ctx, doc, DroppedFields::Warn)?
        };
        self.maybe_auto_build();
        Ok(docid)
    }

    /// Decodes and commits N encoded docs. Each slot of the result reports its
    /// own outcome; a bad doc never aborts the rest.
    pub fn add_or_update_docs(&self, buffers: &[&[u8]]) -> Result<BatchResult> {
        let decoded = vdoc_codec::decode_docs(buffers);
        self.commit_batch(decoded)
    }

    pub fn add_or_update_doc_list(&self, docs: Vec<Doc>) -> Result<BatchResult> {
        self.commit_batch(docs.into_iter().map(Ok).collect())
    }

    /// Commits a fully staged batch and releases its staging area. Any
    /// call-level failure (incomplete batch, admission, lifecycle) happens
    /// before the slots are taken, so the staged docs survive for a retry.
    pub fn finish_batch(&self, batch: &mut StagedBatch, count: usize) -> Result<BatchResult> {
        let result = {
            let _permit = self.gate.acquire()?;
            self.require_operational("write")?;
            let ctx = self.ctx()?;
            let buffers = batch.take_complete(count)?;
            let refs: Vec<&[u8]> = buffers.iter().map(Vec::as_slice).collect();
            self.commit_items(&ctx, vdoc_codec::decode_docs(&refs))
        };
        self.maybe_auto_build();
        Ok(result)
    }

    fn commit_batch(&self, docs: Vec<Result<Doc>>) -> Result<BatchResult> {
        let result = {
            let _permit = self.gate.acquire()?;
            self.require_operational("write")?;
            let ctx = self.ctx()?;
            self.commit_items(&ctx, docs)
        };
        self.maybe_auto_build();
        Ok(result)
    }

    /// Caller holds a permit.
    fn commit_items(&self, ctx: &TableCtx, docs: Vec<Result<Doc>>) -> BatchResult {
        let items: Vec<BatchItem> = docs
            .into_iter()
            .map(|doc| match doc.and_then(|d| self.commit_one(ctx, d, DroppedFields::Fail)) {
                Ok(_) => BatchItem::ok(),
                Err(e) => BatchItem::failed(&e),
            })
            .collect();
        let failed = items.iter().filter(|i| !i.is_ok()).count();
        debug!(docs = items.len(), failed, "batch committed");
        BatchResult { items }
    }

    /// Validates vectors, stores the doc and records it as index-dirty.
    fn commit_one(&self, ctx: &TableCtx, doc: Doc, dropped_policy: DroppedFields) -> Result<DocId> {
        let snapshot = self.snapshot();
        for (name, vector) in doc.vector_fields() {
            let Some(info) = ctx.schema.vector_info(name) else { continue };
            match snapshot.fields.get(name) {
                Some(index) => index.validate(vector)?,
                None if vector.len() != info.dim() => {
                    return Err(Error::InvalidDocument(format!(
                        "vector '{}' has dimension {}, expected {}",
                        name,
                        vector.len(),
                        info.dimension
                    )))
                }
                None => {}
            }
        }

        let outcome = {
            let _pause = self.write_pause.read();
            let outcome = ctx.store.put(doc)?;
            // checked under the dirty lock: a racing overwrite of the same key
            // either sees our docid here or removes it after us
            let mut dirty = self.dirty.lock();
            let has_vectors = ctx
                .store
                .get_arc(outcome.docid)
                .is_some_and(|d| d.vector_fields().next().is_some());
            if let Some(old) = outcome.replaced {
                dirty.remove(&old);
            }
            if has_vectors {
                dirty.insert(outcome.docid);
            }
            outcome
        };

        if outcome.dropped.is_empty() {
            return Ok(outcome.docid);
        }
        match dropped_policy {
            DroppedFields::Warn => {
                warn!(docid = outcome.docid, fields = ?outcome.dropped, "document stored without unknown fields");
                Ok(outcome.docid)
            }
            DroppedFields::Fail => Err(Error::UnknownField(outcome.dropped.join(","))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdoc_core::config::{AdmissionPolicy, EngineConfig};
    use vdoc_core::{FieldValue, RetrievalType, Table, VectorInfo};

    #[test]
    fn incomplete_batch_keeps_slots() {
        let mut batch = StagedBatch::new(3);
        batch.stage(2, vec![2]).unwrap();
        batch.stage(0, vec![0]).unwrap();
        match batch.take_complete(3) {
            Err(Error::IncompleteBatch { missing }) => assert_eq!(missing, vec![1]),
            other => panic!("unexpected {:?}", other.map(|b| b.len())),
        }
        assert!(batch.is_staged(0) && batch.is_staged(2));

        batch.stage(1, vec![1]).unwrap();
        assert_eq!(batch.take_complete(3).unwrap(), vec![vec![0], vec![1], vec![2]]);
        assert!(batch.is_empty());
    }

    #[test]
    fn refused_finish_keeps_staged_docs() {
        let engine = Engine::new(EngineConfig::new("/tmp/vdoc-batch-unit")).unwrap();
        engine
            .create_table(Table::new("t").vector(VectorInfo::new("emb", 2, RetrievalType::Flat)))
            .unwrap();
        let mut config = engine.get_config().unwrap();
        config.max_in_flight = 1;
        config.admission = AdmissionPolicy::Reject;
        engine.set_config(config).unwrap();

        let mut batch = StagedBatch::new(2);
        for (slot, key) in ["a", "b"].into_iter().enumerate() {
            let mut d = Doc::with_key(key);
            d.set("emb", FieldValue::Vector(vec![slot as f32, 0.0]));
            batch.stage(slot, vdoc_codec::encode(&d).unwrap()).unwrap();
        }

        let held = engine.gate.acquire().unwrap();
        assert!(matches!(engine.finish_batch(&mut batch, 2), Err(Error::Overloaded { .. })));
        assert!(batch.is_staged(0) && batch.is_staged(1));
        assert_eq!(engine.status().unwrap().doc_num, 0);

        drop(held);
        let result = engine.finish_batch(&mut batch, 2).unwrap();
        assert_eq!(result.failures().count(), 0);
        assert!(batch.is_empty());
        assert_eq!(engine.get_doc("b").unwrap().key(), Some("b"));
    }

    #[test]
    fn stage_out_of_range() {
        let mut batch = StagedBatch::new(1);
        assert!(matches!(batch.stage(1, vec![]), Err(Error::InvalidRequest(_))));
        assert!(matches!(batch.take_complete(2), Err(Error::InvalidRequest(_))));
    }
}
