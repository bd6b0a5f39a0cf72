//! In-memory document store keyed by `_id`, with dense internal doc numbers.
//!
//! Every insert or overwrite assigns the next doc number. An overwrite
//! tombstones the previous number, so an index built before the overwrite
//! can still return it and the caller filters it out with [`DocStore::is_live`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;
use vdoc_core::{Doc, DocId, Error, FieldKind, Result, Schema};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub docid: DocId,
    /// Doc number tombstoned by this write, if it was an overwrite.
    pub replaced: Option<DocId>,
    /// Fields removed because the schema does not know them or types differ.
    pub dropped: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMemory {
    pub table_bytes: u64,
    pub vector_bytes: u64,
}

#[derive(Default)]
struct Inner {
    ids: HashMap<String, DocId>,
    slots: Vec<Option<Arc<Doc>>>,
    table_bytes: usize,
    vector_bytes: usize,
}

impl Inner {
    fn account(&mut self, doc: &Doc, add: bool) {
        let (mut scalar, mut vector) = (0, 0);
        for (name, value) in doc.iter() {
            if value.data_type().is_vector() {
                vector += name.len() + value.memory_bytes();
            } else {
                scalar += name.len() + value.memory_bytes();
            }
        }
        if add {
            self.table_bytes += scalar;
            self.vector_bytes += vector;
        } else {
            self.table_bytes = self.table_bytes.saturating_sub(scalar);
            self.vector_bytes = self.vector_bytes.saturating_sub(vector);
        }
    }

    fn tombstone(&mut self, docid: DocId) {
        if let Some(doc) = self.slots.get_mut(docid as usize).and_then(Option::take) {
            self.account(&doc, false);
        }
    }
}

pub struct DocStore {
    schema: Arc<Schema>,
    capacity: u32,
    inner: RwLock<Inner>,
}

impl DocStore {
    /// `capacity` bounds the number of doc numbers ever assigned.
    pub fn new(schema: Arc<Schema>, capacity: u32) -> Self {
        Self { schema, capacity, inner: RwLock::new(Inner::default()) }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Removes fields the schema does not accept and returns their names.
    fn sanitize(&self, doc: &mut Doc) -> Vec<String> {
        let dropped: Vec<String> = doc
            .iter()
            .filter(|(name, value)| match self.schema.lookup(name) {
                None => true,
                Some(FieldKind::Scalar(t)) => value.data_type() != t,
                Some(FieldKind::Vector(_)) => !value.data_type().is_vector(),
            })
            .map(|(name, _)| name.to_string())
            .collect();
        for name in &dropped {
            doc.remove(name);
        }
        dropped
    }

    /// Inserts or overwrites by `_id`. The swap is atomic for readers.
    pub fn put(&self, mut doc: Doc) -> Result<PutOutcome> {
        let dropped = self.sanitize(&mut doc);
        let key = doc
            .key()
            .ok_or_else(|| Error::InvalidDocument("missing or non-UTF-8 '_id'".into()))?
            .to_string();
        if !dropped.is_empty() {
            warn!(key = %key, fields = ?dropped, "dropping fields not in schema");
        }

        let mut inner = self.inner.write();
        if inner.slots.len() >= self.capacity as usize {
            return Err(Error::Store(format!("store is full ({} doc numbers)", self.capacity)));
        }
        let docid = DocId::try_from(inner.slots.len())
            .map_err(|_| Error::Store("doc number space exhausted".into()))?;
        let replaced = inner.ids.insert(key, docid);
        if let Some(old) = replaced {
            inner.tombstone(old);
        }
        inner.account(&doc, true);
        inner.slots.push(Some(Arc::new(doc)));
        Ok(PutOutcome { docid, replaced, dropped })
    }

    pub fn get(&self, key: &str) -> Result<Doc> {
        let inner = self.inner.read();
        inner
            .ids
            .get(key)
            .and_then(|&id| inner.slots.get(id as usize))
            .and_then(Option::as_ref)
            .map(|d| d.as_ref().clone())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    pub fn get_by_docid(&self, docid: DocId) -> Result<Doc> {
        self.get_arc(docid)
            .map(|d| d.as_ref().clone())
            .ok_or_else(|| Error::NotFound(format!("docid {}", docid)))
    }

    pub fn get_arc(&self, docid: DocId) -> Option<Arc<Doc>> {
        self.inner.read().slots.get(docid as usize).and_then(Clone::clone)
    }

    pub fn docid_of(&self, key: &str) -> Option<DocId> {
        self.inner.read().ids.get(key).copied()
    }

    pub fn delete(&self, key: &str) -> Result<DocId> {
        let mut inner = self.inner.write();
        let docid = inner.ids.remove(key).ok_or_else(|| Error::NotFound(key.to_string()))?;
        inner.tombstone(docid);
        Ok(docid)
    }

    pub fn is_live(&self, docid: DocId) -> bool {
        matches!(self.inner.read().slots.get(docid as usize), Some(Some(_)))
    }

    /// Live document count.
    pub fn len(&self) -> usize {
        self.inner.read().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next doc number to be assigned.
    pub fn max_docid(&self) -> DocId {
        // slots.len() never exceeds capacity, which is a u32
        DocId::try_from(self.inner.read().slots.len()).unwrap_or(DocId::MAX)
    }

    /// Calls `f` for every live document carrying vector `field`, in doc
    /// number order, under one read lock.
    pub fn for_each_vector<F>(&self, field: &str, mut f: F)
    where
        F: FnMut(DocId, &[f32]),
    {
        let inner = self.inner.read();
        for (i, slot) in inner.slots.iter().enumerate() {
            if let Some(v) = slot.as_ref().and_then(|d| d.get(field)).and_then(|v| v.as_vector()) {
                f(i as DocId, v);
            }
        }
    }

    /// Live documents in doc number order, plus the next doc number.
    pub fn snapshot(&self) -> (DocId, Vec<(DocId, Arc<Doc>)>) {
        let inner = self.inner.read();
        let docs = inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|d| (i as DocId, Arc::clone(d))))
            .collect();
        (DocId::try_from(inner.slots.len()).unwrap_or(DocId::MAX), docs)
    }

    /// Rebuilds an empty store from a snapshot, keeping doc numbers.
    pub fn restore(&self, next_docid: DocId, docs: Vec<(DocId, Doc)>) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.slots.is_empty() {
            return Err(Error::Store("restore into a non-empty store".into()));
        }
        if next_docid > self.capacity {
            return Err(Error::CorruptState(format!(
                "snapshot uses {} doc numbers, capacity is {}",
                next_docid, self.capacity
            )));
        }
        let mut fresh = Inner { slots: vec![None; next_docid as usize], ..Inner::default() };
        for (docid, doc) in docs {
            let key = doc
                .key()
                .ok_or_else(|| Error::CorruptState(format!("docid {} has no key", docid)))?
                .to_string();
            let idx = docid as usize;
            match fresh.slots.get(idx) {
                None => return Err(Error::CorruptState(format!("docid {} out of range", docid))),
                Some(Some(_)) => return Err(Error::CorruptState(format!("docid {} appears twice", docid))),
                Some(None) => {}
            }
            if fresh.ids.insert(key.clone(), docid).is_some() {
                return Err(Error::CorruptState(format!("key '{}' appears twice", key)));
            }
            fresh.account(&doc, true);
            fresh.slots[idx] = Some(Arc::new(doc));
        }
        *inner = fresh;
        Ok(())
    }

    pub fn memory(&self) -> StoreMemory {
        let inner = self.inner.read();
        StoreMemory {
            table_bytes: (inner.table_bytes + inner.ids.len() * std::mem::size_of::<DocId>()) as u64,
            vector_bytes: inner.vector_bytes as u64,
        }
    }

    pub fn clear(&self) {
        *self.inner.write() = Inner::default();
    }
}
