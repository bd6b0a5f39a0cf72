//! The engine handle and its lifecycle state machine.
//!
//! ```text
//! Created -> TableDefined -> Serving <-> Building
//!                  \______________________/
//!                             |
//!                           Closed
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use vdoc_core::config::EngineConfig;
use vdoc_core::request::{Request, Response};
use vdoc_core::status::{EngineState, EngineStatus, IndexStatus, MemoryInfo};
use vdoc_core::traits::VectorIndex;
use vdoc_core::{Doc, DocId, Error, Result, Schema, Table};
use vdoc_index::BackendRegistry;
use vdoc_store::DocStore;

use crate::gate::AdmissionGate;
use crate::query;

pub(crate) struct TableCtx {
    pub(crate) schema: Arc<Schema>,
    pub(crate) store: DocStore,
}

/// A completed index generation. Search only ever sees one of these.
#[derive(Clone, Default)]
pub struct IndexSnapshot {
    pub generation: u64,
    pub fields: HashMap<String, Arc<dyn VectorIndex>>,
}

impl IndexSnapshot {
    pub fn is_built(&self) -> bool {
        self.generation > 0
    }

    pub fn indexed(&self) -> u64 {
        self.fields.values().map(|i| i.len() as u64).max().unwrap_or(0)
    }

    pub fn memory_bytes(&self) -> u64 {
        self.fields.values().map(|i| i.memory_bytes() as u64).sum()
    }
}

pub struct Engine {
    pub(crate) config: RwLock<EngineConfig>,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) table: RwLock<Option<Arc<TableCtx>>>,
    pub(crate) registry: BackendRegistry,
    pub(crate) indexes: RwLock<Arc<IndexSnapshot>>,
    /// Doc numbers written since the last build that carry vectors.
    pub(crate) dirty: Mutex<BTreeSet<DocId>>,
    /// Writers hold it shared; build bookkeeping and dump capture hold it
    /// exclusively so a store write and its dirty mark are seen together.
    pub(crate) write_pause: RwLock<()>,
    pub(crate) build_lock: Mutex<()>,
    pub(crate) gate: AdmissionGate,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_registry(config, BackendRegistry::with_defaults())
    }

    pub fn with_registry(config: EngineConfig, registry: BackendRegistry) -> Result<Self> {
        config.validate()?;
        let gate = AdmissionGate::new(config.max_in_flight, config.admission);
        info!(path = %config.path.display(), max_in_flight = config.max_in_flight, "engine created");
        Ok(Self {
            config: RwLock::new(config),
            state: Mutex::new(EngineState::Created),
            table: RwLock::new(None),
            registry,
            indexes: RwLock::new(Arc::new(IndexSnapshot::default())),
            dirty: Mutex::new(BTreeSet::new()),
            write_pause: RwLock::new(()),
            build_lock: Mutex::new(()),
            gate,
        })
    }

    /// Installs logging for `config.log_dir` and creates the engine.
    pub fn open(config: EngineConfig) -> anyhow::Result<Self> {
        vdoc_core::logging::init(config.log_dir.as_deref())?;
        Ok(Self::new(config)?)
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub(crate) fn ctx(&self) -> Result<Arc<TableCtx>> {
        let ctx = self.table.read().clone();
        match ctx {
            Some(ctx) => Ok(ctx),
            None if self.state() == EngineState::Closed => Err(Error::EngineClosed),
            None => Err(Error::NoTable),
        }
    }

    /// Fails unless the engine is in a state that accepts `op`.
    pub(crate) fn require(&self, op: &'static str, allowed: &[EngineState]) -> Result<EngineState> {
        let state = self.state();
        if state == EngineState::Closed {
            return Err(Error::EngineClosed);
        }
        if allowed.contains(&state) {
            Ok(state)
        } else if state == EngineState::Created {
            Err(Error::NoTable)
        } else {
            Err(Error::InvalidState { op, state })
        }
    }

    pub(crate) fn require_operational(&self, op: &'static str) -> Result<()> {
        self.require(op, &[EngineState::TableDefined, EngineState::Serving, EngineState::Building])
            .map(|_| ())
    }

    pub(crate) fn set_state(&self, next: EngineState) {
        let mut state = self.state.lock();
        if *state != EngineState::Closed {
            debug!(from = %*state, to = %next, "state transition");
            *state = next;
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.indexes.read())
    }

    pub fn create_table(&self, table: Table) -> Result<()> {
        let _permit = self.gate.acquire()?;
        let schema = Schema::new(table)?;
        for info in schema.vectors() {
            // surface a missing backend now rather than at build time
            self.registry.factory(info)?;
        }

        let mut state = self.state.lock();
        match *state {
            EngineState::Created => {}
            EngineState::Closed => return Err(Error::EngineClosed),
            _ => return Err(Error::AlreadyExists(schema.name().to_string())),
        }
        let capacity = self.config.read().max_doc_size;
        let schema = Arc::new(schema);
        *self.table.write() = Some(Arc::new(TableCtx {
            store: DocStore::new(Arc::clone(&schema), capacity),
            schema: Arc::clone(&schema),
        }));
        *state = EngineState::TableDefined;
        info!(
            table = schema.name(),
            fields = schema.table().fields.len(),
            vectors = schema.vectors().len(),
            "table created"
        );
        Ok(())
    }

    pub fn table(&self) -> Result<Table> {
        Ok(self.ctx()?.schema.table().clone())
    }

    pub fn get_doc(&self, key: &str) -> Result<Doc> {
        self.require_operational("get")?;
        self.ctx()?.store.get(key)
    }

    pub fn get_doc_by_docid(&self, docid: DocId) -> Result<Doc> {
        self.require_operational("get")?;
        self.ctx()?.store.get_by_docid(docid)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let _permit = self.gate.acquire()?;
        self.require_operational("delete")?;
        let ctx = self.ctx()?;
        let _pause = self.write_pause.read();
        let docid = ctx.store.delete(key)?;
        self.dirty.lock().remove(&docid);
        debug!(key, docid, "document deleted");
        Ok(())
    }

    pub fn search(&self, request: &Request) -> Result<Response> {
        let _permit = self.gate.acquire()?;
        self.require_operational("search")?;
        let ctx = self.ctx()?;
        let snapshot = self.snapshot();
        query::execute(&ctx, &snapshot, request)
    }

    pub fn status(&self) -> Result<EngineStatus> {
        let state = self.state();
        if state == EngineState::Closed {
            return Err(Error::EngineClosed);
        }
        let snapshot = self.snapshot();
        let index_status = if state == EngineState::Building {
            IndexStatus::Indexing
        } else if snapshot.is_built() {
            IndexStatus::Indexed
        } else {
            IndexStatus::Unindexed
        };
        let (doc_num, max_docid) = match self.table.read().as_ref() {
            Some(ctx) => (ctx.store.len() as u64, u64::from(ctx.store.max_docid())),
            None => (0, 0),
        };
        Ok(EngineStatus {
            state,
            index_status,
            doc_num,
            max_docid,
            indexed_num: snapshot.indexed(),
            dirty_num: self.dirty.lock().len() as u64,
            index_generation: snapshot.generation,
            in_flight: self.gate.in_flight() as u64,
        })
    }

    pub fn memory_info(&self) -> Result<MemoryInfo> {
        if self.state() == EngineState::Closed {
            return Err(Error::EngineClosed);
        }
        let store = self
            .table
            .read()
            .as_ref()
            .map(|ctx| ctx.store.memory())
            .unwrap_or_default();
        Ok(MemoryInfo {
            table_mem: store.table_bytes,
            vector_mem: store.vector_bytes,
            index_mem: self.snapshot().memory_bytes(),
        })
    }

    pub fn get_config(&self) -> Result<EngineConfig> {
        if self.state() == EngineState::Closed {
            return Err(Error::EngineClosed);
        }
        Ok(self.config.read().clone())
    }

    /// Applies `max_in_flight`, `admission` and `build_threads`. Other
    /// fields must match the running configuration or are ignored.
    pub fn set_config(&self, next: EngineConfig) -> Result<()> {
        if self.state() == EngineState::Closed {
            return Err(Error::EngineClosed);
        }
        next.validate()?;
        let mut config = self.config.write();
        if next.path != config.path {
            return Err(Error::InvalidConfig(format!(
                "path cannot change at runtime ({} -> {})",
                config.path.display(),
                next.path.display()
            )));
        }
        if next.max_doc_size != config.max_doc_size || next.log_dir != config.log_dir {
            debug!("ignoring max_doc_size/log_dir in runtime config update");
        }
        config.max_in_flight = next.max_in_flight;
        config.admission = next.admission;
        config.build_threads = next.build_threads;
        self.gate.reconfigure(config.max_in_flight, config.admission);
        info!(
            max_in_flight = config.max_in_flight,
            admission = ?config.admission,
            build_threads = config.build_threads,
            "config updated"
        );
        Ok(())
    }

    /// Stops admission, waits for in-flight calls, then drops all data.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == EngineState::Closed {
                return Err(Error::EngineClosed);
            }
            *state = EngineState::Closed;
        }
        self.gate.close_and_drain();
        if let Some(ctx) = self.table.write().take() {
            ctx.store.clear();
        }
        *self.indexes.write() = Arc::new(IndexSnapshot::default());
        self.dirty.lock().clear();
        info!("engine closed");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.state() != EngineState::Closed {
            debug!("engine dropped without close");
        }
    }
}
