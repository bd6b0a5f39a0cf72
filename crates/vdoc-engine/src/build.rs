//! Index build and rebuild. A build produces a whole new [`IndexSnapshot`]
//! that is swapped in only on success; search keeps using the previous one
//! until then.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use vdoc_core::status::EngineState;
use vdoc_core::traits::VectorIndex;
use vdoc_core::{DocId, Error, Result, VectorInfo};

use crate::engine::{Engine, IndexSnapshot, TableCtx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildOptions {
    /// Discard the current index and build from every stored document.
    pub drop_before_rebuild: bool,
    /// Build threads; `0` uses the configured `build_threads`.
    pub limit_cpu: usize,
    /// Report what a rebuild would do without doing it.
    pub describe: bool,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self { drop_before_rebuild: true, limit_cpu: 0, describe: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldReport {
    pub name: String,
    pub retrieval_type: String,
    pub indexed: u64,
    pub dirty: u64,
    pub dropped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub dry_run: bool,
    /// Generation in effect after the call.
    pub generation: u64,
    pub threads: usize,
    pub fields: Vec<FieldReport>,
}

enum Mode {
    Full,
    Merge(Arc<IndexSnapshot>),
}

impl Engine {
    /// Builds every vector field's index from all stored documents.
    pub fn build_index(&self) -> Result<RebuildReport> {
        self.rebuild_index(RebuildOptions::default())
    }

    pub fn rebuild_index(&self, opts: RebuildOptions) -> Result<RebuildReport> {
        let _permit = self.gate.acquire()?;
        let ctx = self.ctx()?;
        let threads = match opts.limit_cpu {
            0 => self.config.read().build_threads,
            n => n,
        };
        if opts.describe {
            self.require_operational("describe rebuild")?;
            return Ok(self.describe(&ctx, opts, threads));
        }
        let _build = self.build_lock.lock();
        self.run_build(&ctx, opts, threads)
    }

    /// Starts the first build once the table reaches `indexing_size`. Skipped
    /// when a build is already running.
    pub(crate) fn maybe_auto_build(&self) {
        let Ok(ctx) = self.ctx() else { return };
        let threshold = ctx.schema.indexing_size();
        if threshold == 0 || self.snapshot().is_built() || ctx.store.len() < threshold as usize {
            return;
        }
        // same order as rebuild_index: permit, then build lock
        let Ok(_permit) = self.gate.acquire() else { return };
        let Some(_build) = self.build_lock.try_lock() else { return };
        if self.snapshot().is_built() {
            return;
        }
        info!(docs = ctx.store.len(), threshold, "indexing_size reached, building index");
        let threads = self.config.read().build_threads;
        if let Err(e) = self.run_build(&ctx, RebuildOptions::default(), threads) {
            warn!(error = %e, "automatic index build failed");
        }
    }

    fn describe(&self, ctx: &TableCtx, opts: RebuildOptions, threads: usize) -> RebuildReport {
        let snapshot = self.snapshot();
        let dirty: Vec<DocId> = self.dirty.lock().iter().copied().collect();
        let fields = ctx
            .schema
            .vectors()
            .iter()
            .map(|info| {
                let dirty = dirty
                    .iter()
                    .filter(|id| {
                        ctx.store
                            .get_arc(**id)
                            .is_some_and(|d| d.get(&info.name).and_then(|v| v.as_vector()).is_some())
                    })
                    .count() as u64;
                FieldReport {
                    name: info.name.clone(),
                    retrieval_type: info.retrieval_type.clone(),
                    indexed: snapshot.fields.get(&info.name).map_or(0, |i| i.len() as u64),
                    dirty,
                    dropped: opts.drop_before_rebuild && snapshot.is_built(),
                }
            })
            .collect();
        RebuildReport { dry_run: true, generation: snapshot.generation, threads, fields }
    }

    /// Caller holds `build_lock` and a gate permit.
    fn run_build(&self, ctx: &TableCtx, opts: RebuildOptions, threads: usize) -> Result<RebuildReport> {
        let previous = self.require("build index", &[EngineState::TableDefined, EngineState::Serving])?;
        self.set_state(EngineState::Building);
        let started = Instant::now();

        // Everything below `watermark` is covered by this build; later writes
        // stay dirty for the catch-up pass.
        let (drained, watermark) = {
            let _pause = self.write_pause.write();
            (std::mem::take(&mut *self.dirty.lock()), ctx.store.max_docid())
        };
        let current = self.snapshot();
        let mode = if opts.drop_before_rebuild || !current.is_built() {
            Mode::Full
        } else {
            Mode::Merge(Arc::clone(&current))
        };

        let outcome = self
            .build_fields(ctx, &mode, &drained, watermark, threads)
            .and_then(|fields| self.catch_up_and_swap(ctx, fields, current.generation + 1));

        match outcome {
            Ok((snapshot, caught_up)) => {
                self.set_state(EngineState::Serving);
                info!(
                    generation = snapshot.generation,
                    indexed = snapshot.indexed(),
                    caught_up,
                    full = matches!(mode, Mode::Full),
                    threads,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "index build finished"
                );
                Ok(RebuildReport {
                    dry_run: false,
                    generation: snapshot.generation,
                    threads,
                    fields: ctx
                        .schema
                        .vectors()
                        .iter()
                        .map(|info| FieldReport {
                            name: info.name.clone(),
                            retrieval_type: info.retrieval_type.clone(),
                            indexed: snapshot.fields.get(&info.name).map_or(0, |i| i.len() as u64),
                            dirty: 0,
                            dropped: matches!(mode, Mode::Full) && current.is_built(),
                        })
                        .collect(),
                })
            }
            Err(e) => {
                self.dirty.lock().extend(drained);
                self.set_state(previous);
                error!(error = %e, "index build failed, keeping previous index");
                Err(e)
            }
        }
    }

    fn build_fields(
        &self,
        ctx: &TableCtx,
        mode: &Mode,
        drained: &BTreeSet<DocId>,
        watermark: DocId,
        threads: usize,
    ) -> Result<HashMap<String, Box<dyn VectorIndex>>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("vdoc-build-{}", i))
            .build()
            .map_err(|e| Error::IndexBackend(format!("build pool: {}", e)))?;

        let vectors = ctx.schema.vectors();
        pool.install(|| {
            vectors
                .par_iter()
                .map(|info| {
                    let index = match mode {
                        Mode::Full => self.build_full(ctx, info, watermark),
                        Mode::Merge(prev) => self.build_merge(ctx, info, prev, drained),
                    }?;
                    Ok((info.name.clone(), index))
                })
                .collect::<Result<HashMap<_, _>>>()
        })
    }

    fn build_full(&self, ctx: &TableCtx, info: &VectorInfo, watermark: DocId) -> Result<Box<dyn VectorIndex>> {
        let mut rows: Vec<(DocId, Vec<f32>)> = Vec::new();
        ctx.store.for_each_vector(&info.name, |docid, v| {
            if docid < watermark {
                rows.push((docid, v.to_vec()));
            }
        });
        let mut index = self.registry.create(info)?;
        if !index.is_trained() {
            let sample: Vec<&[f32]> = rows.iter().map(|(_, v)| v.as_slice()).collect();
            index.train(&sample)?;
        }
        for (docid, v) in &rows {
            index.add(*docid, v)?;
        }
        Ok(index)
    }

    fn build_merge(
        &self,
        ctx: &TableCtx,
        info: &VectorInfo,
        prev: &IndexSnapshot,
        drained: &BTreeSet<DocId>,
    ) -> Result<Box<dyn VectorIndex>> {
        let mut index = match prev.fields.get(&info.name) {
            Some(existing) => existing.box_clone(),
            None => self.registry.create(info)?,
        };
        add_docs(ctx, info, index.as_mut(), drained.iter().copied())?;
        Ok(index)
    }

    /// Folds in writes that landed during the build, then publishes the new
    /// snapshot. Writers are paused only for this step.
    fn catch_up_and_swap(
        &self,
        ctx: &TableCtx,
        mut fields: HashMap<String, Box<dyn VectorIndex>>,
        generation: u64,
    ) -> Result<(Arc<IndexSnapshot>, usize)> {
        let _pause = self.write_pause.write();
        let late: Vec<DocId> = self.dirty.lock().iter().copied().collect();
        for info in ctx.schema.vectors() {
            if let Some(index) = fields.get_mut(&info.name) {
                add_docs(ctx, info, index.as_mut(), late.iter().copied())?;
            }
        }
        self.dirty.lock().clear();
        let snapshot = Arc::new(IndexSnapshot {
            generation,
            fields: fields.into_iter().map(|(k, v)| (k, Arc::from(v))).collect(),
        });
        *self.indexes.write() = Arc::clone(&snapshot);
        Ok((snapshot, late.len()))
    }
}

fn add_docs(
    ctx: &TableCtx,
    info: &VectorInfo,
    index: &mut dyn VectorIndex,
    docids: impl Iterator<Item = DocId>,
) -> Result<()> {
    for docid in docids {
        let Some(doc) = ctx.store.get_arc(docid) else { continue };
        if let Some(v) = doc.get(&info.name).and_then(|v| v.as_vector()) {
            index.add(docid, v)?;
        }
    }
    Ok(())
}
