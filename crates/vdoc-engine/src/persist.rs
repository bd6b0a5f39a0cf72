//! Dump and load.
//!
//! Layout under `<path>/dump`:
//! - `manifest.json`: format version, counts, index generation, dirty doc
//!   numbers, and a BLAKE3 checksum for every other file
//! - `schema.bin`: encoded `Table`
//! - `docs.bin`: encoded `DocSet`
//! - `index/<field>.bin`: serialized index, one per built vector field
//!
//! A dump is written to `dump.partial`. The previous dump is moved aside to
//! `dump.old` before the new one is renamed into place, and load falls back
//! to `dump.old` when `dump` has no manifest.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vdoc_codec::DocSet;
use vdoc_core::status::EngineState;
use vdoc_core::{DocId, Error, Result, Schema, Table};
use vdoc_store::DocStore;

use crate::engine::{Engine, IndexSnapshot, TableCtx};

pub const DUMP_FORMAT_VERSION: u32 = 1;

const MANIFEST: &str = "manifest.json";
const SCHEMA_FILE: &str = "schema.bin";
const DOCS_FILE: &str = "docs.bin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpManifest {
    pub format_version: u32,
    pub table: String,
    pub doc_num: u64,
    pub next_docid: DocId,
    pub index_generation: u64,
    pub dirty: Vec<DocId>,
    pub created_at: DateTime<Utc>,
    /// Relative path -> BLAKE3 hex digest.
    pub checksums: BTreeMap<String, String>,
    /// Vector field -> relative path of its index file.
    pub indexes: BTreeMap<String, String>,
}

/// Field names may hold characters that are not safe in file names.
fn index_file_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for b in field.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    format!("index/{}.bin", out)
}

fn corrupt(msg: impl std::fmt::Display) -> Error {
    Error::CorruptState(msg.to_string())
}

fn write_file(dir: &Path, rel: &str, bytes: &[u8], checksums: &mut BTreeMap<String, String>) -> Result<()> {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, bytes)?;
    checksums.insert(rel.to_string(), blake3::hash(bytes).to_hex().to_string());
    Ok(())
}

fn read_verified(dir: &Path, rel: &str, manifest: &DumpManifest) -> Result<Vec<u8>> {
    let expected = manifest
        .checksums
        .get(rel)
        .ok_or_else(|| corrupt(format!("no checksum for {}", rel)))?;
    let bytes = fs::read(dir.join(rel)).map_err(|e| corrupt(format!("reading {}: {}", rel, e)))?;
    if blake3::hash(&bytes).to_hex().as_str() != expected {
        return Err(corrupt(format!("checksum mismatch for {}", rel)));
    }
    Ok(bytes)
}

struct Captured {
    next_docid: DocId,
    docs: Vec<(DocId, Arc<vdoc_core::Doc>)>,
    dirty: BTreeSet<DocId>,
    snapshot: Arc<IndexSnapshot>,
}

impl Engine {
    /// Writes a snapshot-consistent dump. Writers pause only while documents,
    /// the dirty set and the index snapshot are captured.
    pub fn dump(&self) -> Result<DumpManifest> {
        let _permit = self.gate.acquire()?;
        self.require_operational("dump")?;
        let ctx = self.ctx()?;
        let dir = self.config.read().dump_dir();

        let captured = {
            let _pause = self.write_pause.write();
            let (next_docid, docs) = ctx.store.snapshot();
            Captured { next_docid, docs, dirty: self.dirty.lock().clone(), snapshot: self.snapshot() }
        };

        let manifest = write_dump(&dir, &ctx.schema, captured)?;
        info!(
            dir = %dir.display(),
            docs = manifest.doc_num,
            generation = manifest.index_generation,
            "dump written"
        );
        Ok(manifest)
    }

    /// Restores a dump into an engine with no documents. The table is taken
    /// from the dump when none exists; otherwise the two must match.
    pub fn load(&self) -> Result<DumpManifest> {
        let _permit = self.gate.acquire()?;
        self.require("load", &[EngineState::Created, EngineState::TableDefined])?;
        let dir = locate_dump(self.config.read().dump_dir());

        let manifest_bytes = fs::read(dir.join(MANIFEST))
            .map_err(|e| corrupt(format!("reading {}: {}", MANIFEST, e)))?;
        let manifest: DumpManifest =
            serde_json::from_slice(&manifest_bytes).map_err(|e| corrupt(format!("bad manifest: {}", e)))?;
        if manifest.format_version != DUMP_FORMAT_VERSION {
            return Err(corrupt(format!(
                "dump format {} is not supported (expected {})",
                manifest.format_version, DUMP_FORMAT_VERSION
            )));
        }

        let table: Table = vdoc_codec::decode(&read_verified(&dir, SCHEMA_FILE, &manifest)?)
            .map_err(|e| corrupt(format!("{}: {}", SCHEMA_FILE, e)))?;
        let set: DocSet = vdoc_codec::decode(&read_verified(&dir, DOCS_FILE, &manifest)?)
            .map_err(|e| corrupt(format!("{}: {}", DOCS_FILE, e)))?;
        if set.docs.len() as u64 != manifest.doc_num || set.next_docid != manifest.next_docid {
            return Err(corrupt("document counts disagree with manifest"));
        }

        let existing = self.table.read().clone();
        let ctx = match existing {
            Some(ctx) => {
                if ctx.schema.table() != &table {
                    return Err(corrupt(format!("dump table '{}' does not match the defined table", table.name)));
                }
                if !ctx.store.is_empty() || ctx.store.max_docid() > 0 {
                    return Err(Error::InvalidState { op: "load into a non-empty table", state: self.state() });
                }
                ctx
            }
            None => {
                let schema = Arc::new(Schema::new(table).map_err(|e| corrupt(format!("dump schema: {}", e)))?);
                let capacity = self.config.read().max_doc_size;
                Arc::new(TableCtx { store: DocStore::new(Arc::clone(&schema), capacity), schema })
            }
        };

        let mut fields = std::collections::HashMap::new();
        for info in ctx.schema.vectors() {
            match manifest.indexes.get(&info.name) {
                Some(rel) => {
                    let bytes = read_verified(&dir, rel, &manifest)?;
                    let index = self
                        .registry
                        .deserialize(info, &bytes)
                        .map_err(|e| corrupt(format!("index '{}': {}", info.name, e)))?;
                    fields.insert(info.name.clone(), Arc::from(index));
                }
                None if manifest.index_generation > 0 => {
                    return Err(corrupt(format!("dump has no index for '{}'", info.name)));
                }
                None => {}
            }
        }

        ctx.store.restore(set.next_docid, set.docs)?;
        {
            let mut state = self.state.lock();
            if *state == EngineState::Closed {
                return Err(Error::EngineClosed);
            }
            *self.table.write() = Some(Arc::clone(&ctx));
            *self.indexes.write() = Arc::new(IndexSnapshot { generation: manifest.index_generation, fields });
            *self.dirty.lock() = manifest.dirty.iter().copied().collect();
            *state = EngineState::Serving;
        }
        info!(
            dir = %dir.display(),
            docs = manifest.doc_num,
            generation = manifest.index_generation,
            "dump loaded"
        );
        Ok(manifest)
    }
}

fn write_dump(dir: &Path, schema: &Schema, captured: Captured) -> Result<DumpManifest> {
    let partial = sibling(dir, "partial");
    if partial.exists() {
        warn!(dir = %partial.display(), "removing stale partial dump");
        fs::remove_dir_all(&partial)?;
    }
    fs::create_dir_all(&partial)?;

    let mut checksums = BTreeMap::new();
    write_file(&partial, SCHEMA_FILE, &vdoc_codec::encode(schema.table())?, &mut checksums)?;

    let doc_num = captured.docs.len() as u64;
    let set = DocSet {
        next_docid: captured.next_docid,
        docs: captured.docs.iter().map(|(id, d)| (*id, d.as_ref().clone())).collect(),
    };
    write_file(&partial, DOCS_FILE, &vdoc_codec::encode(&set)?, &mut checksums)?;
    drop(set);

    let mut indexes = BTreeMap::new();
    for (name, index) in &captured.snapshot.fields {
        let rel = index_file_name(name);
        write_file(&partial, &rel, &index.serialize()?, &mut checksums)?;
        indexes.insert(name.clone(), rel);
    }

    let manifest = DumpManifest {
        format_version: DUMP_FORMAT_VERSION,
        table: schema.name().to_string(),
        doc_num,
        next_docid: captured.next_docid,
        index_generation: captured.snapshot.generation,
        dirty: captured.dirty.into_iter().collect(),
        created_at: Utc::now(),
        checksums,
        indexes,
    };
    let json = serde_json::to_vec_pretty(&manifest).map_err(|e| Error::Store(format!("manifest: {}", e)))?;
    fs::write(partial.join(MANIFEST), json)?;

    let retired = sibling(dir, "old");
    if dir.exists() {
        if retired.exists() {
            fs::remove_dir_all(&retired)?;
        }
        fs::rename(dir, &retired)?;
    }
    fs::rename(&partial, dir)?;
    if retired.exists() {
        if let Err(e) = fs::remove_dir_all(&retired) {
            warn!(dir = %retired.display(), error = %e, "could not remove previous dump");
        }
    }
    Ok(manifest)
}

/// `dump` unless a swap stopped between its two renames, leaving only the
/// retired copy.
fn locate_dump(dir: PathBuf) -> PathBuf {
    let retired = sibling(&dir, "old");
    if !dir.join(MANIFEST).exists() && retired.join(MANIFEST).exists() {
        warn!(dir = %retired.display(), "no current dump, loading the previous one");
        return retired;
    }
    dir
}

fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "dump".into());
    name.push(".");
    name.push(suffix);
    dir.with_file_name(name)
}
