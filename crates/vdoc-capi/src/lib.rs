//! C boundary for the vdoc engine.
//!
//! Every call returns an `i32` status: `0` on success, the engine error code
//! (see `vdoc_core::error`) on failure, [`VDOC_INVALID_ARGUMENT`] for null or
//! out-of-range arguments, and [`VDOC_PANIC`] if the call panicked.
//!
//! Inputs are `(pointer, length)` pairs that the engine only reads for the
//! duration of the call. Outputs are written to a caller-provided
//! [`VdocBuffer`]; the caller owns it from then on and must hand it back
//! through [`vdoc_buffer_release`] exactly once.
//!
//! ```c
//! VdocEngine *engine = NULL;
//! vdoc_init(NULL, 0, &engine);
//! vdoc_create_table(engine, table, table_len);
//! VdocBuffer out;
//! if (vdoc_search(engine, req, req_len, &out) == 0) {
//!     /* decode out.data[0..out.len] */
//!     vdoc_buffer_release(out);
//! }
//! vdoc_close(engine);
//! vdoc_destroy(engine);
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;

use parking_lot::Mutex;
use tracing::{debug, error};
use vdoc_codec::WireEntity;
use vdoc_core::config::EngineConfig;
use vdoc_core::request::Request;
use vdoc_core::{Doc, DocId, Error, Table};
use vdoc_engine::{Engine, RebuildOptions, StagedBatch};

pub const VDOC_OK: i32 = Error::SUCCESS;
pub const VDOC_INVALID_ARGUMENT: i32 = -100;
pub const VDOC_PANIC: i32 = -101;

/// Opaque engine handle.
pub struct VdocEngine {
    engine: Engine,
    staged: Mutex<Option<StagedBatch>>,
}

/// Engine-allocated bytes handed to the caller.
#[repr(C)]
#[derive(Debug)]
pub struct VdocBuffer {
    pub data: *mut u8,
    pub len: usize,
}

impl VdocBuffer {
    fn from_vec(bytes: Vec<u8>) -> Self {
        let boxed = bytes.into_boxed_slice();
        let len = boxed.len();
        let data = Box::into_raw(boxed).cast::<u8>();
        Self { data, len }
    }

    pub const fn empty() -> Self {
        Self { data: ptr::null_mut(), len: 0 }
    }
}

#[derive(Debug, thiserror::Error)]
enum CallError {
    #[error(transparent)]
    Engine(#[from] Error),
    #[error("invalid argument: {0}")]
    Argument(&'static str),
}

impl CallError {
    fn code(&self) -> i32 {
        match self {
            CallError::Engine(e) => e.code(),
            CallError::Argument(_) => VDOC_INVALID_ARGUMENT,
        }
    }
}

type CallResult = std::result::Result<(), CallError>;

fn call(name: &'static str, f: impl FnOnce() -> CallResult) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => VDOC_OK,
        Ok(Err(e)) => {
            debug!(call = name, code = e.code(), error = %e, "call failed");
            e.code()
        }
        Err(_) => {
            error!(call = name, "panic caught at C boundary");
            VDOC_PANIC
        }
    }
}

unsafe fn handle<'a>(engine: *const VdocEngine) -> Result<&'a VdocEngine, CallError> {
    engine.as_ref().ok_or(CallError::Argument("engine handle is null"))
}

unsafe fn input<'a>(data: *const u8, len: usize) -> Result<&'a [u8], CallError> {
    if len == 0 {
        return Ok(&[]);
    }
    if data.is_null() {
        return Err(CallError::Argument("input buffer is null"));
    }
    Ok(slice::from_raw_parts(data, len))
}

unsafe fn output<'a>(out: *mut VdocBuffer) -> Result<&'a mut VdocBuffer, CallError> {
    out.as_mut().ok_or(CallError::Argument("output buffer is null"))
}

unsafe fn key<'a>(data: *const u8, len: usize) -> Result<&'a str, CallError> {
    std::str::from_utf8(input(data, len)?).map_err(|_| CallError::Argument("key is not UTF-8"))
}

fn encode_into<T: WireEntity>(out: &mut VdocBuffer, value: &T) -> CallResult {
    *out = VdocBuffer::from_vec(vdoc_codec::encode(value)?);
    Ok(())
}

/// Creates an engine. An empty `config` loads the layered configuration
/// (`vdoc.toml`, `vdoc.<env>.toml`, `VDOC_*`); otherwise it is an encoded
/// `Config`.
///
/// # Safety
/// `config` must point to `len` readable bytes (or be null with `len == 0`);
/// `out` must be a valid pointer to write the handle to.
#[no_mangle]
pub unsafe extern "C" fn vdoc_init(config: *const u8, len: usize, out: *mut *mut VdocEngine) -> i32 {
    call("init", || {
        let out = out.as_mut().ok_or(CallError::Argument("output handle is null"))?;
        let bytes = input(config, len)?;
        let config = if bytes.is_empty() {
            EngineConfig::load().map_err(|e| Error::InvalidConfig(e.to_string()))?
        } else {
            vdoc_codec::decode::<EngineConfig>(bytes)?
        };
        let engine = Engine::open(config).map_err(|e: anyhow::Error| match e.downcast::<Error>() {
            Ok(err) => err,
            Err(other) => Error::InvalidConfig(other.to_string()),
        })?;
        *out = Box::into_raw(Box::new(VdocEngine { engine, staged: Mutex::new(None) }));
        Ok(())
    })
}

/// Stops admission, waits for in-flight calls and drops all data. The handle
/// stays valid until [`vdoc_destroy`].
///
/// # Safety
/// `engine` must come from [`vdoc_init`] and not yet be destroyed.
#[no_mangle]
pub unsafe extern "C" fn vdoc_close(engine: *mut VdocEngine) -> i32 {
    call("close", || {
        let h = handle(engine)?;
        h.staged.lock().take();
        Ok(h.engine.close()?)
    })
}

/// Frees the handle, closing the engine first if needed.
///
/// # Safety
/// `engine` must come from [`vdoc_init`] and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn vdoc_destroy(engine: *mut VdocEngine) -> i32 {
    call("destroy", || {
        if engine.is_null() {
            return Err(CallError::Argument("engine handle is null"));
        }
        let h = Box::from_raw(engine);
        match h.engine.close() {
            Ok(()) | Err(Error::EngineClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    })
}

/// # Safety
/// `engine` must be a live handle; `table` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_create_table(engine: *mut VdocEngine, table: *const u8, len: usize) -> i32 {
    call("create_table", || {
        let h = handle(engine)?;
        let table = vdoc_codec::decode::<Table>(input(table, len)?)?;
        Ok(h.engine.create_table(table)?)
    })
}

/// # Safety
/// `engine` must be a live handle; `doc` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_add_or_update_doc(engine: *mut VdocEngine, doc: *const u8, len: usize) -> i32 {
    call("add_or_update_doc", || {
        let h = handle(engine)?;
        h.engine.add_or_update(input(doc, len)?)?;
        Ok(())
    })
}

/// Writes `n` encoded docs; `out` receives an encoded `BatchResult` with one
/// entry per doc.
///
/// # Safety
/// `docs` and `lens` must each point to `n` elements, and every `docs[i]` to
/// `lens[i]` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_add_or_update_docs(
    engine: *mut VdocEngine,
    docs: *const *const u8,
    lens: *const usize,
    n: usize,
    out: *mut VdocBuffer,
) -> i32 {
    call("add_or_update_docs", || {
        let h = handle(engine)?;
        let out = output(out)?;
        if n > 0 && (docs.is_null() || lens.is_null()) {
            return Err(CallError::Argument("doc array is null"));
        }
        let mut buffers = Vec::with_capacity(n);
        for i in 0..n {
            buffers.push(input(*docs.add(i), *lens.add(i))?);
        }
        let result = h.engine.add_or_update_docs(&buffers)?;
        encode_into(out, &result)
    })
}

/// Starts a staged batch of `n` slots, discarding any unfinished one.
///
/// # Safety
/// `engine` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn vdoc_set_batch_count(engine: *mut VdocEngine, n: usize) -> i32 {
    call("set_batch_count", || {
        let h = handle(engine)?;
        if let Some(old) = h.staged.lock().replace(StagedBatch::new(n)) {
            debug!(slots = old.len(), missing = old.missing().len(), "discarding unfinished staged batch");
        }
        Ok(())
    })
}

/// Copies one encoded doc into `slot` of the staged batch.
///
/// # Safety
/// `engine` must be a live handle; `doc` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_prepare_doc(engine: *mut VdocEngine, doc: *const u8, len: usize, slot: usize) -> i32 {
    call("prepare_doc", || {
        let h = handle(engine)?;
        let bytes = input(doc, len)?.to_vec();
        let mut staged = h.staged.lock();
        let batch = staged
            .as_mut()
            .ok_or_else(|| Error::InvalidRequest("no staged batch; call vdoc_set_batch_count first".into()))?;
        Ok(batch.stage(slot, bytes)?)
    })
}

/// Commits the staged batch. When a slot is still empty nothing is written,
/// the call fails with the incomplete-batch code and the staged slots are
/// kept for another attempt.
///
/// # Safety
/// `engine` must be a live handle; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_finish_batch(engine: *mut VdocEngine, n: usize, out: *mut VdocBuffer) -> i32 {
    call("finish_batch", || {
        let h = handle(engine)?;
        let out = output(out)?;
        let mut staged = h.staged.lock();
        let batch = staged
            .as_mut()
            .ok_or_else(|| Error::InvalidRequest("no staged batch; call vdoc_set_batch_count first".into()))?;
        let result = h.engine.finish_batch(batch, n);
        if batch.is_empty() {
            *staged = None;
        }
        encode_into(out, &result?)
    })
}

/// # Safety
/// `engine` must be a live handle; `key` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_delete_doc(engine: *mut VdocEngine, key_data: *const u8, len: usize) -> i32 {
    call("delete_doc", || {
        let h = handle(engine)?;
        Ok(h.engine.delete(key(key_data, len)?)?)
    })
}

/// Looks up a doc by `_id`; `out` receives an encoded `Doc`.
///
/// # Safety
/// `engine` must be a live handle; `key` must point to `len` readable bytes;
/// `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_get_doc_by_id(
    engine: *mut VdocEngine,
    key_data: *const u8,
    len: usize,
    out: *mut VdocBuffer,
) -> i32 {
    call("get_doc_by_id", || {
        let h = handle(engine)?;
        let out = output(out)?;
        let doc: Doc = h.engine.get_doc(key(key_data, len)?)?;
        encode_into(out, &doc)
    })
}

/// Looks up a doc by internal doc number; `out` receives an encoded `Doc`.
///
/// # Safety
/// `engine` must be a live handle; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_get_doc_by_docid(engine: *mut VdocEngine, docid: DocId, out: *mut VdocBuffer) -> i32 {
    call("get_doc_by_docid", || {
        let h = handle(engine)?;
        let out = output(out)?;
        encode_into(out, &h.engine.get_doc_by_docid(docid)?)
    })
}

/// # Safety
/// `engine` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn vdoc_build_index(engine: *mut VdocEngine) -> i32 {
    call("build_index", || {
        handle(engine)?.engine.build_index()?;
        Ok(())
    })
}

/// `drop_before_rebuild` and `describe` are booleans (non-zero is true);
/// `limit_cpu == 0` uses the configured build threads. When `out` is not null
/// it receives the rebuild report as JSON.
///
/// # Safety
/// `engine` must be a live handle; `out` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_rebuild_index(
    engine: *mut VdocEngine,
    drop_before_rebuild: i32,
    limit_cpu: i32,
    describe: i32,
    out: *mut VdocBuffer,
) -> i32 {
    call("rebuild_index", || {
        let h = handle(engine)?;
        let limit_cpu = usize::try_from(limit_cpu).map_err(|_| CallError::Argument("limit_cpu is negative"))?;
        let report = h.engine.rebuild_index(RebuildOptions {
            drop_before_rebuild: drop_before_rebuild != 0,
            limit_cpu,
            describe: describe != 0,
        })?;
        if let Some(out) = out.as_mut() {
            let json = serde_json::to_vec(&report).map_err(|e| Error::Store(format!("rebuild report: {}", e)))?;
            *out = VdocBuffer::from_vec(json);
        }
        Ok(())
    })
}

/// # Safety
/// `engine` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn vdoc_dump(engine: *mut VdocEngine) -> i32 {
    call("dump", || {
        handle(engine)?.engine.dump()?;
        Ok(())
    })
}

/// # Safety
/// `engine` must be a live handle.
#[no_mangle]
pub unsafe extern "C" fn vdoc_load(engine: *mut VdocEngine) -> i32 {
    call("load", || {
        handle(engine)?.engine.load()?;
        Ok(())
    })
}

/// Runs an encoded `Request`; `out` receives an encoded `Response`.
///
/// # Safety
/// `engine` must be a live handle; `request` must point to `len` readable
/// bytes; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_search(
    engine: *mut VdocEngine,
    request: *const u8,
    len: usize,
    out: *mut VdocBuffer,
) -> i32 {
    call("search", || {
        let h = handle(engine)?;
        let out = output(out)?;
        let request = vdoc_codec::decode::<Request>(input(request, len)?)?;
        encode_into(out, &h.engine.search(&request)?)
    })
}

/// # Safety
/// `engine` must be a live handle; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_get_engine_status(engine: *mut VdocEngine, out: *mut VdocBuffer) -> i32 {
    call("get_engine_status", || {
        let h = handle(engine)?;
        let out = output(out)?;
        encode_into(out, &h.engine.status()?)
    })
}

/// # Safety
/// `engine` must be a live handle; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_get_memory_info(engine: *mut VdocEngine, out: *mut VdocBuffer) -> i32 {
    call("get_memory_info", || {
        let h = handle(engine)?;
        let out = output(out)?;
        encode_into(out, &h.engine.memory_info()?)
    })
}

/// # Safety
/// `engine` must be a live handle; `config` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_set_config(engine: *mut VdocEngine, config: *const u8, len: usize) -> i32 {
    call("set_config", || {
        let h = handle(engine)?;
        let config = vdoc_codec::decode::<EngineConfig>(input(config, len)?)?;
        Ok(h.engine.set_config(config)?)
    })
}

/// # Safety
/// `engine` must be a live handle; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn vdoc_get_config(engine: *mut VdocEngine, out: *mut VdocBuffer) -> i32 {
    call("get_config", || {
        let h = handle(engine)?;
        let out = output(out)?;
        encode_into(out, &h.engine.get_config()?)
    })
}

/// Returns a buffer produced by any `vdoc_*` call. Releasing an empty
/// buffer is a no-op.
///
/// # Safety
/// `buffer` must have been written by this library and not released before.
#[no_mangle]
pub unsafe extern "C" fn vdoc_buffer_release(buffer: VdocBuffer) {
    if !buffer.data.is_null() {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(buffer.data, buffer.len)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panics_become_a_status() {
        assert_eq!(call("boom", || panic!("boom")), VDOC_PANIC);
        assert_eq!(call("ok", || Ok(())), VDOC_OK);
        assert_eq!(call("bad", || Err(Error::NoTable.into())), -3);
    }

    #[test]
    fn buffers_round_trip_through_release() {
        let buf = VdocBuffer::from_vec(vec![1, 2, 3]);
        assert_eq!(buf.len, 3);
        assert_eq!(unsafe { slice::from_raw_parts(buf.data, buf.len) }, &[1, 2, 3]);
        unsafe { vdoc_buffer_release(buf) };
        unsafe { vdoc_buffer_release(VdocBuffer::from_vec(Vec::new())) };
        unsafe { vdoc_buffer_release(VdocBuffer::empty()) };
    }
}
