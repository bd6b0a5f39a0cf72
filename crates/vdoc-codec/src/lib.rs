//! Framed, self-describing binary codec for every entity that crosses the
//! engine boundary or is persisted by dump.
//!
//! `encode` allocates and returns an owned `Vec<u8>`; the caller owns it from
//! then on. Across the C boundary that buffer is handed out and must come back
//! through the matching release call.

pub mod buf;
pub mod entity;
pub mod frame;

pub use entity::{DocSet, WireEntity};
pub use frame::{FrameHeader, Kind, MAGIC, VERSION};

use vdoc_core::{Doc, Result};

use buf::{Reader, Writer};

pub fn encode<T: WireEntity>(entity: &T) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    entity.write(&mut w)?;
    frame::seal(T::KIND, &w.into_vec())
}

pub fn decode<T: WireEntity>(bytes: &[u8]) -> Result<T> {
    let payload = frame::open(T::KIND, bytes)?;
    let mut r = Reader::new(payload);
    let value = T::read(&mut r)?;
    r.finish()?;
    Ok(value)
}

/// Decodes N independent doc buffers. Each slot fails on its own.
pub fn decode_docs(buffers: &[&[u8]]) -> Vec<Result<Doc>> {
    buffers.iter().map(|b| decode::<Doc>(b)).collect()
}
