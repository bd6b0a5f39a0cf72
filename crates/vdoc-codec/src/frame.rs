//! Frame header that wraps every encoded entity.
//!
//! Layout (14 bytes, little-endian):
//! - magic: 4 bytes, `b"VDOC"`
//! - version: 1 byte
//! - kind: 1 byte, see [`Kind`]
//! - payload_length: 4 bytes
//! - checksum: 4 bytes, CRC32 of the payload

use bytes::{Buf, BufMut};
use vdoc_core::{Error, Result};

pub const MAGIC: &[u8; 4] = b"VDOC";
pub const VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Table = 1,
    Doc = 2,
    Docs = 3,
    Request = 4,
    Response = 5,
    BatchResult = 6,
    EngineStatus = 7,
    MemoryInfo = 8,
    Config = 9,
    DocSet = 10,
}

impl Kind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => Kind::Table,
            2 => Kind::Doc,
            3 => Kind::Docs,
            4 => Kind::Request,
            5 => Kind::Response,
            6 => Kind::BatchResult,
            7 => Kind::EngineStatus,
            8 => Kind::MemoryInfo,
            9 => Kind::Config,
            10 => Kind::DocSet,
            other => return Err(Error::malformed(format!("unknown entity kind {}", other))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub kind: Kind,
    pub payload_length: u32,
    pub checksum: u32,
}

impl FrameHeader {
    pub const SIZE: usize = 14;

    pub fn for_payload(kind: Kind, payload: &[u8]) -> Result<Self> {
        let payload_length = u32::try_from(payload.len())
            .map_err(|_| Error::malformed(format!("payload of {} bytes exceeds u32", payload.len())))?;
        Ok(Self {
            version: VERSION,
            kind,
            payload_length,
            checksum: crc32fast::hash(payload),
        })
    }

    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_slice(MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.kind.as_u8());
        buf.put_u32_le(self.payload_length);
        buf.put_u32_le(self.checksum);
    }

    pub fn deserialize(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(Error::malformed(format!(
                "Not enough bytes for frame header: {} < {}",
                buf.remaining(),
                Self::SIZE
            )));
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(Error::malformed("bad magic"));
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(Error::malformed(format!("unsupported format version {}", version)));
        }
        let kind = Kind::from_u8(buf.get_u8())?;
        let payload_length = buf.get_u32_le();
        let checksum = buf.get_u32_le();
        Ok(Self { version, kind, payload_length, checksum })
    }

    pub fn verify(&self, payload: &[u8]) -> Result<()> {
        if payload.len() != self.payload_length as usize {
            return Err(Error::malformed(format!(
                "payload length {} does not match header {}",
                payload.len(),
                self.payload_length
            )));
        }
        if crc32fast::hash(payload) != self.checksum {
            return Err(Error::malformed("payload checksum mismatch"));
        }
        Ok(())
    }
}

/// Wraps `payload` in a header.
pub fn seal(kind: Kind, payload: &[u8]) -> Result<Vec<u8>> {
    let header = FrameHeader::for_payload(kind, payload)?;
    let mut out = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    header.serialize(&mut out);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Checks the header of `bytes` against `expected` and returns the payload.
pub fn open(expected: Kind, bytes: &[u8]) -> Result<&[u8]> {
    let mut cursor = bytes;
    let header = FrameHeader::deserialize(&mut cursor)?;
    if header.kind != expected {
        return Err(Error::malformed(format!(
            "expected {:?} frame, found {:?}",
            expected, header.kind
        )));
    }
    header.verify(cursor)?;
    Ok(cursor)
}
