//! Bounds-checked primitive reader and the matching writer.

use bytes::{Buf, BufMut, BytesMut};
use vdoc_core::{Error, Result, MAX_FIELDS};

pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::malformed(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::malformed(format!("invalid bool byte {}", other))),
        }
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64_le())
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.need(8, "f64")?;
        Ok(self.buf.get_f64_le())
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.need(len, "byte string")?;
        let buf = self.buf;
        let (head, tail) = buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn string(&mut self) -> Result<String> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|_| Error::malformed("string is not valid UTF-8"))
    }

    pub fn opt_string(&mut self) -> Result<Option<String>> {
        if self.bool()? {
            self.string().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Reads an element count. Each element takes at least `min_size` bytes,
    /// so a count that cannot fit in the remaining input is rejected before
    /// anything is allocated.
    pub fn count(&mut self, min_size: usize, what: &str) -> Result<usize> {
        let n = self.u32()? as usize;
        if n.saturating_mul(min_size.max(1)) > self.remaining() {
            return Err(Error::malformed(format!(
                "{} count {} exceeds remaining {} bytes",
                what,
                n,
                self.remaining()
            )));
        }
        Ok(n)
    }

    /// Like [`Reader::count`], additionally capped at `MAX_FIELDS`.
    pub fn field_count(&mut self, min_size: usize, what: &str) -> Result<usize> {
        let n = self.count(min_size, what)?;
        if n > MAX_FIELDS {
            return Err(Error::malformed(format!("{} count {} exceeds {}", what, n, MAX_FIELDS)));
        }
        Ok(n)
    }

    pub fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(Error::malformed(format!("{} trailing bytes", self.buf.remaining())));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn f64(&mut self, v: f64) {
        self.buf.put_f64_le(v);
    }

    pub fn length(&mut self, n: usize) -> Result<()> {
        let n = u32::try_from(n).map_err(|_| Error::malformed(format!("length {} exceeds u32", n)))?;
        self.u32(n);
        Ok(())
    }

    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.length(v.len())?;
        self.buf.put_slice(v);
        Ok(())
    }

    pub fn string(&mut self, v: &str) -> Result<()> {
        self.bytes(v.as_bytes())
    }

    pub fn opt_string(&mut self, v: Option<&str>) -> Result<()> {
        self.bool(v.is_some());
        match v {
            Some(s) => self.string(s),
            None => Ok(()),
        }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_never_reads_past_end() {
        let mut w = Writer::new();
        w.bytes(b"hello").unwrap();
        let bytes = w.into_vec();
        for cut in 0..bytes.len() {
            let mut r = Reader::new(&bytes[..cut]);
            assert!(matches!(r.bytes(), Err(Error::MalformedBuffer(_))), "cut at {}", cut);
        }
        let mut r = Reader::new(&bytes);
        assert_eq!(r.bytes().unwrap(), b"hello");
        r.finish().unwrap();
    }

    #[test]
    fn oversized_count_rejected() {
        let mut w = Writer::new();
        w.u32(1_000_000);
        w.u32(0);
        let bytes = w.into_vec();
        assert!(Reader::new(&bytes).count(4, "items").is_err());

        let mut w = Writer::new();
        w.u32((MAX_FIELDS + 1) as u32);
        w.bytes(&vec![0; MAX_FIELDS + 1]).unwrap();
        let bytes = w.into_vec();
        assert!(Reader::new(&bytes).field_count(0, "fields").is_err());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let r = Reader::new(&[0u8]);
        assert!(r.finish().is_err());
    }
}
