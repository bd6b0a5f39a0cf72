//! Value-level types shared by the codec, store, index and engine crates.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Dense internal document number assigned by the store on insert.
pub type DocId = u32;

/// Wire type tag of a field. The discriminants are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    Int = 0,
    Long = 1,
    Float = 2,
    Double = 3,
    String = 4,
    Vector = 5,
    MultiString = 6,
}

impl DataType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => DataType::Int,
            1 => DataType::Long,
            2 => DataType::Float,
            3 => DataType::Double,
            4 => DataType::String,
            5 => DataType::Vector,
            6 => DataType::MultiString,
            _ => return None,
        })
    }

    pub fn is_vector(self) -> bool {
        matches!(self, DataType::Vector)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int | DataType::Long | DataType::Float | DataType::Double)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Int => "INT",
            DataType::Long => "LONG",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::String => "STRING",
            DataType::Vector => "VECTOR",
            DataType::MultiString => "MULTI_STRING",
        };
        f.write_str(s)
    }
}

/// A decoded field value. The variant is the type tag, so a document never
/// needs a second container to know which of its fields are vectors.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Vec<u8>),
    Vector(Vec<f32>),
    MultiStr(Vec<Vec<u8>>),
}

impl FieldValue {
    pub fn str(s: impl AsRef<str>) -> Self {
        FieldValue::Str(s.as_ref().as_bytes().to_vec())
    }

    pub fn data_type(&self) -> DataType {
        match self {
            FieldValue::Int(_) => DataType::Int,
            FieldValue::Long(_) => DataType::Long,
            FieldValue::Float(_) => DataType::Float,
            FieldValue::Double(_) => DataType::Double,
            FieldValue::Str(_) => DataType::String,
            FieldValue::Vector(_) => DataType::Vector,
            FieldValue::MultiStr(_) => DataType::MultiString,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            FieldValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Str(b) => Some(b),
            _ => None,
        }
    }

    /// Raw little-endian encoding used inside a wire `Field`.
    ///
    /// MULTI_STRING is a `u32` count followed by `u32`-length-prefixed items.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            FieldValue::Int(v) => v.to_le_bytes().to_vec(),
            FieldValue::Long(v) => v.to_le_bytes().to_vec(),
            FieldValue::Float(v) => v.to_le_bytes().to_vec(),
            FieldValue::Double(v) => v.to_le_bytes().to_vec(),
            FieldValue::Str(b) => b.clone(),
            FieldValue::Vector(v) => floats_to_bytes(v),
            FieldValue::MultiStr(items) => {
                let mut out = Vec::with_capacity(4 + items.iter().map(|i| 4 + i.len()).sum::<usize>());
                out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    out.extend_from_slice(&(item.len() as u32).to_le_bytes());
                    out.extend_from_slice(item);
                }
                out
            }
        }
    }

    /// Interpret raw field bytes according to `datatype`.
    pub fn from_bytes(datatype: DataType, bytes: &[u8]) -> Result<Self> {
        fn fixed<const N: usize>(datatype: DataType, bytes: &[u8]) -> Result<[u8; N]> {
            bytes.try_into().map_err(|_| {
                Error::malformed(format!("{} value must be {} bytes, got {}", datatype, N, bytes.len()))
            })
        }
        Ok(match datatype {
            DataType::Int => FieldValue::Int(i32::from_le_bytes(fixed(datatype, bytes)?)),
            DataType::Long => FieldValue::Long(i64::from_le_bytes(fixed(datatype, bytes)?)),
            DataType::Float => FieldValue::Float(f32::from_le_bytes(fixed(datatype, bytes)?)),
            DataType::Double => FieldValue::Double(f64::from_le_bytes(fixed(datatype, bytes)?)),
            DataType::String => FieldValue::Str(bytes.to_vec()),
            DataType::Vector => FieldValue::Vector(bytes_to_floats(bytes)?),
            DataType::MultiString => FieldValue::MultiStr(split_multi_string(bytes)?),
        })
    }

    /// Ordering between two values of the same type; `None` across types or
    /// for vectors and multi-strings.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(b)),
            (FieldValue::Long(a), FieldValue::Long(b)) => Some(a.cmp(b)),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.partial_cmp(b),
            (FieldValue::Double(a), FieldValue::Double(b)) => a.partial_cmp(b),
            (FieldValue::Str(a), FieldValue::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Approximate heap + inline footprint, used for memory reporting.
    pub fn memory_bytes(&self) -> usize {
        let heap = match self {
            FieldValue::Str(b) => b.len(),
            FieldValue::Vector(v) => v.len() * std::mem::size_of::<f32>(),
            FieldValue::MultiStr(items) => items.iter().map(|i| i.len() + std::mem::size_of::<Vec<u8>>()).sum(),
            _ => 0,
        };
        std::mem::size_of::<FieldValue>() + heap
    }
}

pub fn floats_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

pub fn bytes_to_floats(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::malformed(format!("vector byte length {} is not a multiple of 4", bytes.len())));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn split_multi_string(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut rest = bytes;
    let mut take = |n: usize| -> Result<&[u8]> {
        if rest.len() < n {
            return Err(Error::malformed("MULTI_STRING value truncated"));
        }
        let (head, tail) = rest.split_at(n);
        rest = tail;
        Ok(head)
    };
    let count = u32::from_le_bytes(take(4)?.try_into().map_err(|_| Error::malformed("MULTI_STRING count"))?) as usize;
    let mut items = Vec::with_capacity(count.min(bytes.len() / 4));
    for _ in 0..count {
        let len = u32::from_le_bytes(take(4)?.try_into().map_err(|_| Error::malformed("MULTI_STRING length"))?) as usize;
        items.push(take(len)?.to_vec());
    }
    if !rest.is_empty() {
        return Err(Error::malformed(format!("MULTI_STRING has {} trailing bytes", rest.len())));
    }
    Ok(items)
}

/// Distance function used by a vector field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    /// Squared euclidean distance; smaller is more relevant.
    L2,
    /// Dot product; larger is more relevant.
    InnerProduct,
}

impl MetricType {
    pub fn as_u8(self) -> u8 {
        match self {
            MetricType::L2 => 0,
            MetricType::InnerProduct => 1,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MetricType::L2),
            1 => Some(MetricType::InnerProduct),
            _ => None,
        }
    }

    /// Reads `metric_type` out of a JSON retrieval parameter blob. Missing or
    /// empty blobs default to L2.
    pub fn from_retrieval_param(param: &str) -> Result<Self> {
        if param.trim().is_empty() {
            return Ok(MetricType::L2);
        }
        let value: serde_json::Value = serde_json::from_str(param)
            .map_err(|e| Error::InvalidSchema(format!("retrieval_param is not valid JSON: {}", e)))?;
        match value.get("metric_type").and_then(|m| m.as_str()) {
            None => Ok(MetricType::L2),
            Some(m) => m.parse(),
        }
    }

    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            MetricType::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            MetricType::InnerProduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        }
    }

    /// Score exposed to callers. L2 stays squared unless `l2_sqrt` is set.
    pub fn to_score(self, distance: f32, l2_sqrt: bool) -> f64 {
        match self {
            MetricType::L2 if l2_sqrt => f64::from(distance).sqrt(),
            _ => f64::from(distance),
        }
    }

    /// Relevance order: `Less` means `a` ranks before `b`.
    pub fn rank(self, a: f64, b: f64) -> Ordering {
        match self {
            MetricType::L2 => a.total_cmp(&b),
            MetricType::InnerProduct => b.total_cmp(&a),
        }
    }
}

impl FromStr for MetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "L2" => Ok(MetricType::L2),
            "INNERPRODUCT" | "INNER_PRODUCT" | "IP" => Ok(MetricType::InnerProduct),
            other => Err(Error::InvalidSchema(format!("unknown metric_type '{}'", other))),
        }
    }
}

/// Recognized index backends selected by a vector field's `retrieval_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetrievalType {
    IvfPq,
    IvfFlat,
    Flat,
    Hnsw,
}

impl RetrievalType {
    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalType::IvfPq => "IVFPQ",
            RetrievalType::IvfFlat => "IVFFLAT",
            RetrievalType::Flat => "FLAT",
            RetrievalType::Hnsw => "HNSW",
        }
    }
}

impl fmt::Display for RetrievalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IVFPQ" => Ok(RetrievalType::IvfPq),
            "IVFFLAT" => Ok(RetrievalType::IvfFlat),
            "FLAT" => Ok(RetrievalType::Flat),
            "HNSW" => Ok(RetrievalType::Hnsw),
            other => Err(Error::InvalidSchema(format!("unknown retrieval_type '{}'", other))),
        }
    }
}
