//! Search requests, responses and batch write results.

use std::fmt;

use crate::doc::Field;
use crate::types::{DataType, DocId, FieldValue};

#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub name: String,
    /// Packed little-endian `f32`, `dimension * req_num` values.
    pub value: Vec<u8>,
    pub min_score: f64,
    pub max_score: f64,
    pub boost: f64,
    pub has_boost: bool,
}

impl VectorQuery {
    pub fn new(name: impl Into<String>, vectors: &[f32]) -> Self {
        Self {
            name: name.into(),
            value: crate::types::floats_to_bytes(vectors),
            min_score: f64::NEG_INFINITY,
            max_score: f64::INFINITY,
            boost: 1.0,
            has_boost: false,
        }
    }

    pub fn score_range(mut self, min: f64, max: f64) -> Self {
        self.min_score = min;
        self.max_score = max;
        self
    }

    pub fn boost(mut self, boost: f64) -> Self {
        self.boost = boost;
        self.has_boost = true;
        self
    }

    /// Weight used in fusion; `1.0` unless a boost was supplied.
    pub fn weight(&self) -> f64 {
        if self.has_boost {
            self.boost
        } else {
            1.0
        }
    }
}

/// Numeric or string range constraint on an indexed scalar field. Bounds are
/// raw bytes in the field's own encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    pub field: String,
    pub lower: Vec<u8>,
    pub upper: Vec<u8>,
    pub include_lower: bool,
    pub include_upper: bool,
}

impl RangeFilter {
    pub fn new(field: impl Into<String>, lower: &FieldValue, upper: &FieldValue) -> Self {
        Self {
            field: field.into(),
            lower: lower.to_bytes(),
            upper: upper.to_bytes(),
            include_lower: true,
            include_upper: true,
        }
    }
}

/// Match on string values. `is_union` selects any-of; otherwise all-of,
/// which only differs from any-of for MULTI_STRING fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TermFilter {
    pub field: String,
    pub terms: Vec<String>,
    pub is_union: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub top_n: u32,
    pub req_num: u32,
    pub vec_fields: Vec<VectorQuery>,
    /// Output fields; empty means every scalar field.
    pub fields: Vec<String>,
    pub range_filters: Vec<RangeFilter>,
    pub term_filters: Vec<TermFilter>,
    pub retrieval_params: String,
    pub brute_force_search: bool,
    pub has_rank: bool,
    pub multi_vector_rank: bool,
    pub l2_sqrt: bool,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            top_n: 10,
            req_num: 1,
            vec_fields: Vec::new(),
            fields: Vec::new(),
            range_filters: Vec::new(),
            term_filters: Vec::new(),
            retrieval_params: String::new(),
            brute_force_search: false,
            has_rank: true,
            multi_vector_rank: false,
            l2_sqrt: false,
        }
    }
}

impl Request {
    pub fn new(top_n: u32) -> Self {
        Self { top_n, ..Self::default() }
    }

    pub fn query(mut self, q: VectorQuery) -> Self {
        self.vec_fields.push(q);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResultCode {
    Success,
    IndexNotTrained,
    SearchError,
}

impl SearchResultCode {
    pub fn as_u8(self) -> u8 {
        match self {
            SearchResultCode::Success => 0,
            SearchResultCode::IndexNotTrained => 1,
            SearchResultCode::SearchError => 2,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SearchResultCode::Success),
            1 => Some(SearchResultCode::IndexNotTrained),
            2 => Some(SearchResultCode::SearchError),
            _ => None,
        }
    }
}

impl fmt::Display for SearchResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchResultCode::Success => "success",
            SearchResultCode::IndexNotTrained => "index not trained",
            SearchResultCode::SearchError => "search error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultItem {
    pub docid: DocId,
    pub key: String,
    pub score: f64,
    pub fields: Vec<Field>,
    /// Vector field the hit came from when results are not fused.
    pub source: Option<String>,
}

impl ResultItem {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Candidates that passed filters, before score range and truncation.
    pub total: u64,
    pub code: SearchResultCode,
    pub msg: String,
    pub items: Vec<ResultItem>,
}

impl SearchResult {
    pub fn empty(code: SearchResultCode, msg: impl Into<String>) -> Self {
        Self { total: 0, code, msg: msg.into(), items: Vec::new() }
    }

    pub fn is_success(&self) -> bool {
        self.code == SearchResultCode::Success
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub results: Vec<SearchResult>,
}

/// Outcome of one slot of a batch write. `code` follows `Error::code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub code: i32,
    pub msg: String,
}

impl BatchItem {
    pub fn ok() -> Self {
        Self { code: crate::Error::SUCCESS, msg: String::new() }
    }

    pub fn failed(err: &crate::Error) -> Self {
        Self { code: err.code(), msg: err.to_string() }
    }

    pub fn is_ok(&self) -> bool {
        self.code == crate::Error::SUCCESS
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub items: Vec<BatchItem>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &BatchItem)> {
        self.items.iter().enumerate().filter(|(_, i)| !i.is_ok())
    }
}

/// Decodes one range bound against the schema type. An empty bound is open.
pub fn decode_bound(datatype: DataType, raw: &[u8]) -> crate::Result<Option<FieldValue>> {
    if raw.is_empty() {
        return Ok(None);
    }
    FieldValue::from_bytes(datatype, raw).map(Some)
}
