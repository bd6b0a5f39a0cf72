//! Table definitions and the validated, immutable schema derived from them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::doc::ID_FIELD;
use crate::error::{Error, Result};
use crate::types::{DataType, MetricType, RetrievalType};

/// Upper bound on fields per table and per document.
pub const MAX_FIELDS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub data_type: DataType,
    pub is_index: bool,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self { name: name.into(), data_type, is_index: false }
    }

    pub fn indexed(mut self) -> Self {
        self.is_index = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorInfo {
    pub name: String,
    pub dimension: u32,
    pub model_id: String,
    pub store_type: String,
    pub store_param: String,
    pub retrieval_type: String,
    /// Backend-specific JSON. `metric_type` is read from here.
    pub retrieval_param: String,
    pub is_index: bool,
}

impl VectorInfo {
    pub fn new(name: impl Into<String>, dimension: u32, retrieval_type: RetrievalType) -> Self {
        Self {
            name: name.into(),
            dimension,
            model_id: String::new(),
            store_type: "Mmap".into(),
            store_param: String::new(),
            retrieval_type: retrieval_type.as_str().into(),
            retrieval_param: String::new(),
            is_index: true,
        }
    }

    pub fn with_metric(mut self, metric: MetricType) -> Self {
        let name = match metric {
            MetricType::L2 => "L2",
            MetricType::InnerProduct => "InnerProduct",
        };
        self.retrieval_param = serde_json::json!({ "metric_type": name }).to_string();
        self
    }

    pub fn retrieval(&self) -> Result<RetrievalType> {
        self.retrieval_type.parse()
    }

    pub fn metric(&self) -> Result<MetricType> {
        MetricType::from_retrieval_param(&self.retrieval_param)
    }

    pub fn dim(&self) -> usize {
        self.dimension as usize
    }
}

/// A table definition as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Document count that triggers an automatic build; `0` disables it.
    pub indexing_size: u32,
    pub fields: Vec<FieldInfo>,
    pub vectors: Vec<VectorInfo>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexing_size: 0,
            fields: vec![FieldInfo::new(ID_FIELD, DataType::String)],
            vectors: Vec::new(),
        }
    }

    pub fn field(mut self, info: FieldInfo) -> Self {
        self.fields.push(info);
        self
    }

    pub fn vector(mut self, info: VectorInfo) -> Self {
        self.vectors.push(info);
        self
    }

    pub fn indexing_size(mut self, n: u32) -> Self {
        self.indexing_size = n;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(DataType),
    /// Position in [`Table::vectors`].
    Vector(usize),
}

/// A validated table. Once built it never changes.
#[derive(Debug, Clone)]
pub struct Schema {
    table: Table,
    by_name: HashMap<String, FieldKind>,
    metrics: Vec<MetricType>,
}

impl Schema {
    pub fn new(table: Table) -> Result<Self> {
        if table.name.trim().is_empty() {
            return Err(Error::InvalidSchema("table name is empty".into()));
        }
        let total = table.fields.len() + table.vectors.len();
        if total > MAX_FIELDS {
            return Err(Error::InvalidSchema(format!("{} fields exceeds limit {}", total, MAX_FIELDS)));
        }

        let mut by_name = HashMap::with_capacity(total);
        for f in &table.fields {
            if f.name.is_empty() {
                return Err(Error::InvalidSchema("field name is empty".into()));
            }
            if f.data_type.is_vector() {
                return Err(Error::InvalidSchema(format!(
                    "field '{}' has VECTOR type; declare it as a vector field",
                    f.name
                )));
            }
            if by_name.insert(f.name.clone(), FieldKind::Scalar(f.data_type)).is_some() {
                return Err(Error::InvalidSchema(format!("duplicate field name '{}'", f.name)));
            }
        }

        let mut metrics = Vec::with_capacity(table.vectors.len());
        for (i, v) in table.vectors.iter().enumerate() {
            if v.name.is_empty() {
                return Err(Error::InvalidSchema("vector field name is empty".into()));
            }
            if v.dimension == 0 {
                return Err(Error::InvalidSchema(format!("vector field '{}' has dimension 0", v.name)));
            }
            v.retrieval()?;
            metrics.push(v.metric()?);
            if by_name.insert(v.name.clone(), FieldKind::Vector(i)).is_some() {
                return Err(Error::InvalidSchema(format!("duplicate field name '{}'", v.name)));
            }
        }

        match by_name.get(ID_FIELD) {
            Some(FieldKind::Scalar(DataType::String)) => {}
            Some(_) => return Err(Error::InvalidSchema(format!("'{}' must be a STRING field", ID_FIELD))),
            None => return Err(Error::InvalidSchema(format!("missing '{}' field", ID_FIELD))),
        }

        Ok(Self { table, by_name, metrics })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn name(&self) -> &str {
        &self.table.name
    }

    pub fn lookup(&self, name: &str) -> Option<FieldKind> {
        self.by_name.get(name).copied()
    }

    pub fn field_map(&self) -> &HashMap<String, FieldKind> {
        &self.by_name
    }

    pub fn scalar(&self, name: &str) -> Option<&FieldInfo> {
        match self.lookup(name)? {
            FieldKind::Scalar(_) => self.table.fields.iter().find(|f| f.name == name),
            FieldKind::Vector(_) => None,
        }
    }

    pub fn vector_info(&self, name: &str) -> Option<&VectorInfo> {
        match self.lookup(name)? {
            FieldKind::Vector(i) => self.table.vectors.get(i),
            FieldKind::Scalar(_) => None,
        }
    }

    /// Metric already parsed out of `retrieval_param` at validation time.
    pub fn metric(&self, name: &str) -> Option<MetricType> {
        match self.lookup(name)? {
            FieldKind::Vector(i) => self.metrics.get(i).copied(),
            FieldKind::Scalar(_) => None,
        }
    }

    pub fn vectors(&self) -> &[VectorInfo] {
        &self.table.vectors
    }

    pub fn indexing_size(&self) -> u32 {
        self.table.indexing_size
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
    }
}
