//! Documents in their decoded form and their wire-level field representation.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{DataType, FieldValue};

/// Name of the reserved string field carrying a document's external key.
pub const ID_FIELD: &str = "_id";

/// A field as it travels on the wire: name, raw bytes and a type tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Vec<u8>,
    pub datatype: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, value: &FieldValue) -> Self {
        Self {
            name: name.into(),
            value: value.to_bytes(),
            datatype: value.data_type(),
        }
    }

    pub fn decode_value(&self) -> Result<FieldValue> {
        FieldValue::from_bytes(self.datatype, &self.value)
    }
}

/// A decoded document. Scalar and vector fields live in one map; the value
/// variant says which is which.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Doc {
    fields: BTreeMap<String, FieldValue>,
}

impl Doc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a document that only carries its key.
    pub fn with_key(key: impl AsRef<str>) -> Self {
        let mut doc = Self::new();
        doc.set(ID_FIELD, FieldValue::str(key));
        doc
    }

    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) -> &mut Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The `_id` value, if present and valid UTF-8.
    pub fn key(&self) -> Option<&str> {
        self.fields
            .get(ID_FIELD)
            .and_then(FieldValue::as_str_bytes)
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.iter().filter(|(_, v)| !v.data_type().is_vector())
    }

    pub fn vector_fields(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.iter().filter_map(|(k, v)| v.as_vector().map(|vec| (k, vec)))
    }

    pub fn memory_bytes(&self) -> usize {
        self.fields
            .iter()
            .map(|(k, v)| k.len() + v.memory_bytes())
            .sum()
    }

    /// Builds a document from wire fields. A duplicated name is rejected.
    pub fn from_wire_fields(fields: Vec<Field>) -> Result<Self> {
        let mut doc = Self::new();
        for field in fields {
            let value = field.decode_value()?;
            if doc.fields.insert(field.name.clone(), value).is_some() {
                return Err(Error::InvalidDocument(format!("duplicate field '{}'", field.name)));
            }
        }
        Ok(doc)
    }

    pub fn to_wire_fields(&self) -> Vec<Field> {
        self.fields.iter().map(|(k, v)| Field::new(k.clone(), v)).collect()
    }
}
