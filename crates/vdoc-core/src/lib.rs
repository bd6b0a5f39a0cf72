#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod config;
pub mod doc;
pub mod error;
pub mod logging;
pub mod request;
pub mod schema;
pub mod status;
pub mod traits;
pub mod types;

pub use doc::{Doc, Field, ID_FIELD};
pub use error::{Error, Result};
pub use schema::{FieldInfo, FieldKind, Schema, Table, VectorInfo, MAX_FIELDS};
pub use types::{DataType, DocId, FieldValue, MetricType, RetrievalType};
