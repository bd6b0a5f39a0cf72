//! Error taxonomy shared by every vdoc crate.
//!
//! Each variant maps to a stable status code through [`Error::code`]; `0` is
//! reserved for success and every failure is negative:
//!
//! | code | variant |
//! |-----:|---------|
//! |  -1 | `InvalidSchema` |
//! |  -2 | `AlreadyExists` |
//! |  -3 | `NoTable` |
//! |  -4 | `MalformedBuffer` |
//! |  -5 | `InvalidDocument` |
//! |  -6 | `NotFound` |
//! |  -7 | `UnknownField` |
//! |  -8 | `InvalidRequest` |
//! |  -9 | `IncompleteBatch` |
//! | -10 | `EngineClosed` |
//! | -11 | `InvalidState` |
//! | -12 | `CorruptState` |
//! | -13 | `Store` |
//! | -14 | `IndexBackend` |
//! | -15 | `Overloaded` |
//! | -16 | `InvalidConfig` |
//! | -17 | `Io` |

use thiserror::Error;

use crate::status::EngineState;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Table already exists: {0}")]
    AlreadyExists(String),

    #[error("No table has been created")]
    NoTable,

    #[error("Malformed buffer: {0}")]
    MalformedBuffer(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Incomplete batch: slots {missing:?} were never staged")]
    IncompleteBatch { missing: Vec<usize> },

    #[error("Engine is closed")]
    EngineClosed,

    #[error("Cannot {op} while engine is {state}")]
    InvalidState { op: &'static str, state: EngineState },

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Index backend error: {0}")]
    IndexBackend(String),

    #[error("Admission rejected: {in_flight} operations in flight (limit {limit})")]
    Overloaded { in_flight: usize, limit: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub const SUCCESS: i32 = 0;

    /// Stable status code reported across the C boundary.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidSchema(_) => -1,
            Error::AlreadyExists(_) => -2,
            Error::NoTable => -3,
            Error::MalformedBuffer(_) => -4,
            Error::InvalidDocument(_) => -5,
            Error::NotFound(_) => -6,
            Error::UnknownField(_) => -7,
            Error::InvalidRequest(_) => -8,
            Error::IncompleteBatch { .. } => -9,
            Error::EngineClosed => -10,
            Error::InvalidState { .. } => -11,
            Error::CorruptState(_) => -12,
            Error::Store(_) => -13,
            Error::IndexBackend(_) => -14,
            Error::Overloaded { .. } => -15,
            Error::InvalidConfig(_) => -16,
            Error::Io(_) => -17,
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedBuffer(msg.into())
    }
}
