use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Created,
    TableDefined,
    Serving,
    Building,
    Closed,
}

impl EngineState {
    pub fn as_u8(self) -> u8 {
        match self {
            EngineState::Created => 0,
            EngineState::TableDefined => 1,
            EngineState::Serving => 2,
            EngineState::Building => 3,
            EngineState::Closed => 4,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => EngineState::Created,
            1 => EngineState::TableDefined,
            2 => EngineState::Serving,
            3 => EngineState::Building,
            4 => EngineState::Closed,
            _ => return None,
        })
    }

    /// Writes and searches are accepted.
    pub fn is_operational(self) -> bool {
        matches!(self, EngineState::TableDefined | EngineState::Serving | EngineState::Building)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Created => "created",
            EngineState::TableDefined => "table-defined",
            EngineState::Serving => "serving",
            EngineState::Building => "building",
            EngineState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStatus {
    Unindexed,
    Indexing,
    Indexed,
}

impl IndexStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            IndexStatus::Unindexed => 0,
            IndexStatus::Indexing => 1,
            IndexStatus::Indexed => 2,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => IndexStatus::Unindexed,
            1 => IndexStatus::Indexing,
            2 => IndexStatus::Indexed,
            _ => return None,
        })
    }
}

/// Point-in-time counters returned by `GetEngineStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub index_status: IndexStatus,
    /// Live documents.
    pub doc_num: u64,
    /// Highest doc number ever assigned plus one.
    pub max_docid: u64,
    /// Documents covered by the current index generation.
    pub indexed_num: u64,
    /// Documents written since the last successful build.
    pub dirty_num: u64,
    pub index_generation: u64,
    pub in_flight: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub table_mem: u64,
    pub vector_mem: u64,
    pub index_mem: u64,
}

impl MemoryInfo {
    pub fn total(&self) -> u64 {
        self.table_mem + self.vector_mem + self.index_mem
    }
}
