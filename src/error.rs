use thiserror::Error;

use crate::model::{EntityId, EntityKind};
use crate::units::QuantityKind;
use crate::validate::ValidationError;

#[derive(Error, Debug)]
pub enum NeoError {
    #[error("Missing required field(s) for {kind}: {}", fields.join(", "))]
    MissingField { kind: EntityKind, fields: Vec<String> },
    #[error("Invalid {kind} unit: '{symbol}'")]
    InvalidUnit { kind: QuantityKind, symbol: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("No {kind} with id {id}")]
    NotFound { kind: EntityKind, id: EntityId },
    #[error("Cannot delete {kind} {id}: {reason}")]
    Conflict { kind: EntityKind, id: EntityId, reason: String },
    #[error("Division by zero while deriving {0}")]
    Division(&'static str),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Import failed at record {position}: {source}")]
    Import { position: usize, source: Box<NeoError> },
}

impl NeoError {
    /// Only storage failures hint at a systemic problem, everything else
    /// is corrected by changing the input.
    pub fn is_systemic(&self) -> bool {
        match self {
            Self::StorageUnavailable(_) => true,
            Self::Import { source, .. } => source.is_systemic(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, NeoError>;

// Helper conversions
impl From<rusqlite::Error> for NeoError {
    fn from(e: rusqlite::Error) -> Self { Self::StorageUnavailable(e.to_string()) }
}
impl From<serde_json::Error> for NeoError {
    fn from(e: serde_json::Error) -> Self { Self::StorageUnavailable(format!("corrupt payload: {e}")) }
}
impl From<config::ConfigError> for NeoError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
