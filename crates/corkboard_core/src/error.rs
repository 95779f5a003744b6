use thiserror::Error;

use crate::model::BoardAction;

/// Unified error type for corkboard operations
#[derive(Debug, Error)]
pub enum CorkboardError {
    // Permission errors
    #[error("Not allowed to {action:?} in project '{project_id}'")]
    Denied {
        project_id: String,
        action: BoardAction,
    },

    #[error("Project '{0}' is invite-only")]
    NotInvited(String),

    // Lookup errors
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    // Validation errors
    #[error("Position {given} is out of range (scope holds {len} cards)")]
    InvalidPosition { given: usize, len: usize },

    #[error("Card '{0}' has no live scope (archived or detached)")]
    MissingScope(String),

    #[error("Lane '{0}' still holds cards")]
    LaneNotEmpty(String),

    #[error("Lane '{lane_id}' does not belong to board '{board_id}'")]
    LaneMismatch { board_id: String, lane_id: String },

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Malformed stored document: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Result type alias for corkboard operations
pub type Result<T> = std::result::Result<T, CorkboardError>;

impl CorkboardError {
    /// Whether the error is a permission refusal (maps to HTTP 403).
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. } | Self::NotInvited(_))
    }

    /// Whether the error is an unresolved id (maps to HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the error was caught before any write (maps to HTTP 422).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPosition { .. }
                | Self::MissingScope(_)
                | Self::LaneNotEmpty(_)
                | Self::LaneMismatch { .. }
        )
    }
}
