use std::path::PathBuf;

use crate::chatbot::ChatbotStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error(
        "chatbot {id} cannot move to {attempted}: current status is {current}"
    )]
    InvalidTransition {
        id: String,
        current: ChatbotStatus,
        attempted: ChatbotStatus,
    },

    #[error("dataset is empty or does not exist: {0}")]
    EmptyDataset(String),

    #[error("not trained: {0}")]
    NotTrained(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cannot build an index from zero entries")]
    EmptyIndex,

    #[error("index queried before it was built")]
    NotBuilt,

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Stable tag identifying the error class, used in API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::EmptyDataset(_) => "empty_dataset",
            Error::NotTrained(_) => "not_trained",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::EmptyIndex => "empty_index",
            Error::NotBuilt => "not_built",
            Error::InvalidInput(_) => "invalid_input",
            Error::Config(_) | Error::DataDir(_) => "config",
            Error::Io(_)
            | Error::Redb(_)
            | Error::RedbDatabase(_)
            | Error::RedbStorage(_)
            | Error::RedbTransaction(_)
            | Error::RedbTable(_)
            | Error::RedbCommit(_)
            | Error::Json(_) => "storage",
        }
    }

    pub(crate) fn chatbot_not_found(id: impl ToString) -> Self {
        Error::NotFound {
            kind: "chatbot",
            name: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_both_states() {
        let err = Error::InvalidTransition {
            id: "abc".to_string(),
            current: ChatbotStatus::Active,
            attempted: ChatbotStatus::Trained,
        };
        let msg = err.to_string();
        assert!(msg.contains("active"));
        assert!(msg.contains("trained"));
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[test]
    fn kinds_are_distinct_for_domain_errors() {
        let kinds = [
            Error::chatbot_not_found("x").kind(),
            Error::EmptyDataset("d".into()).kind(),
            Error::NotTrained("x".into()).kind(),
            Error::DimensionMismatch {
                expected: 1,
                actual: 2,
            }
            .kind(),
            Error::EmptyIndex.kind(),
            Error::NotBuilt.kind(),
        ];
        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), kinds.len());
    }
}
