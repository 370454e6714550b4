use plinth::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("column {0:?} not found")]
    ColumnNotFound(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("a transaction is already in progress")]
    TransactionInProgress,
}
