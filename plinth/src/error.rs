use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Every failure the storage layer can report. IO errors keep their source;
/// `Corruption` carries a human-readable description of what was malformed.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("table {0:?} already exists")]
    TableExists(String),

    #[error("table {0:?} does not exist")]
    TableMissing(String),

    #[error("column {0:?} not found in table {1:?}")]
    ColumnMissing(String, String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("write operation in a read-only transaction")]
    ReadOnlyViolation,

    #[error("transaction is closed")]
    TxClosed,

    #[error("transaction does not belong to this engine")]
    TxTypeInvalid,

    #[error("page has no room for the record")]
    PageFull,

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("index {0:?} already exists")]
    IndexExists(String),

    #[error("index {0:?} does not exist")]
    IndexMissing(String),

    #[error("cannot index non-integer column {0:?}")]
    IndexTypeUnsupported(String),

    #[error("internal index node is full (internal splits not implemented)")]
    IndexInternalFull,
}

impl StorageError {
    pub fn corruption(detail: impl Into<String>) -> Self {
        StorageError::Corruption(detail.into())
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, StorageError::Corruption(_))
    }
}
