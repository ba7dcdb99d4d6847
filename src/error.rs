use thiserror::Error;

/// Every error surfaced at the engine boundary. Inner layers propagate these
/// through `anyhow::Result`; callers that need to react to a specific kind
/// downcast with `err.downcast_ref::<DbError>()`.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("tuple not found: {0}")]
    TupleNotFound(String),
    #[error("page full: {0}")]
    PageFull(String),
    #[error("incompatible types: {0}")]
    IncompatibleTypes(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("malformed data: {0}")]
    MalformedData(String),
    #[error("buffer pool full: {0}")]
    BufferPoolFull(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("duplicate table: {0}")]
    DuplicateTable(String),
    #[error("no such table: {0}")]
    NoSuchTable(String),
    #[error("ambiguous name: {0}")]
    AmbiguousName(String),
    #[error("illegal operation: {0}")]
    IllegalOperation(String),
    #[error("deadlock: {0}")]
    Deadlock(String),
    #[error("illegal transaction: {0}")]
    IllegalTransaction(String),
}
