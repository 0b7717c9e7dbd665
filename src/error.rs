use thiserror::Error;

/// Failure taxonomy for the engine, per the error-handling design: every
/// variant here is either recoverable (`NotFound`) or fatal to the
/// operation that triggered it. The core never retries; retries are the
/// engine's or caller's responsibility.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("corrupt key: {0}")]
    CorruptKey(String),

    #[error("corrupt value: {0}")]
    CorruptValue(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("unknown encoder id {0}")]
    UnknownEncoder(u64),

    #[error("unsupported primitive in tuple: {0}")]
    TypeError(String),

    #[error("constraint violated: {0}")]
    ConstraintError(String),

    #[error("engine error: {0}")]
    EngineError(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("transaction aborted")]
    TxnAborted,

    #[error("key mismatch: derived key differs from supplied key")]
    KeyMismatch,

    #[error("collection or encoder already registered under a different shape: {0}")]
    CatalogConflict(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn engine(err: impl std::error::Error + Send + Sync + 'static) -> Self { Error::EngineError(Box::new(err)) }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self { Error::CorruptValue(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, Error>;
