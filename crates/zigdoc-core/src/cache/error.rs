use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Store version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Store entry belongs to another key: expected {expected}, found {found}")]
    KeyMismatch { expected: String, found: String },
}

pub type Result<T> = std::result::Result<T, CacheError>;
