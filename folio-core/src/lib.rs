pub mod order;
pub mod repository;
pub mod payment;
pub mod signature;
pub mod notification;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    Duplicate(String),
    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
