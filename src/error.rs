use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A remote key that was expected to carry the repository prefix did not.
    #[error("invalid key does not start with prefix {prefix:?}: {key}")]
    InvalidKey { key: String, prefix: String },
    #[error("invalid timestamp {raw:?} stored under {key}")]
    InvalidTimestamp { key: String, raw: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures reported by a [`crate::repository::remote::SortedSetStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("operation against a key holding the wrong kind of value: {key}")]
    WrongType { key: String },
}
