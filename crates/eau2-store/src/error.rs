use eau2_net::NetError;
use eau2_types::Key;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("timed out after {waited_ms} ms waiting for {key}")]
    Timeout { key: Key, waited_ms: u64 },

    #[error("key {0} is owned by this node but has no value")]
    MissingLocalKey(Key),

    #[error("key {0} is owned by this node; it is never fetched")]
    OwnKey(Key),

    #[error("request for {0} was rejected by its owner")]
    Rejected(Key),

    #[error("transport is not registered")]
    NotRegistered,

    #[error("network error: {0}")]
    Net(#[from] NetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
