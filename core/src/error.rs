use thiserror::Error;

use crate::RecordId;

/// Errors produced by the storage, index and search layers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("record {0} is still referenced by dependent records")]
    ReferentialIntegrity(RecordId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("lemmatizer failed: {0}")]
    Lemmatizer(String),

    #[error("corrupt file: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn record_not_found(id: RecordId) -> Self {
        Error::NotFound(format!("record {id}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(Error::record_not_found(7).to_string(), "not found: record 7");
        assert_eq!(
            Error::ReferentialIntegrity(3).to_string(),
            "record 3 is still referenced by dependent records"
        );
    }

    #[test]
    fn not_found_helper() {
        assert!(Error::record_not_found(1).is_not_found());
        assert!(!Error::InvalidArgument("x".into()).is_not_found());
    }
}
