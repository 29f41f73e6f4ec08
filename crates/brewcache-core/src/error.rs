use thiserror::Error;

/// Failures raised by the storage backends themselves.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record in '{collection}' has no '{key_path}' field")]
    MissingKey {
        collection: String,
        key_path: String,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Compression error: {0}")]
    Compression(String),
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StorageError::Poisoned
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the entity managers on the write path.
#[derive(Error, Debug)]
pub enum EntityError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{message}")]
    Storage {
        message: String,
        #[source]
        source: StorageError,
    },
}

impl EntityError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EntityError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Wrap a backend failure with a human-readable message.
    pub fn storage(message: impl Into<String>, source: StorageError) -> Self {
        EntityError::Storage {
            message: message.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EntityError::NotFound { .. })
    }
}

pub type EntityResult<T> = std::result::Result<T, EntityError>;

/// Attach a message to a storage failure, turning it into an [`EntityError`].
pub(crate) trait StorageContext<T> {
    fn context(self, message: impl Into<String>) -> EntityResult<T>;

    fn with_context<F, S>(self, f: F) -> EntityResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> StorageContext<T> for StorageResult<T> {
    fn context(self, message: impl Into<String>) -> EntityResult<T> {
        self.map_err(|e| EntityError::storage(message, e))
    }

    fn with_context<F, S>(self, f: F) -> EntityResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| EntityError::storage(f(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_storage_wrapper_keeps_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = EntityError::storage("Failed to save equipment", StorageError::from(io));
        assert_eq!(err.to_string(), "Failed to save equipment");
        let cause = err.source().expect("cause");
        assert!(cause.to_string().contains("disk full"));
    }

    #[test]
    fn test_not_found_display() {
        let err = EntityError::not_found("Equipment", "custom-v60-1-abc");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Equipment not found: custom-v60-1-abc");
    }
}
