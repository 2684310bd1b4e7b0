// ABOUTME: Error taxonomy for sync sessions (validation, state, storage, lock)
// ABOUTME: Storage/lock errors keep the driver error as source for full chains

use thiserror::Error;

/// Boxed driver error kept as the source of storage and lock failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by the collector, applier and orchestrator.
///
/// Every session reports exactly one of these; there is no aggregation and no
/// retry inside the library.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed change or delete payload.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing revision row or unusable table registry.
    #[error("state error: {0}")]
    State(String),

    /// I/O failure from either store.
    #[error("storage error: {context}")]
    Storage {
        /// What the engine was doing.
        context: String,
        /// Driver error.
        #[source]
        source: BoxError,
    },

    /// Failure to acquire or release the session locks.
    #[error("lock error: {context}")]
    Lock {
        /// What the engine was doing.
        context: String,
        /// Driver error.
        #[source]
        source: BoxError,
    },
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        SyncError::State(message.into())
    }

    /// Whether this error came from the session lock rather than the data path.
    pub fn is_lock(&self) -> bool {
        matches!(self, SyncError::Lock { .. })
    }
}

/// `with_context`-style helpers for turning driver errors into [`SyncError`].
pub trait StorageResultExt<T> {
    fn storage_context<F>(self, context: F) -> SyncResult<T>
    where
        F: FnOnce() -> String;

    fn lock_context<F>(self, context: F) -> SyncResult<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> StorageResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn storage_context<F>(self, context: F) -> SyncResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| SyncError::Storage {
            context: context(),
            source: Box::new(err),
        })
    }

    fn lock_context<F>(self, context: F) -> SyncResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| SyncError::Lock {
            context: context(),
            source: Box::new(err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn storage_context_keeps_source() {
        let io: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk gone",
        ));
        let err = io.storage_context(|| "reading revision".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "storage error: reading revision");
        assert_eq!(err.source().unwrap().to_string(), "disk gone");
        assert!(!err.is_lock());
    }

    #[test]
    fn lock_context_is_lock() {
        let io: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "deadlock"));
        let err = io.lock_context(|| "locking tables".to_string()).unwrap_err();
        assert!(err.is_lock());
        assert!(err.to_string().contains("locking tables"));
    }
}
