//! Error taxonomy for the adapters and repositories

use thiserror::Error;

/// Input rejected before any I/O
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("task content must not be empty")]
    EmptyContent,

    #[error("task content is longer than {max} characters")]
    ContentTooLong { max: usize },

    #[error("tag name must not be empty")]
    EmptyTagName,

    #[error("tag name is longer than {max} characters")]
    TagNameTooLong { max: usize },

    #[error("a description is required")]
    EmptyDescription,

    #[error("email and password are required")]
    MissingCredentials,

    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("passwords do not match")]
    PasswordMismatch,
}

/// Failure reported by the remote store adapter
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid login credentials")]
    InvalidCredentials,

    #[error("email already registered")]
    AlreadyRegistered,

    #[error("anonymous sign-in is disabled")]
    AnonymousDisabled,

    #[error("not signed in")]
    NotSignedIn,

    #[error("row not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Failure reported by the local store adapter
#[derive(Debug, Error)]
pub enum LocalStoreError {
    #[error("local storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt local entry '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize local entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Error returned by repository and session operations
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Local(#[from] LocalStoreError),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("tag {0} not found")]
    TagNotFound(String),

    #[error("task details require a signed-in or anonymous account")]
    DetailsUnavailable,

    #[error("the active identity changed while the operation was running")]
    IdentityChanged,
}

pub type RepoResult<T> = Result<T, RepoError>;
