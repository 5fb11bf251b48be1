use thiserror::Error;

/// Coarse classification of a [`PetError`].
///
/// Every failure the core can report falls into one of three buckets:
/// persistence problems, caller mistakes, and tamper detection. Tests assert
/// on the kind rather than on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Disk unavailable, permission denied, serialization to disk failed.
    Io,
    /// Bad credentials, insufficient balance, malformed input.
    Validation,
    /// An authentication tag did not match. Fail closed, no detail.
    Integrity,
}

/// Errors that can arise in the PixelPet state core.
#[derive(Debug, Error)]
pub enum PetError {
    /// Wrapper around IO errors (directory creation, document writes).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapper around JSON serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Returned when an operation names a user that is not registered.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Returned when a debit exceeds the current run-time balance.
    #[error("insufficient run time balance")]
    InsufficientBalance,

    /// Returned when a pantry consume exceeds the held quantity.
    #[error("not enough of item: {0}")]
    InsufficientInventory(String),

    /// Zero or otherwise unusable amount passed to a credit/consume.
    #[error("amount must be positive")]
    InvalidAmount,

    /// A transfer key was already redeemed by this user.
    #[error("transfer key already redeemed")]
    KeyAlreadyUsed,

    /// Malformed or semantically invalid input (registration, tokens,
    /// backup framing). Message is safe to show to the user.
    #[error("{0}")]
    Validation(String),

    /// An HMAC tag did not match. Deliberately carries no detail.
    #[error("integrity check failed")]
    Integrity,
}

impl PetError {
    /// Map this error onto the three-way taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PetError::Io(_) => ErrorKind::Io,
            PetError::Json(_) => ErrorKind::Validation,
            PetError::UnknownUser(_)
            | PetError::InsufficientBalance
            | PetError::InsufficientInventory(_)
            | PetError::InvalidAmount
            | PetError::KeyAlreadyUsed
            | PetError::Validation(_) => ErrorKind::Validation,
            PetError::Integrity => ErrorKind::Integrity,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PetError>;
