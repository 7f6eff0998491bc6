//! Backend error types
//!
//! Errors raised by the document store, the credential system and blob
//! storage. Auth errors carry the backend's `auth/...` code so that the
//! session layer can map them to user-facing messages.

use thiserror::Error;

/// Errors that can occur in the document store
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, bad frame length)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Document does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Document already exists
    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    /// Field path or field value cannot be used for the operation
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// Transaction gave up after repeated write conflicts
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// Caller is not allowed to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Operation rejected by a precondition on the document contents
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Journal format or recovery error
    #[error("Journal error: {0}")]
    Journal(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error codes reported by the credential system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorCode {
    InvalidCredential,
    WrongPassword,
    UserDisabled,
    TooManyRequests,
    NetworkRequestFailed,
    UserNotFound,
    EmailAlreadyInUse,
    WeakPassword,
    InvalidEmail,
    OperationNotAllowed,
    InvalidToken,
    Other(String),
}

impl AuthErrorCode {
    /// Wire code, e.g. `auth/user-disabled`
    pub fn as_str(&self) -> &str {
        match self {
            AuthErrorCode::InvalidCredential => "auth/invalid-credential",
            AuthErrorCode::WrongPassword => "auth/wrong-password",
            AuthErrorCode::UserDisabled => "auth/user-disabled",
            AuthErrorCode::TooManyRequests => "auth/too-many-requests",
            AuthErrorCode::NetworkRequestFailed => "auth/network-request-failed",
            AuthErrorCode::UserNotFound => "auth/user-not-found",
            AuthErrorCode::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthErrorCode::WeakPassword => "auth/weak-password",
            AuthErrorCode::InvalidEmail => "auth/invalid-email",
            AuthErrorCode::OperationNotAllowed => "auth/operation-not-allowed",
            AuthErrorCode::InvalidToken => "auth/invalid-user-token",
            AuthErrorCode::Other(code) => code,
        }
    }

    /// Parse a wire code; unknown codes are kept verbatim
    pub fn from_code(code: &str) -> Self {
        match code {
            "auth/invalid-credential" => AuthErrorCode::InvalidCredential,
            "auth/wrong-password" => AuthErrorCode::WrongPassword,
            "auth/user-disabled" => AuthErrorCode::UserDisabled,
            "auth/too-many-requests" => AuthErrorCode::TooManyRequests,
            "auth/network-request-failed" => AuthErrorCode::NetworkRequestFailed,
            "auth/user-not-found" => AuthErrorCode::UserNotFound,
            "auth/email-already-in-use" => AuthErrorCode::EmailAlreadyInUse,
            "auth/weak-password" => AuthErrorCode::WeakPassword,
            "auth/invalid-email" => AuthErrorCode::InvalidEmail,
            "auth/operation-not-allowed" => AuthErrorCode::OperationNotAllowed,
            "auth/invalid-user-token" => AuthErrorCode::InvalidToken,
            other => AuthErrorCode::Other(other.to_string()),
        }
    }

    /// Norwegian message shown to the user
    pub fn localized_message(&self) -> String {
        match self {
            AuthErrorCode::InvalidCredential | AuthErrorCode::WrongPassword => {
                "Feil passord. Vennligst prøv igjen.".to_string()
            }
            AuthErrorCode::UserDisabled => "Denne brukerkontoen er deaktivert.".to_string(),
            AuthErrorCode::TooManyRequests => {
                "For mange innloggingsforsøk. Prøv igjen senere, eller tilbakestill passordet ditt."
                    .to_string()
            }
            AuthErrorCode::NetworkRequestFailed => {
                "Nettverksfeil. Sjekk internettforbindelsen din og prøv igjen.".to_string()
            }
            AuthErrorCode::UserNotFound => {
                "Bruker ikke funnet i autentiseringssystemet. Kontakt support hvis problemet vedvarer."
                    .to_string()
            }
            AuthErrorCode::EmailAlreadyInUse => {
                "Dette brukernavnet resulterte i en e-post som allerede er i bruk internt. Prøv et litt annet brukernavn."
                    .to_string()
            }
            AuthErrorCode::WeakPassword => {
                "Passordet er for svakt. Det må være minst 6 tegn.".to_string()
            }
            AuthErrorCode::InvalidEmail => {
                "Brukernavnet førte til en ugyldig intern e-postadresse. Bruk bokstaver og tall."
                    .to_string()
            }
            AuthErrorCode::OperationNotAllowed => {
                "Registrering med brukernavn/passord er ikke aktivert.".to_string()
            }
            AuthErrorCode::InvalidToken => "Økten er utløpt. Logg inn på nytt.".to_string(),
            AuthErrorCode::Other(code) => format!("En feil oppstod ({}). Prøv igjen.", code),
        }
    }
}

impl std::fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by the credential system
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct AuthError {
    pub code: AuthErrorCode,
    /// Backend-side detail, not shown to users
    pub message: String,
}

impl AuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn localized_message(&self) -> String {
        self.code.localized_message()
    }
}

/// Result type alias for credential operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors raised by blob storage
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid upload path: {0}")]
    InvalidPath(String),

    #[error("Upload is empty")]
    Empty,

    #[error("Upload too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
