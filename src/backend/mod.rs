//! Backend ports
//!
//! The application talks to its hosted backend through four traits:
//!
//! - `DocumentStore`: documents, queries, live queries, transactions
//! - `AuthBackend`: email/password credentials and bearer tokens
//! - `BlobStorage`: file uploads with public download URLs
//! - `Geocoder`: address lookup (see `crate::geocoding`)
//!
//! The reference implementations in this module keep everything on the
//! local machine: `MemoryStore`, `LocalAuth` and `LocalBlobStorage`.

pub mod auth;
pub mod blob;
pub mod document;
pub mod error;
pub mod journal;
pub mod listen;
pub mod memory;
pub mod transaction;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use auth::{LocalAuth, LockoutPolicy};
pub use blob::{sanitize_filename, LocalBlobStorage, Upload};
pub use document::{
    decode_all, decode_valid, to_fields, Direction, Document, FieldOp, Fields, Query,
};
pub use error::{AuthError, AuthErrorCode, AuthResult, StoreError, StoreResult, UploadError};
pub use journal::JournalSyncMode;
pub use listen::Subscription;
pub use memory::MemoryStore;
pub use transaction::{Transaction, TransactionFn, MAX_TRANSACTION_ATTEMPTS};

use crate::config::Config;
use crate::geocoding::{FixedGeocoder, Geocoder, HttpGeocoder};

/// Document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document
    async fn get(&self, path: &str) -> StoreResult<Option<Document>>;

    /// Create a document with a generated id
    async fn add(&self, collection: &str, data: Fields) -> StoreResult<Document>;

    /// Create a document at a fixed path, failing if it exists
    async fn create(&self, path: &str, data: Fields) -> StoreResult<Document>;

    /// Create or replace a document
    async fn set(&self, path: &str, data: Fields) -> StoreResult<Document>;

    /// Create a document or deep-merge into it
    async fn merge(&self, path: &str, data: Fields) -> StoreResult<Document>;

    /// Apply field ops to an existing document
    async fn update(&self, path: &str, ops: Vec<FieldOp>) -> StoreResult<Document>;

    /// One-shot query
    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    /// Live query: the current result set, then a new one after every change
    fn listen(&self, query: Query) -> Subscription<StoreResult<Vec<Document>>>;

    /// Run `body` as an optimistic transaction, retrying on conflicts
    async fn run_transaction(&self, body: &TransactionFn<'_>) -> StoreResult<()>;
}

/// Authenticated principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
}

/// Result of a successful sign-in or sign-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthGrant {
    pub user: AuthUser,
    pub token: String,
}

/// Email/password credential system
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn create_user(&self, email: &str, password: &str) -> AuthResult<AuthGrant>;

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthGrant>;

    /// Invalidate a token. Unknown tokens are ignored.
    async fn sign_out(&self, token: &str) -> AuthResult<()>;

    /// Resolve a bearer token to its principal
    async fn verify_token(&self, token: &str) -> AuthResult<AuthUser>;
}

/// File storage with public download URLs
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `data` under `path` and return its download URL
    async fn upload(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<String, UploadError>;
}

/// Errors opening the backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Auth backend error: {0}")]
    Auth(String),

    #[error("Blob storage error: {0}")]
    Blob(#[from] UploadError),

    #[error("Geocoder error: {0}")]
    Geocoder(String),
}

/// The ports, bundled
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn DocumentStore>,
    pub auth: Arc<dyn AuthBackend>,
    pub blobs: Arc<dyn BlobStorage>,
    pub geocoder: Arc<dyn Geocoder>,
}

impl Backend {
    /// Reference backend rooted at the configured data directory
    pub async fn open_local(config: &Config) -> Result<Self, BackendError> {
        let data_dir = &config.storage.data_dir;

        let store = MemoryStore::open(data_dir.join("documents"), config.storage.sync_mode)?;
        let auth = LocalAuth::open(
            data_dir.join("credentials.json"),
            LockoutPolicy::from_config(&config.auth),
        )
        .await
        .map_err(|e| BackendError::Auth(e.to_string()))?;
        let blobs = LocalBlobStorage::new(
            data_dir.join("media"),
            config.api.media_url_prefix(),
            config.storage.max_upload_bytes,
        )?;

        let geocoder: Arc<dyn Geocoder> = if config.geocoding.enabled {
            Arc::new(
                HttpGeocoder::new(&config.geocoding)
                    .map_err(|e| BackendError::Geocoder(e.to_string()))?,
            )
        } else {
            Arc::new(FixedGeocoder::default())
        };

        Ok(Self {
            store: Arc::new(store),
            auth: Arc::new(auth),
            blobs: Arc::new(blobs),
            geocoder,
        })
    }

    /// Volatile backend for tests and demos
    pub fn in_memory(media_dir: impl Into<std::path::PathBuf>) -> Result<Self, BackendError> {
        Ok(Self {
            store: Arc::new(MemoryStore::in_memory()),
            auth: Arc::new(LocalAuth::in_memory(LockoutPolicy::default())),
            blobs: Arc::new(LocalBlobStorage::new(
                media_dir,
                "/media".to_string(),
                10 * 1024 * 1024,
            )?),
            geocoder: Arc::new(FixedGeocoder::default()),
        })
    }
}
