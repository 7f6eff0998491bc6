//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tokio::sync::RwLock;

use crate::attendance::AttendanceService;
use crate::backend::{AuthBackend, Backend, Upload};
use crate::baths::BathService;
use crate::config::Config;
use crate::local_storage::MemoryLocalStorage;
use crate::notifications::{NotificationGuard, NotificationTracker};
use crate::session::Session;
use crate::websocket::{ConnectionHub, HubConfig};

use super::error::ApiError;

/// One signed-in client, keyed by bearer token
pub struct ClientSession {
    pub session: Session,
    pub notifications: Arc<NotificationTracker>,
    _listeners: NotificationGuard,
}

impl ClientSession {
    /// Fresh signed-out session with its own local storage
    pub fn new(backend: Backend) -> Self {
        let storage = Arc::new(MemoryLocalStorage::new());
        let notifications = Arc::new(NotificationTracker::new(
            Arc::clone(&backend.store),
            storage.clone(),
        ));
        let listeners = notifications.start();
        Self {
            session: Session::new(backend, storage),
            notifications,
            _listeners: listeners,
        }
    }
}

/// Most staged uploads one user may hold at once
pub const MAX_STAGED_UPLOADS_PER_USER: usize = 5;

struct SessionEntry {
    client: Arc<ClientSession>,
    last_used: Instant,
}

struct StagedUpload {
    upload: Upload,
    owner: String,
    staged_at: Instant,
    /// Staging order, ties on `staged_at` are common
    seq: u64,
}

/// Shared application state for all handlers
pub struct AppState {
    pub backend: Backend,
    pub config: Arc<Config>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
    /// WebSocket connection hub for live views
    pub ws_hub: Arc<ConnectionHub>,
    pub attendance: AttendanceService,
    pub baths: BathService,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    uploads: Mutex<HashMap<String, StagedUpload>>,
    upload_seq: AtomicU64,
    session_idle: Duration,
    upload_ttl: Duration,
}

impl AppState {
    pub fn new(backend: Backend, config: Config) -> Self {
        Self::with_ws_config(backend, config, HubConfig::default())
    }

    /// Create AppState with custom WebSocket hub configuration
    pub fn with_ws_config(backend: Backend, config: Config, hub_config: HubConfig) -> Self {
        Self {
            ws_hub: Arc::new(ConnectionHub::new(Arc::clone(&backend.store), hub_config)),
            attendance: AttendanceService::new(Arc::clone(&backend.store)),
            baths: BathService::new(backend.clone()),
            backend,
            session_idle: config.api.session_idle(),
            upload_ttl: config.api.upload_ttl(),
            config: Arc::new(config),
            start_time: Instant::now(),
            sessions: RwLock::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            upload_seq: AtomicU64::new(0),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get WebSocket connection count
    pub async fn ws_connection_count(&self) -> usize {
        self.ws_hub.connection_count().await
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Keep a signed-in client under its token. Idle clients are dropped,
    /// which stops their notification listeners.
    pub async fn register_session(&self, token: String, client: Arc<ClientSession>) {
        let mut sessions = self.sessions.write().await;
        self.sweep_idle(&mut sessions);
        sessions.insert(
            token,
            SessionEntry {
                client,
                last_used: Instant::now(),
            },
        );
    }

    pub async fn remove_session(&self, token: &str) -> Option<Arc<ClientSession>> {
        self.sessions.write().await.remove(token).map(|e| e.client)
    }

    fn sweep_idle(&self, sessions: &mut HashMap<String, SessionEntry>) {
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_used.elapsed() < self.session_idle);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = sessions.len(), "Dropped idle sessions");
        }
    }

    /// Session for a bearer token, restoring it from the credential system
    /// when this process has not seen the token yet. Cached tokens are
    /// checked again so a revoked token stops working at once.
    pub async fn session_for_token(&self, token: &str) -> Result<Arc<ClientSession>, ApiError> {
        let cached = self
            .sessions
            .read()
            .await
            .get(token)
            .map(|entry| Arc::clone(&entry.client));

        if let Some(client) = cached {
            if let Err(e) = self.backend.auth.verify_token(token).await {
                tracing::debug!(error = %e, "Cached bearer token no longer valid");
                self.sessions.write().await.remove(token);
                return Err(invalid_login());
            }
            if let Some(entry) = self.sessions.write().await.get_mut(token) {
                entry.last_used = Instant::now();
            }
            return Ok(client);
        }

        let client = Arc::new(ClientSession::new(self.backend.clone()));
        client.session.restore(token).await.map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            invalid_login()
        })?;

        let mut sessions = self.sessions.write().await;
        self.sweep_idle(&mut sessions);
        let entry = sessions
            .entry(token.to_string())
            .or_insert(SessionEntry {
                client,
                last_used: Instant::now(),
            });
        Ok(Arc::clone(&entry.client))
    }

    /// Hold an uploaded file until a later request by the same user claims
    /// it. A user over the cap loses their oldest staged file.
    pub fn stage_upload(&self, owner: &str, upload: Upload) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let Ok(mut uploads) = self.uploads.lock() else {
            return id;
        };

        uploads.retain(|_, staged| staged.staged_at.elapsed() < self.upload_ttl);

        let mut mine: Vec<(String, u64)> = uploads
            .iter()
            .filter(|(_, staged)| staged.owner == owner)
            .map(|(id, staged)| (id.clone(), staged.seq))
            .collect();
        if mine.len() >= MAX_STAGED_UPLOADS_PER_USER {
            mine.sort_by_key(|(_, seq)| *seq);
            let excess = mine.len() + 1 - MAX_STAGED_UPLOADS_PER_USER;
            for (old, _) in mine.into_iter().take(excess) {
                uploads.remove(&old);
                tracing::debug!(uid = owner, upload_id = %old, "Dropped oldest staged upload");
            }
        }

        uploads.insert(
            id.clone(),
            StagedUpload {
                upload,
                owner: owner.to_string(),
                staged_at: Instant::now(),
                seq: self.upload_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        id
    }

    /// Claim a staged upload. Each id can be claimed once, only by the user
    /// who staged it and only before it expires.
    pub fn take_upload(&self, id: &str, owner: &str) -> Option<Upload> {
        let mut uploads = self.uploads.lock().ok()?;
        match uploads.get(id) {
            Some(staged) if staged.owner != owner => {
                tracing::warn!(uid = owner, upload_id = id, "Refused upload staged by another user");
                return None;
            }
            Some(_) => {}
            None => return None,
        }
        let staged = uploads.remove(id)?;
        (staged.staged_at.elapsed() < self.upload_ttl).then_some(staged.upload)
    }

    pub fn staged_upload_count(&self) -> usize {
        self.uploads.lock().map(|u| u.len()).unwrap_or(0)
    }
}

fn invalid_login() -> ApiError {
    ApiError::Unauthorized("Ugyldig eller utløpt innlogging.".to_string())
}

/// Signed-in client resolved from the `Authorization: Bearer` header
pub struct Authenticated {
    pub token: String,
    pub client: Arc<ClientSession>,
}

impl Authenticated {
    pub fn session(&self) -> &Session {
        &self.client.session
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Du må være logget inn.".to_string()))?;
        let client = state.session_for_token(&token).await?;
        Ok(Self { token, client })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::SignupForm;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_unknown_token_is_rejected() {
        let dir = tempdir().unwrap();
        let state = AppState::new(Backend::in_memory(dir.path()).unwrap(), Config::default());

        let err = state.session_for_token("nope").await.err().unwrap();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_token_from_another_process_is_restored() {
        let dir = tempdir().unwrap();
        let backend = Backend::in_memory(dir.path()).unwrap();
        let state = AppState::new(backend.clone(), Config::default());

        // Signed up through a session the server never saw
        let elsewhere = ClientSession::new(backend);
        elsewhere
            .session
            .sign_up(&SignupForm {
                username: "anna".into(),
                password: "hemmelig".into(),
                confirm_password: "hemmelig".into(),
                target_baths: 30,
            })
            .await
            .unwrap();
        let token = elsewhere.session.token().unwrap();

        let client = state.session_for_token(&token).await.unwrap();
        assert_eq!(client.session.require_profile().unwrap().1.username, "anna");
        assert_eq!(state.session_count().await, 1);
    }

    async fn signed_up_elsewhere(backend: &Backend, username: &str) -> String {
        let elsewhere = ClientSession::new(backend.clone());
        elsewhere
            .session
            .sign_up(&SignupForm {
                username: username.into(),
                password: "hemmelig".into(),
                confirm_password: "hemmelig".into(),
                target_baths: 30,
            })
            .await
            .unwrap();
        elsewhere.session.token().unwrap()
    }

    fn config_with(session_idle_secs: u64, upload_ttl_secs: u64) -> Config {
        let mut config = Config::default();
        config.api.session_idle_secs = session_idle_secs;
        config.api.upload_ttl_secs = upload_ttl_secs;
        config
    }

    #[tokio::test]
    async fn test_revoked_token_is_rejected_even_when_cached() {
        let dir = tempdir().unwrap();
        let backend = Backend::in_memory(dir.path()).unwrap();
        let state = AppState::new(backend.clone(), Config::default());

        let token = signed_up_elsewhere(&backend, "anna").await;
        state.session_for_token(&token).await.unwrap();
        assert_eq!(state.session_count().await, 1);

        // Signed out by another client of the same credential system
        backend.auth.sign_out(&token).await.unwrap();

        let err = state.session_for_token(&token).await.err().unwrap();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_dropped() {
        let dir = tempdir().unwrap();
        let backend = Backend::in_memory(dir.path()).unwrap();
        let state = AppState::new(backend.clone(), config_with(0, 900));

        let anna = signed_up_elsewhere(&backend, "anna").await;
        let ola = signed_up_elsewhere(&backend, "ola").await;

        let first = state.session_for_token(&anna).await.unwrap();
        state.session_for_token(&ola).await.unwrap();
        assert_eq!(state.session_count().await, 1);

        // Dropped from memory but still a valid login
        let again = state.session_for_token(&anna).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &again));
        assert_eq!(state.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_active_sessions_are_kept() {
        let dir = tempdir().unwrap();
        let backend = Backend::in_memory(dir.path()).unwrap();
        let state = AppState::new(backend.clone(), Config::default());

        let anna = signed_up_elsewhere(&backend, "anna").await;
        let ola = signed_up_elsewhere(&backend, "ola").await;
        let first = state.session_for_token(&anna).await.unwrap();
        state.session_for_token(&ola).await.unwrap();

        assert_eq!(state.session_count().await, 2);
        let again = state.session_for_token(&anna).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[tokio::test]
    async fn test_staged_upload_claimed_once() {
        let dir = tempdir().unwrap();
        let state = AppState::new(Backend::in_memory(dir.path()).unwrap(), Config::default());

        let id = state.stage_upload("u1", Upload::new("bad.jpg", vec![1, 2, 3]));
        assert_eq!(state.take_upload(&id, "u1").unwrap().data, vec![1, 2, 3]);
        assert!(state.take_upload(&id, "u1").is_none());
    }

    #[tokio::test]
    async fn test_staged_upload_belongs_to_uploader() {
        let dir = tempdir().unwrap();
        let state = AppState::new(Backend::in_memory(dir.path()).unwrap(), Config::default());

        let id = state.stage_upload("u1", Upload::new("bad.jpg", vec![1, 2, 3]));
        assert!(state.take_upload(&id, "u2").is_none());
        // Still there for its owner
        assert!(state.take_upload(&id, "u1").is_some());
    }

    #[tokio::test]
    async fn test_expired_uploads_are_discarded() {
        let dir = tempdir().unwrap();
        let state = AppState::new(Backend::in_memory(dir.path()).unwrap(), config_with(3600, 0));

        let stale = state.stage_upload("u1", Upload::new("a.jpg", vec![1]));
        assert!(state.take_upload(&stale, "u1").is_none());

        state.stage_upload("u1", Upload::new("b.jpg", vec![2]));
        state.stage_upload("u2", Upload::new("c.jpg", vec![3]));
        // Each stage sweeps what has expired
        assert_eq!(state.staged_upload_count(), 1);
    }

    #[tokio::test]
    async fn test_staged_uploads_are_capped_per_user() {
        let dir = tempdir().unwrap();
        let state = AppState::new(Backend::in_memory(dir.path()).unwrap(), Config::default());

        let ids: Vec<String> = (0..MAX_STAGED_UPLOADS_PER_USER + 2)
            .map(|i| state.stage_upload("u1", Upload::new("bad.jpg", vec![i as u8])))
            .collect();
        let other = state.stage_upload("u2", Upload::new("bad.jpg", vec![9]));

        assert_eq!(state.staged_upload_count(), MAX_STAGED_UPLOADS_PER_USER + 1);
        let newest = ids.last().unwrap();
        assert_eq!(state.take_upload(newest, "u1").unwrap().data, vec![ids.len() as u8 - 1]);
        assert!(state.take_upload(&other, "u2").is_some());
    }
}
