//! Local credential store
//!
//! Argon2 password hashes and issued bearer tokens live in one JSON file.
//! Repeated failed sign-ins lock the address for a while.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::error::{AuthError, AuthErrorCode, AuthResult};
use super::{AuthBackend, AuthGrant, AuthUser};
use crate::config::AuthConfig;

/// Shortest accepted password
pub const MIN_PASSWORD_LEN: usize = 6;

/// Failed sign-in handling
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout: Duration::from_secs(300),
        }
    }
}

impl LockoutPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            max_failed_attempts: config.max_failed_attempts.max(1),
            lockout: Duration::from_secs(config.lockout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialRecord {
    uid: String,
    email: String,
    password_hash: String,
    #[serde(default)]
    disabled: bool,
    created_at: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    users: Vec<CredentialRecord>,
    /// token -> uid
    tokens: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct FailedAttempts {
    count: u32,
    locked_until: Option<Instant>,
}

/// Credential store backed by a JSON file (or nothing, for tests)
pub struct LocalAuth {
    path: Option<PathBuf>,
    data: Mutex<CredentialFile>,
    attempts: Mutex<HashMap<String, FailedAttempts>>,
    policy: LockoutPolicy,
}

impl LocalAuth {
    /// Load or create the credential file
    pub async fn open(path: impl AsRef<Path>, policy: LockoutPolicy) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CredentialFile::default(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
            attempts: Mutex::new(HashMap::new()),
            policy,
        })
    }

    pub fn in_memory(policy: LockoutPolicy) -> Self {
        Self {
            path: None,
            data: Mutex::new(CredentialFile::default()),
            attempts: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Enable or disable an account. Disabling also revokes its tokens.
    pub async fn set_disabled(&self, uid: &str, disabled: bool) -> AuthResult<()> {
        let mut data = self.data.lock().await;
        let record = data
            .users
            .iter_mut()
            .find(|u| u.uid == uid)
            .ok_or_else(|| AuthError::new(AuthErrorCode::UserNotFound, uid))?;
        record.disabled = disabled;
        if disabled {
            data.tokens.retain(|_, owner| owner != uid);
        }
        self.persist(&data).await
    }

    async fn persist(&self, data: &CredentialFile) -> AuthResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(data)
            .map_err(|e| AuthError::new(AuthErrorCode::Other("auth/internal-error".into()), e.to_string()))?;

        let write = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp = path.with_extension("tmp");
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, path).await
        };
        write.await.map_err(|e| {
            tracing::error!(error = %e, "Failed to persist credentials");
            AuthError::new(AuthErrorCode::Other("auth/internal-error".into()), e.to_string())
        })
    }

    fn issue_token(data: &mut CredentialFile, uid: &str) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        data.tokens.insert(token.clone(), uid.to_string());
        token
    }

    async fn check_lockout(&self, email: &str) -> AuthResult<()> {
        let mut attempts = self.attempts.lock().await;
        if let Some(entry) = attempts.get_mut(email) {
            match entry.locked_until {
                Some(until) if until > Instant::now() => {
                    return Err(AuthError::new(
                        AuthErrorCode::TooManyRequests,
                        format!("{} is temporarily locked", email),
                    ));
                }
                Some(_) => {
                    entry.locked_until = None;
                    entry.count = 0;
                }
                None => {}
            }
        }
        Ok(())
    }

    async fn record_failure(&self, email: &str) {
        let mut attempts = self.attempts.lock().await;
        let entry = attempts.entry(email.to_string()).or_default();
        entry.count += 1;
        if entry.count >= self.policy.max_failed_attempts {
            tracing::warn!(email, "Too many failed sign-ins, locking");
            entry.locked_until = Some(Instant::now() + self.policy.lockout);
            entry.count = 0;
        }
    }
}

fn validate_email(email: &str) -> AuthResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AuthError::new(AuthErrorCode::InvalidEmail, email))
    }
}

fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::new(AuthErrorCode::Other("auth/internal-error".into()), e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

#[async_trait]
impl AuthBackend for LocalAuth {
    async fn create_user(&self, email: &str, password: &str) -> AuthResult<AuthGrant> {
        let email = email.trim().to_lowercase();
        validate_email(&email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::new(AuthErrorCode::WeakPassword, "password too short"));
        }

        let mut data = self.data.lock().await;
        if data.users.iter().any(|u| u.email == email) {
            return Err(AuthError::new(AuthErrorCode::EmailAlreadyInUse, email));
        }

        let uid = uuid::Uuid::new_v4().simple().to_string();
        data.users.push(CredentialRecord {
            uid: uid.clone(),
            email: email.clone(),
            password_hash: hash_password(password)?,
            disabled: false,
            created_at: chrono::Utc::now().timestamp_millis(),
        });
        let token = Self::issue_token(&mut data, &uid);
        self.persist(&data).await?;

        tracing::info!(uid = %uid, "Credential created");
        Ok(AuthGrant {
            user: AuthUser { uid, email },
            token,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthGrant> {
        let email = email.trim().to_lowercase();
        self.check_lockout(&email).await?;

        let mut data = self.data.lock().await;
        let record = match data.users.iter().find(|u| u.email == email) {
            Some(record) => record.clone(),
            None => return Err(AuthError::new(AuthErrorCode::UserNotFound, email)),
        };

        if record.disabled {
            return Err(AuthError::new(AuthErrorCode::UserDisabled, email));
        }

        if !verify_password(password, &record.password_hash) {
            drop(data);
            self.record_failure(&email).await;
            return Err(AuthError::new(AuthErrorCode::InvalidCredential, email));
        }

        self.attempts.lock().await.remove(&email);
        let token = Self::issue_token(&mut data, &record.uid);
        self.persist(&data).await?;

        tracing::debug!(uid = %record.uid, "Signed in");
        Ok(AuthGrant {
            user: AuthUser {
                uid: record.uid,
                email: record.email,
            },
            token,
        })
    }

    async fn sign_out(&self, token: &str) -> AuthResult<()> {
        let mut data = self.data.lock().await;
        if data.tokens.remove(token).is_some() {
            self.persist(&data).await?;
        }
        Ok(())
    }

    async fn verify_token(&self, token: &str) -> AuthResult<AuthUser> {
        let data = self.data.lock().await;
        let invalid = || AuthError::new(AuthErrorCode::InvalidToken, "unknown or revoked token");

        let uid = data.tokens.get(token).ok_or_else(invalid)?;
        let record = data
            .users
            .iter()
            .find(|u| &u.uid == uid)
            .ok_or_else(invalid)?;

        if record.disabled {
            return Err(AuthError::new(AuthErrorCode::UserDisabled, record.email.clone()));
        }

        Ok(AuthUser {
            uid: record.uid.clone(),
            email: record.email.clone(),
        })
    }
}
