//! Auth/session store
//!
//! One `Session` per client. It holds the signed-in principal, their
//! profile, a loading flag and the last session-level error, and
//! publishes every change on a watch channel.
//!
//! A principal without a profile document is a distinct state: the
//! session stays authenticated, `profile` is `None` and `error` is
//! `ProfileMissing`. Nothing else is blocked by it.

mod error;

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;

pub use error::{SessionError, SessionErrorView};

use crate::backend::{
    decode_all, to_fields, AuthGrant, AuthUser, Backend, Query, Upload,
};
use crate::forms::{LoginForm, ProfileForm, SignupForm};
use crate::local_storage::{LocalStorage, ONBOARDING_KEY};
use crate::model::{collections, UserProfile};
use crate::notice::Notice;

/// Observable session state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub user: Option<AuthUser>,
    pub profile: Option<UserProfile>,
    pub loading: bool,
    pub error: Option<SessionError>,
}

impl SessionState {
    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }
}

/// Serializable snapshot of the session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub user: Option<AuthUser>,
    pub profile: Option<UserProfile>,
    pub loading: bool,
    pub error: Option<SessionErrorView>,
}

impl From<&SessionState> for SessionView {
    fn from(state: &SessionState) -> Self {
        Self {
            user: state.user.clone(),
            profile: state.profile.clone(),
            loading: state.loading,
            error: state.error.as_ref().map(SessionErrorView::from),
        }
    }
}

pub struct Session {
    backend: Backend,
    storage: Arc<dyn LocalStorage>,
    state: watch::Sender<SessionState>,
    token: Mutex<Option<String>>,
}

impl Session {
    pub fn new(backend: Backend, storage: Arc<dyn LocalStorage>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            backend,
            storage,
            state,
            token: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn storage(&self) -> Arc<dyn LocalStorage> {
        Arc::clone(&self.storage)
    }

    /// Watch state changes; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn view(&self) -> SessionView {
        SessionView::from(&*self.state.borrow())
    }

    /// Bearer token of the signed-in principal
    pub fn token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|t| t.clone())
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().user.clone()
    }

    pub fn require_user(&self) -> Result<AuthUser, SessionError> {
        self.current_user().ok_or(SessionError::NotSignedIn)
    }

    /// Signed-in principal and their profile
    pub fn require_profile(&self) -> Result<(AuthUser, UserProfile), SessionError> {
        let state = self.state.borrow();
        let user = state.user.clone().ok_or(SessionError::NotSignedIn)?;
        let profile = state.profile.clone().ok_or(SessionError::ProfileMissing)?;
        Ok((user, profile))
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut current) = self.token.lock() {
            *current = token;
        }
    }

    /// Register a new user.
    ///
    /// Validates the form, rejects a taken username, creates the
    /// credential and the profile document, and raises the onboarding flag.
    pub async fn sign_up(&self, form: &SignupForm) -> Result<Notice, SessionError> {
        let valid = form.validate()?;

        let taken = self
            .backend
            .store
            .query(
                &Query::collection(collections::USERS)
                    .where_eq("username", valid.username.as_str())
                    .limit(1),
            )
            .await?;
        if !taken.is_empty() {
            return Err(SessionError::UsernameTaken);
        }

        self.state.send_modify(|s| s.loading = true);
        let grant = match self
            .backend
            .auth
            .create_user(&valid.email, &valid.password)
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                self.state.send_modify(|s| s.loading = false);
                return Err(e.into());
            }
        };

        let profile = UserProfile::new(
            grant.user.uid.clone(),
            grant.user.email.clone(),
            valid.username.clone(),
            valid.target_baths,
        );
        let path = format!("{}/{}", collections::USERS, grant.user.uid);
        let written = self.backend.store.set(&path, to_fields(&profile)?).await;

        self.set_token(Some(grant.token.clone()));
        if let Err(e) = written {
            tracing::error!(uid = %grant.user.uid, error = %e, "Profile creation failed");
            self.state.send_replace(SessionState {
                user: Some(grant.user),
                profile: None,
                loading: false,
                error: Some(SessionError::ProfileMissing),
            });
            return Err(e.into());
        }

        self.state.send_replace(SessionState {
            user: Some(grant.user),
            profile: Some(profile),
            loading: false,
            error: None,
        });
        self.storage.set(ONBOARDING_KEY, "true")?;

        tracing::info!(username = %valid.username, "User signed up");
        Ok(Notice::info(
            "Registrering Vellykket!",
            format!("Velkommen, {}! Din profil er opprettet.", valid.username),
        ))
    }

    /// Sign in by username
    pub async fn sign_in(&self, form: &LoginForm) -> Result<Notice, SessionError> {
        let username = form.validate()?;

        let matches = self
            .backend
            .store
            .query(
                &Query::collection(collections::USERS)
                    .where_eq("username", username.as_str())
                    .limit(1),
            )
            .await?;
        let profile: UserProfile = decode_all::<UserProfile>(&matches)?
            .into_iter()
            .next()
            .ok_or(SessionError::UsernameNotFound)?;
        if profile.email.is_empty() {
            return Err(SessionError::AccountIncomplete);
        }

        self.state.send_modify(|s| s.loading = true);
        let grant = match self
            .backend
            .auth
            .sign_in(&profile.email, &form.password)
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                self.state.send_modify(|s| s.loading = false);
                return Err(e.into());
            }
        };

        self.establish(grant).await;
        tracing::info!(username = %username, "User signed in");
        Ok(Notice::info("Innlogging Vellykket!", "Velkommen tilbake!"))
    }

    /// Resume a session from a stored bearer token
    pub async fn restore(&self, token: &str) -> Result<(), SessionError> {
        self.state.send_modify(|s| s.loading = true);
        match self.backend.auth.verify_token(token).await {
            Ok(user) => {
                self.establish(AuthGrant {
                    user,
                    token: token.to_string(),
                })
                .await;
                Ok(())
            }
            Err(e) => {
                self.set_token(None);
                self.state.send_replace(SessionState::default());
                Err(e.into())
            }
        }
    }

    /// Adopt a principal and load their profile
    async fn establish(&self, grant: AuthGrant) {
        self.set_token(Some(grant.token));
        self.state.send_replace(SessionState {
            user: Some(grant.user.clone()),
            profile: None,
            loading: true,
            error: None,
        });

        let (profile, error) = match self.fetch_profile(&grant.user.uid).await {
            Ok(Some(profile)) => (Some(profile), None),
            Ok(None) => {
                tracing::warn!(uid = %grant.user.uid, "Signed in without a profile document");
                (None, Some(SessionError::ProfileMissing))
            }
            Err(e) => (None, Some(SessionError::ProfileUnavailable(e.to_string()))),
        };

        self.state.send_modify(|s| {
            s.profile = profile;
            s.error = error;
            s.loading = false;
        });
    }

    async fn fetch_profile(&self, uid: &str) -> Result<Option<UserProfile>, SessionError> {
        let path = format!("{}/{}", collections::USERS, uid);
        match self.backend.store.get(&path).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Re-read the profile document
    pub async fn refresh_profile(&self) -> Result<Option<UserProfile>, SessionError> {
        let user = self.require_user()?;
        match self.fetch_profile(&user.uid).await {
            Ok(profile) => {
                let error = profile.is_none().then_some(SessionError::ProfileMissing);
                self.state.send_modify(|s| {
                    s.profile = profile.clone();
                    s.error = error;
                });
                Ok(profile)
            }
            Err(e) => {
                self.state.send_modify(|s| {
                    s.error = Some(SessionError::ProfileUnavailable(e.to_string()));
                });
                Err(e)
            }
        }
    }

    /// Sign out and clear the state
    pub async fn logout(&self) -> Result<Notice, SessionError> {
        self.state.send_modify(|s| s.loading = true);
        if let Some(token) = self.token() {
            if let Err(e) = self.backend.auth.sign_out(&token).await {
                self.state.send_modify(|s| s.loading = false);
                return Err(e.into());
            }
        }

        self.set_token(None);
        self.state.send_replace(SessionState::default());
        Ok(Notice::info("Logget Ut", "Du har blitt logget ut."))
    }

    /// Validate and save the profile form, with an optional new avatar
    pub async fn update_profile(
        &self,
        form: &ProfileForm,
        avatar: Option<Upload>,
    ) -> Result<Notice, SessionError> {
        let (user, profile) = self.require_profile()?;
        let mut update = form.validate()?;

        if matches!(&form.username, Some(u) if *u != profile.username) {
            tracing::warn!(uid = %user.uid, "Ignoring attempt to change the login username");
        }
        if matches!(&form.email, Some(e) if *e != profile.email) {
            tracing::warn!(uid = %user.uid, "Ignoring attempt to change the credential address");
        }

        if let Some(avatar) = avatar {
            let path = format!("avatars/{}/{}", user.uid, avatar.safe_filename());
            let url = self
                .backend
                .blobs
                .upload(&path, avatar.data, avatar.content_type.as_deref())
                .await?;
            update.avatar_url = Some(url);
        }

        let path = format!("{}/{}", collections::USERS, user.uid);
        self.backend.store.merge(&path, to_fields(&update)?).await?;

        self.state.send_modify(|s| {
            if let Some(current) = s.profile.as_mut() {
                apply_update(current, &update);
            }
        });

        tracing::info!(uid = %user.uid, "Profile updated");
        Ok(Notice::info("Profil Oppdatert!", "Endringene dine er lagret."))
    }

    /// Read and clear the onboarding flag
    pub fn take_onboarding_flag(&self) -> Result<bool, SessionError> {
        let raised = self.storage.get(ONBOARDING_KEY).as_deref() == Some("true");
        if raised {
            self.storage.remove(ONBOARDING_KEY)?;
        }
        Ok(raised)
    }
}

fn apply_update(profile: &mut UserProfile, update: &crate::model::ProfileUpdate) {
    if let Some(name) = &update.name {
        profile.name = name.clone();
    }
    if let Some(bio) = &update.bio {
        profile.bio = bio.clone();
    }
    if let Some(url) = &update.avatar_url {
        profile.avatar_url = url.clone();
    }
    if let Some(target) = update.target_baths {
        profile.target_baths = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AuthErrorCode;
    use crate::local_storage::MemoryLocalStorage;
    use tempfile::{tempdir, TempDir};

    fn session() -> (Session, TempDir) {
        let dir = tempdir().unwrap();
        let backend = Backend::in_memory(dir.path()).unwrap();
        (
            Session::new(backend, Arc::new(MemoryLocalStorage::new())),
            dir,
        )
    }

    fn signup(username: &str, target: i64) -> SignupForm {
        SignupForm {
            username: username.to_string(),
            password: "hemmelig".to_string(),
            confirm_password: "hemmelig".to_string(),
            target_baths: target,
        }
    }

    fn login(username: &str, password: &str) -> LoginForm {
        LoginForm {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile() {
        let (session, _dir) = session();

        let notice = session.sign_up(&signup("anna", 30)).await.unwrap();
        assert_eq!(notice.title, "Registrering Vellykket!");

        let state = session.snapshot();
        let profile = state.profile.unwrap();
        assert_eq!(profile.username, "anna");
        assert_eq!(profile.name, "anna");
        assert_eq!(profile.email, "anna@badekompis.app");
        assert_eq!(profile.target_baths, 30);
        assert_eq!(profile.current_baths, 0);
        assert!(state.error.is_none());
        assert!(session.token().is_some());

        let stored = session
            .backend()
            .store
            .get(&format!("users/{}", profile.uid))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.data["currentBaths"], 0);

        assert!(session.take_onboarding_flag().unwrap());
        assert!(!session.take_onboarding_flag().unwrap());
    }

    #[tokio::test]
    async fn test_sign_up_rejects_taken_username() {
        let (session, _dir) = session();
        session.sign_up(&signup("anna", 30)).await.unwrap();
        session.logout().await.unwrap();

        let err = session.sign_up(&signup("anna", 10)).await.unwrap_err();
        assert_eq!(err, SessionError::UsernameTaken);
        assert!(session.current_user().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_validation_happens_first() {
        let (session, _dir) = session();
        let mut form = signup("anna", 30);
        form.confirm_password = "annet".to_string();

        let err = session.sign_up(&form).await.unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
        assert_eq!(err.user_message(), "Passordene stemmer ikke overens.");
    }

    #[tokio::test]
    async fn test_sign_in_by_username() {
        let (session, _dir) = session();
        session.sign_up(&signup("Anna", 30)).await.unwrap();
        session.logout().await.unwrap();

        let err = session.sign_in(&login("per", "hemmelig")).await.unwrap_err();
        assert_eq!(err, SessionError::UsernameNotFound);

        let err = session.sign_in(&login("Anna", "feil")).await.unwrap_err();
        match &err {
            SessionError::Auth(auth) => assert_eq!(auth.code, AuthErrorCode::InvalidCredential),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.user_message(), "Feil passord. Vennligst prøv igjen.");

        let notice = session.sign_in(&login(" Anna ", "hemmelig")).await.unwrap();
        assert_eq!(notice.description, "Velkommen tilbake!");
        let state = session.snapshot();
        assert_eq!(state.profile.unwrap().username, "Anna");
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_profile_missing_is_distinct_state() {
        let (session, _dir) = session();
        let grant = session
            .backend()
            .auth
            .create_user("ghost@badekompis.app", "hemmelig")
            .await
            .unwrap();

        session.restore(&grant.token).await.unwrap();

        let state = session.snapshot();
        assert_eq!(state.user.as_ref().map(|u| u.uid.as_str()), Some(grant.user.uid.as_str()));
        assert!(state.profile.is_none());
        assert_eq!(state.error, Some(SessionError::ProfileMissing));
        assert!(matches!(
            session.require_profile(),
            Err(SessionError::ProfileMissing)
        ));
    }

    #[tokio::test]
    async fn test_restore_with_revoked_token() {
        let (session, _dir) = session();
        let err = session.restore("nope").await.unwrap_err();
        assert!(matches!(err, SessionError::Auth(_)));
        assert_eq!(session.snapshot(), SessionState::default());
    }

    #[tokio::test]
    async fn test_logout_clears_state() {
        let (session, _dir) = session();
        session.sign_up(&signup("anna", 30)).await.unwrap();
        let token = session.token().unwrap();

        let notice = session.logout().await.unwrap();
        assert_eq!(notice, Notice::info("Logget Ut", "Du har blitt logget ut."));
        assert_eq!(session.snapshot(), SessionState::default());
        assert!(session.backend().auth.verify_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_update_profile_with_avatar() {
        let (session, dir) = session();
        session.sign_up(&signup("anna", 30)).await.unwrap();
        let uid = session.current_user().unwrap().uid;

        let form = ProfileForm {
            name: "Anna Bader".into(),
            bio: Some("Kaldt er best".into()),
            target_baths: 100,
            username: Some("hacker".into()),
            email: None,
        };
        let avatar = Upload::new("meg selv.png", vec![1, 2, 3]).with_content_type("image/png");
        session.update_profile(&form, Some(avatar)).await.unwrap();

        let profile = session.snapshot().profile.unwrap();
        assert_eq!(profile.name, "Anna Bader");
        assert_eq!(profile.username, "anna");
        assert_eq!(profile.target_baths, 100);
        assert_eq!(profile.avatar_url, format!("/media/avatars/{}/meg_selv.png", uid));
        assert!(dir.path().join(format!("avatars/{}/meg_selv.png", uid)).exists());

        let stored: UserProfile = session
            .backend()
            .store
            .get(&format!("users/{}", uid))
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(stored, profile);
    }

    #[tokio::test]
    async fn test_update_profile_requires_sign_in() {
        let (session, _dir) = session();
        let form = ProfileForm {
            name: "Anna".into(),
            target_baths: 10,
            ..Default::default()
        };
        assert_eq!(
            session.update_profile(&form, None).await.unwrap_err(),
            SessionError::NotSignedIn
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let (session, _dir) = session();
        let mut rx = session.subscribe();
        assert!(!rx.borrow().is_signed_in());

        session.sign_up(&signup("anna", 30)).await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_signed_in());
    }
}
