//! Session/identity cache: the one place the rest of the app reads
//! "who is signed in and what does their profile say" from.

use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::{Auth, AuthChange, User};
use crate::error::Error;
use crate::models::Profile;
use crate::profiles::ProfileStore;

/// Point-in-time copy of the session state.
///
/// `loading` starts true and flips false exactly once, after the first
/// resolution attempt finishes — consumers must not assume an identity is
/// absent (or present) until then.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl SessionSnapshot {
    /// The signed-in user's id, once resolved
    pub fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.id)
    }

    /// Whether the signed-in user still has to finish profile setup
    pub fn needs_setup(&self) -> bool {
        self.user.is_some()
            && !self
                .profile
                .as_ref()
                .map(Profile::is_complete)
                .unwrap_or(false)
    }
}

/// Explicitly constructed session manager, injected into components that
/// need the current identity. Owns a listener on the auth broadcast for
/// its whole lifetime; `close` (or drop) tears the listener down.
pub struct SessionManager {
    auth: Arc<Auth>,
    profiles: Arc<ProfileStore>,
    state: Arc<RwLock<SessionSnapshot>>,
    listener: Option<JoinHandle<()>>,
}

impl SessionManager {
    pub(crate) fn new(auth: Arc<Auth>, profiles: Arc<ProfileStore>) -> Self {
        Self {
            auth,
            profiles,
            state: Arc::new(RwLock::new(SessionSnapshot {
                user: None,
                profile: None,
                loading: true,
            })),
            listener: None,
        }
    }

    /// Resolve the current identity and profile, then keep following the
    /// auth broadcast until closed
    pub async fn init(&mut self) {
        match self.auth.get_session() {
            Some(session) => {
                let profile = Self::load_profile(&self.profiles, session.user.id).await;
                let mut state = self.state.write().unwrap();
                state.user = Some(session.user);
                state.profile = profile;
                state.loading = false;
            }
            None => {
                let mut state = self.state.write().unwrap();
                state.loading = false;
            }
        }

        let mut rx = self.auth.on_change();
        let state = self.state.clone();
        let profiles = self.profiles.clone();
        self.listener = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(AuthChange::SignedIn(session)) => {
                        let profile = Self::load_profile(&profiles, session.user.id).await;
                        let mut state = state.write().unwrap();
                        state.user = Some(session.user);
                        state.profile = profile;
                        state.loading = false;
                    }
                    Ok(AuthChange::TokenRefreshed(session)) => {
                        let mut state = state.write().unwrap();
                        state.user = Some(session.user);
                        state.loading = false;
                    }
                    Ok(AuthChange::SignedOut) => {
                        let mut state = state.write().unwrap();
                        state.user = None;
                        state.profile = None;
                        state.loading = false;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("session listener lagged, missed {} auth events", missed);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    /// A profile fetch that never fails the session: a missing row is a
    /// fresh signup, anything else is logged and degrades to "needs setup"
    async fn load_profile(profiles: &ProfileStore, user_id: Uuid) -> Option<Profile> {
        match profiles.get(user_id).await {
            Ok(profile) => profile,
            Err(err) => {
                log::error!("profile fetch for {} failed: {}", user_id, err);
                None
            }
        }
    }

    /// Current state, cheap to call from anywhere
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.read().unwrap().clone()
    }

    /// Re-fetch the signed-in user's profile (after a profile save)
    pub async fn reload_profile(&self) -> Result<(), Error> {
        let user_id = {
            let state = self.state.read().unwrap();
            match state.user.as_ref() {
                Some(user) => user.id,
                None => return Err(Error::auth("Not logged in")),
            }
        };

        let profile = self.profiles.get(user_id).await?;
        let mut state = self.state.write().unwrap();
        state.profile = profile;
        Ok(())
    }

    /// Clear local state and revoke the remote session. Local state is
    /// cleared even when revocation fails.
    pub async fn logout(&self) {
        if let Err(err) = self.auth.sign_out().await {
            log::warn!("logout: {}", err);
        }
        let mut state = self.state.write().unwrap();
        state.user = None;
        state.profile = None;
        state.loading = false;
    }

    /// Stop following auth changes
    pub fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close();
    }
}
