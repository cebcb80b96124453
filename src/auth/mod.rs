//! Authentication and session lifecycle against the hosted auth service

mod types;

use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::error::Error;
use crate::fetch::Fetch;

pub use types::*;

/// Client for the hosted authentication service.
///
/// Holds the current session and broadcasts every lifecycle change
/// (sign-in, sign-out, token refresh) so long-lived components can stay
/// synchronized without polling.
pub struct Auth {
    /// The base URL for the backend project
    url: String,

    /// The anonymous API key for the backend project
    key: String,

    /// HTTP client used for requests
    client: Client,

    /// The current session
    session: Arc<Mutex<Option<Session>>>,

    /// Session lifecycle broadcast
    changes: broadcast::Sender<AuthChange>,
}

impl Auth {
    /// Create a new Auth client
    pub(crate) fn new(url: &str, key: &str, client: Client) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            url: url.to_string(),
            key: key.to_string(),
            client,
            session: Arc::new(Mutex::new(None)),
            changes,
        }
    }

    fn get_auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.url, path)
    }

    fn store_session(&self, session: &Session) {
        let mut current_session = self.session.lock().unwrap();
        *current_session = Some(session.clone());
    }

    fn notify(&self, change: AuthChange) {
        // Ignore send errors if nobody is listening yet
        let _ = self.changes.send(change);
    }

    /// Sign up a new user with email and password
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, Error> {
        self.sign_up_with_options(email, password, EmailConfirmOptions::default())
            .await
    }

    /// Sign up a new user, directing the confirmation email link to
    /// `options.redirect_to`
    pub async fn sign_up_with_options(
        &self,
        email: &str,
        password: &str,
        options: EmailConfirmOptions,
    ) -> Result<AuthResponse, Error> {
        let url = self.get_auth_url("/signup");

        let mut body = HashMap::new();
        body.insert("email".to_string(), email.to_string());
        body.insert("password".to_string(), password.to_string());

        let mut fetch = Fetch::post(&self.client, &url).api_key(&self.key);
        if let Some(redirect_to) = &options.redirect_to {
            fetch = fetch.query(vec![("redirect_to".to_string(), redirect_to.clone())]);
        }

        let result = fetch.json(&body)?.execute::<AuthResponse>().await?;

        // Email confirmation flows return no session yet
        if let Some(session) = result.resolved_session() {
            self.store_session(&session);
            self.notify(AuthChange::SignedIn(Box::new(session)));
        }

        Ok(result)
    }

    /// Sign in a user with email and password
    pub async fn sign_in_with_password(
        &self,
        credentials: SignInCredentials,
    ) -> Result<Session, Error> {
        let url = self.get_auth_url("/token?grant_type=password");

        let session = Fetch::post(&self.client, &url)
            .api_key(&self.key)
            .json(&credentials)?
            .execute::<Session>()
            .await?;

        self.store_session(&session);
        self.notify(AuthChange::SignedIn(Box::new(session.clone())));

        Ok(session)
    }

    /// Exchange the refresh token for a fresh access token
    pub async fn refresh_session(&self) -> Result<Session, Error> {
        let url = self.get_auth_url("/token?grant_type=refresh_token");

        let refresh_token = {
            let current_session = self.session.lock().unwrap();
            match *current_session {
                Some(ref session) => session.refresh_token.clone(),
                None => return Err(Error::auth("Not logged in")),
            }
        };

        let mut body = HashMap::new();
        body.insert("refresh_token".to_string(), refresh_token);

        let session = Fetch::post(&self.client, &url)
            .api_key(&self.key)
            .json(&body)?
            .execute::<Session>()
            .await?;

        self.store_session(&session);
        self.notify(AuthChange::TokenRefreshed(Box::new(session.clone())));

        Ok(session)
    }

    /// Sign out the current user.
    ///
    /// Local state is cleared even when the remote revocation fails — a
    /// dead network must not leave the app signed in.
    pub async fn sign_out(&self) -> Result<(), Error> {
        let url = self.get_auth_url("/logout");

        let token = {
            let current_session = self.session.lock().unwrap();
            match *current_session {
                Some(ref session) => session.access_token.clone(),
                None => return Err(Error::auth("Not logged in")),
            }
        };

        let result = Fetch::post(&self.client, &url)
            .api_key(&self.key)
            .bearer_auth(&token)
            .execute_raw()
            .await;

        {
            let mut current_session = self.session.lock().unwrap();
            *current_session = None;
        }
        self.notify(AuthChange::SignedOut);

        if let Err(err) = result {
            log::warn!("remote sign-out failed, local session cleared anyway: {}", err);
        }

        Ok(())
    }

    /// Fetch the user record for the current access token
    pub async fn get_user(&self) -> Result<User, Error> {
        let url = self.get_auth_url("/user");

        let token = {
            let current_session = self.session.lock().unwrap();
            match *current_session {
                Some(ref session) => session.access_token.clone(),
                None => return Err(Error::auth("Not logged in")),
            }
        };

        let user = Fetch::get(&self.client, &url)
            .api_key(&self.key)
            .bearer_auth(&token)
            .execute::<User>()
            .await?;

        Ok(user)
    }

    /// Get the current session
    pub fn get_session(&self) -> Option<Session> {
        let current_session = self.session.lock().unwrap();
        current_session.clone()
    }

    /// The current access token, if signed in
    pub fn access_token(&self) -> Option<String> {
        let current_session = self.session.lock().unwrap();
        current_session.as_ref().map(|s| s.access_token.clone())
    }

    /// Adopt a session restored from app-level storage
    pub fn set_session(&self, session: Session) {
        self.store_session(&session);
        self.notify(AuthChange::SignedIn(Box::new(session)));
    }

    /// Subscribe to session lifecycle events
    pub fn on_change(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }
}
