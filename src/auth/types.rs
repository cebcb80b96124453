//! Types for authentication and session management

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// ユーザー情報
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// The user ID (the `auth.users` primary key)
    pub id: Uuid,

    /// The user's email address
    pub email: Option<String>,

    /// Backend-managed metadata; roles live here
    #[serde(default)]
    pub app_metadata: HashMap<String, serde_json::Value>,

    /// User-managed metadata
    #[serde(default)]
    pub user_metadata: HashMap<String, serde_json::Value>,

    /// Whether the email has been confirmed
    pub email_confirmed_at: Option<String>,

    /// The creation time
    pub created_at: Option<String>,
}

impl User {
    /// Whether the backend granted this user the admin role.
    ///
    /// The claim is issued and enforced server-side; reading it here only
    /// decides client-side routing, never access.
    pub fn is_admin(&self) -> bool {
        self.app_metadata
            .get("role")
            .and_then(|v| v.as_str())
            .map(|role| role == "admin")
            .unwrap_or(false)
    }
}

/// セッション情報
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub expires_at: Option<i64>,
    pub user: User,
}

/// Claims the client reads out of its own access token. The signature is
/// not verified here: the backend rejects a forged token on every call, so
/// the decoded claims only inform local scheduling.
#[derive(Debug, Deserialize)]
pub(crate) struct AccessTokenClaims {
    pub exp: i64,
}

impl Session {
    /// The unix timestamp at which the access token expires
    pub fn expiry(&self) -> Option<i64> {
        if self.expires_at.is_some() {
            return self.expires_at;
        }

        // Fall back to the exp claim inside the JWT itself
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        jsonwebtoken::decode::<AccessTokenClaims>(
            &self.access_token,
            &jsonwebtoken::DecodingKey::from_secret(&[]),
            &validation,
        )
        .ok()
        .map(|data| data.claims.exp)
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        match self.expiry() {
            Some(expires_at) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64;
                now >= expires_at
            }
            None => false,
        }
    }
}

/// Authentication response from signup. Depending on the confirmation
/// settings the service answers with a nested session, a flat token grant,
/// or (until the email is confirmed) no session at all.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub user: Option<User>,

    pub session: Option<Session>,

    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,

    /// Any error that occurred
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl AuthResponse {
    /// The session carried by this response, whichever shape it came in
    pub fn resolved_session(&self) -> Option<Session> {
        if let Some(session) = &self.session {
            return Some(session.clone());
        }
        match (&self.access_token, &self.refresh_token, &self.user) {
            (Some(access_token), Some(refresh_token), Some(user)) => Some(Session {
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
                token_type: self.token_type.clone().unwrap_or_else(|| "bearer".to_string()),
                expires_in: self.expires_in.unwrap_or(0),
                expires_at: None,
                user: user.clone(),
            }),
            _ => None,
        }
    }
}

/// サインイン認証情報
#[derive(Debug, Serialize)]
pub struct SignInCredentials {
    pub email: String,
    pub password: String,
}

/// メール確認設定
#[derive(Debug, Clone, Serialize, Default)]
pub struct EmailConfirmOptions {
    pub redirect_to: Option<String>,
}

/// A session lifecycle event broadcast to listeners
#[derive(Debug, Clone)]
pub enum AuthChange {
    SignedIn(Box<Session>),
    SignedOut,
    TokenRefreshed(Box<Session>),
}

impl AuthChange {
    /// The session attached to the event, if any
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(session) | Self::TokenRefreshed(session) => Some(session),
            Self::SignedOut => None,
        }
    }
}
