//! SoloParentLove Client Library
//!
//! Client core for a dating app for single parents: authentication and
//! session state, profile management, the swipe-based discovery feed,
//! match observation, live messaging, and search. All persistence, auth,
//! and realtime delivery are delegated to a hosted Supabase-style backend;
//! every operation here is a passthrough query, mutation, or subscription
//! against it.

pub mod auth;
pub mod chat;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod matches;
pub mod models;
pub mod postgrest;
pub mod profiles;
pub mod realtime;
pub mod routes;
pub mod session;
pub mod storage;

use reqwest::Client;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Auth;
use crate::chat::ConversationChannel;
use crate::config::ClientOptions;
use crate::discovery::DiscoveryFeed;
use crate::error::Error;
use crate::matches::MatchesClient;
use crate::models::Profile;
use crate::postgrest::PostgrestClient;
use crate::profiles::ProfileStore;
use crate::realtime::RealtimeClient;
use crate::session::SessionManager;
use crate::storage::StorageClient;

/// The main entry point for the SoloParentLove client
pub struct AppClient {
    /// The base URL for the backend project
    pub url: String,
    /// The anonymous API key for the backend project
    pub key: String,
    /// HTTP client used for requests
    pub http_client: Client,
    /// Client options
    pub options: ClientOptions,
    auth: Arc<Auth>,
    realtime: Arc<RealtimeClient>,
}

impl AppClient {
    /// Create a new client with default options
    ///
    /// # Example
    ///
    /// ```no_run
    /// use soloparentlove_client::AppClient;
    ///
    /// let app = AppClient::new("https://your-project.supabase.co", "your-anon-key").unwrap();
    /// ```
    pub fn new(url: &str, key: &str) -> Result<Self, Error> {
        Self::new_with_options(url, key, ClientOptions::default())
    }

    /// Create a new client with custom options
    pub fn new_with_options(url: &str, key: &str, options: ClientOptions) -> Result<Self, Error> {
        if key.is_empty() {
            return Err(Error::config("anon key cannot be empty"));
        }
        url::Url::parse(url)?;

        let mut builder = Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        let auth = Arc::new(Auth::new(url, key, http_client.clone()));
        let realtime_url = options.realtime_url.as_deref().unwrap_or(url);
        let realtime = Arc::new(RealtimeClient::new_with_options(
            realtime_url,
            key,
            options.realtime.clone(),
        ));

        Ok(Self {
            url: url.to_string(),
            key: key.to_string(),
            http_client,
            options,
            auth,
            realtime,
        })
    }

    /// Create a client from the `SUPABASE_URL` and `SUPABASE_ANON_KEY`
    /// environment variables
    pub fn from_env() -> Result<Self, Error> {
        let url = std::env::var("SUPABASE_URL")
            .map_err(|_| Error::config("SUPABASE_URL environment variable not found"))?;
        let key = std::env::var("SUPABASE_ANON_KEY")
            .map_err(|_| Error::config("SUPABASE_ANON_KEY environment variable not found"))?;
        Self::new(&url, &key)
    }

    /// The auth client for sign-up, sign-in, and session state
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// The realtime client for the change feed
    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    /// Low-level query builder for a table, carrying the current access
    /// token if someone is signed in
    pub fn from(&self, table: &str) -> PostgrestClient {
        let query = PostgrestClient::new(&self.url, &self.key, table, self.http_client.clone());
        match self.auth.access_token() {
            Some(token) => query.auth(&token),
            None => query,
        }
    }

    /// Storage client for file operations
    pub fn storage(&self) -> StorageClient {
        StorageClient::new(&self.url, &self.key, self.http_client.clone())
    }

    /// Store for profile rows and photos
    pub fn profiles(&self) -> ProfileStore {
        ProfileStore::new(
            &self.url,
            &self.key,
            self.http_client.clone(),
            self.auth.clone(),
            self.options.avatars_bucket.clone(),
        )
    }

    /// Client for match rows and the joined match RPC
    pub fn matches(&self) -> MatchesClient {
        MatchesClient::new(&self.url, &self.key, self.http_client.clone(), self.auth.clone())
    }

    /// Session manager holding the current identity and profile.
    /// Call [`SessionManager::init`] before reading from it.
    pub fn session_manager(&self) -> SessionManager {
        SessionManager::new(self.auth.clone(), Arc::new(self.profiles()))
    }

    /// Discovery feed for the given (complete) profile
    pub fn discovery(&self, profile: &Profile) -> Result<DiscoveryFeed, Error> {
        DiscoveryFeed::new(
            &self.url,
            &self.key,
            self.http_client.clone(),
            self.auth.clone(),
            profile,
            self.options.discovery_batch_size,
        )
    }

    /// Open the conversation for a match as the signed-in user.
    ///
    /// Fails with a not-found error when the match cannot be resolved.
    pub async fn open_conversation(&self, match_id: Uuid) -> Result<ConversationChannel, Error> {
        let session = self
            .auth
            .get_session()
            .ok_or_else(|| Error::auth("Not logged in"))?;

        // The live feed authenticates with the same token as the queries
        self.realtime
            .set_auth(Some(session.access_token.clone()))
            .await;

        ConversationChannel::open(
            &self.url,
            &self.key,
            self.http_client.clone(),
            self.auth.clone(),
            &self.realtime,
            session.user.id,
            match_id,
        )
        .await
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::config::ClientOptions;
    pub use crate::error::Error;
    pub use crate::models::{Gender, Message, Profile, ProfileUpdate, Verdict};
    pub use crate::AppClient;
}
