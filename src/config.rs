//! Configuration options for the SoloParentLove client

use std::time::Duration;

/// Configuration options for the SoloParentLove client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The request timeout applied to every backend HTTP call
    pub request_timeout: Option<Duration>,

    /// The database schema
    pub db_schema: String,

    /// The storage bucket holding profile photos
    pub avatars_bucket: String,

    /// How many candidate profiles a discovery fetch asks for
    pub discovery_batch_size: u32,

    /// Separate base URL for the realtime feed; self-hosted deployments
    /// sometimes serve it from a different host than the REST endpoints
    pub realtime_url: Option<String>,

    /// Tuning for the realtime WebSocket connection
    pub realtime: RealtimeOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            db_schema: "public".to_string(),
            avatars_bucket: "avatars".to_string(),
            discovery_batch_size: 10,
            realtime_url: None,
            realtime: RealtimeOptions::default(),
        }
    }
}

impl ClientOptions {
    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the database schema
    pub fn with_db_schema(mut self, value: &str) -> Self {
        self.db_schema = value.to_string();
        self
    }

    /// Set the storage bucket for profile photos
    pub fn with_avatars_bucket(mut self, value: &str) -> Self {
        self.avatars_bucket = value.to_string();
        self
    }

    /// Set the discovery batch size
    pub fn with_discovery_batch_size(mut self, value: u32) -> Self {
        self.discovery_batch_size = value;
        self
    }

    /// Set a separate base URL for the realtime feed
    pub fn with_realtime_url(mut self, value: &str) -> Self {
        self.realtime_url = Some(value.to_string());
        self
    }

    /// Set the realtime connection options
    pub fn with_realtime(mut self, value: RealtimeOptions) -> Self {
        self.realtime = value;
        self
    }
}

/// RealtimeClient設定オプション
#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_interval: u64,
    pub reconnect_backoff_factor: f64,
    pub max_reconnect_interval: u64,
    pub heartbeat_interval: u64,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: None, // Infinite attempts
            reconnect_interval: 1000,     // 1 second
            reconnect_backoff_factor: 1.5,
            max_reconnect_interval: 30000, // 30 seconds
            heartbeat_interval: 30000,     // 30 seconds
        }
    }
}
