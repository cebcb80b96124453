//! Realtime client over the hosted change feed.
//!
//! The app consumes exactly one realtime shape: INSERT events on a table,
//! delivered over a Phoenix-framed WebSocket. Channels are keyed by topic
//! (`realtime:public:<table>`); any number of subscriptions can share a
//! topic, and events for topics nobody subscribes to are dropped.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;
use uuid::Uuid;

use crate::config::RealtimeOptions;
use crate::error::Error;

/// 接続状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// チャンネルイベント
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelEvent {
    #[serde(rename = "phx_join")]
    Join,
    #[serde(rename = "phx_leave")]
    Leave,
    #[serde(rename = "phx_reply")]
    Reply,
    #[serde(rename = "phx_error")]
    Error,
    #[serde(rename = "phx_close")]
    Close,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "postgres_changes")]
    PostgresChanges,
    #[serde(rename = "system")]
    System,
    /// Anything this client has no interest in (presence, broadcast, ...)
    Unknown,
}

// The feed carries event names this client never acts on; fold those into
// Unknown instead of failing the whole frame
impl<'de> Deserialize<'de> for ChannelEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(match name.as_str() {
            "phx_join" => Self::Join,
            "phx_leave" => Self::Leave,
            "phx_reply" => Self::Reply,
            "phx_error" => Self::Error,
            "phx_close" => Self::Close,
            "heartbeat" => Self::Heartbeat,
            "postgres_changes" => Self::PostgresChanges,
            "system" => Self::System,
            _ => Self::Unknown,
        })
    }
}

/// Represents a full message received or sent over the WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: ChannelEvent,
    pub payload: serde_json::Value,
    #[serde(rename = "ref")]
    pub message_ref: serde_json::Value,
}

impl RealtimeMessage {
    /// Pull the inserted row out of a `postgres_changes` payload.
    ///
    /// The record nests either under `data.record` or directly under
    /// `record` depending on the feed version; tolerate both.
    pub fn insert_record(&self) -> Option<&serde_json::Value> {
        let data = self.payload.get("data").unwrap_or(&self.payload);
        let event_type = data.get("type").and_then(|v| v.as_str());
        if event_type != Some("INSERT") {
            return None;
        }
        data.get("record")
    }
}

type InsertCallback = Box<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Everything the reader task needs to know about one joined topic
struct TopicState {
    join_payload: serde_json::Value,
    callbacks: HashMap<Uuid, InsertCallback>,
}

/// Realtimeクライアント本体
pub struct RealtimeClient {
    url: String,
    key: String,
    options: RealtimeOptions,
    next_ref: Arc<AtomicU32>,
    topics: Arc<RwLock<HashMap<String, TopicState>>>,
    socket: Arc<RwLock<Option<mpsc::Sender<WsMessage>>>>,
    state: Arc<RwLock<ConnectionState>>,
    state_change: broadcast::Sender<ConnectionState>,
    is_manually_closed: Arc<AtomicBool>,
    access_token: Arc<RwLock<Option<String>>>,
}

impl Clone for RealtimeClient {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            key: self.key.clone(),
            options: self.options.clone(),
            next_ref: self.next_ref.clone(),
            topics: self.topics.clone(),
            socket: self.socket.clone(),
            state: self.state.clone(),
            state_change: self.state_change.clone(),
            is_manually_closed: self.is_manually_closed.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

impl RealtimeClient {
    /// デフォルトオプションで新しいクライアントを作成
    pub fn new(url: &str, key: &str) -> Self {
        Self::new_with_options(url, key, RealtimeOptions::default())
    }

    /// カスタムオプションで新しいクライアントを作成
    pub fn new_with_options(url: &str, key: &str, options: RealtimeOptions) -> Self {
        let (state_change, _) = broadcast::channel(16);
        Self {
            url: url.to_string(),
            key: key.to_string(),
            options,
            next_ref: Arc::new(AtomicU32::new(1)),
            topics: Arc::new(RwLock::new(HashMap::new())),
            socket: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            state_change,
            is_manually_closed: Arc::new(AtomicBool::new(false)),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    /// 認証トークンを設定
    pub async fn set_auth(&self, token: Option<String>) {
        let mut current = self.access_token.write().await;
        *current = token;
    }

    /// 現在の接続状態を取得
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// 接続状態変更の通知を受け取るためのレシーバーを取得
    pub fn on_state_change(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_change.subscribe()
    }

    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    async fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write().await;
        if *current != state {
            debug!("realtime state {:?} -> {:?}", *current, state);
            *current = state;
            let _ = self.state_change.send(state);
        }
    }

    /// Subscribe to INSERT events on a table. The callback runs on the
    /// reader task for every inserted row; keep it cheap and non-blocking.
    pub async fn subscribe_inserts<F>(&self, table: &str, callback: F) -> Result<Subscription, Error>
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.ensure_connected().await?;

        let topic = format!("realtime:public:{}", table);
        let id = Uuid::new_v4();
        let join_message = {
            let mut topics = self.topics.write().await;
            match topics.get_mut(&topic) {
                Some(state) => {
                    // Topic already joined; just add the callback
                    state.callbacks.insert(id, Box::new(callback));
                    None
                }
                None => {
                    let join_payload = json!({
                        "config": {
                            "postgres_changes": [
                                { "event": "INSERT", "schema": "public", "table": table }
                            ]
                        }
                    });
                    let mut callbacks: HashMap<Uuid, InsertCallback> = HashMap::new();
                    callbacks.insert(id, Box::new(callback));
                    topics.insert(
                        topic.clone(),
                        TopicState {
                            join_payload: join_payload.clone(),
                            callbacks,
                        },
                    );
                    Some(json!({
                        "topic": topic,
                        "event": ChannelEvent::Join,
                        "payload": join_payload,
                        "ref": self.next_ref(),
                    }))
                }
            }
        };

        if let Some(message) = join_message {
            self.send_message(message).await?;
        }

        info!("subscribed to inserts on {} ({})", table, id);
        Ok(Subscription {
            inner: Some(SubscriptionParts {
                id,
                topic,
                topics: self.topics.clone(),
                socket: self.socket.clone(),
                next_ref: self.next_ref.clone(),
            }),
        })
    }

    /// Wait until the connection is up, starting the connection manager
    /// if nothing is running yet
    async fn ensure_connected(&self) -> Result<(), Error> {
        if *self.state.read().await == ConnectionState::Connected {
            return Ok(());
        }

        let mut rx = self.state_change.subscribe();

        if *self.state.read().await == ConnectionState::Disconnected {
            self.is_manually_closed.store(false, Ordering::SeqCst);
            let client = self.clone();
            tokio::spawn(async move { client.connection_loop().await });
        }

        let wait = timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Ok(ConnectionState::Connected) => break Ok(()),
                    Ok(_) => continue,
                    Err(_) => {
                        break Err(Error::realtime(
                            "state change receiver closed while waiting for connection",
                        ))
                    }
                }
            }
        })
        .await;

        match wait {
            Ok(result) => result,
            Err(_) => Err(Error::realtime("timeout waiting for realtime connection")),
        }
    }

    /// Connection manager: connect, pump, and reconnect with backoff until
    /// told to stop
    async fn connection_loop(self) {
        let mut attempts: u32 = 0;
        let mut interval = self.options.reconnect_interval;

        loop {
            if self.is_manually_closed.load(Ordering::SeqCst) {
                debug!("manual disconnect requested, stopping connection loop");
                break;
            }

            self.set_state(if attempts == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            })
            .await;

            match self.run_session().await {
                Ok(()) => {
                    // Clean session end; reset backoff before deciding
                    attempts = 0;
                    interval = self.options.reconnect_interval;
                }
                Err(err) => {
                    warn!("realtime session failed: {}", err);
                }
            }

            self.set_state(ConnectionState::Disconnected).await;

            if self.is_manually_closed.load(Ordering::SeqCst) || !self.options.auto_reconnect {
                break;
            }

            attempts += 1;
            if let Some(max) = self.options.max_reconnect_attempts {
                if attempts > max {
                    error!("max reconnect attempts ({}) reached, giving up", max);
                    break;
                }
            }

            // Full jitter on top of the exponential schedule
            let jitter = rand::thread_rng().gen_range(0..=interval / 4 + 1);
            debug!("reconnect attempt #{} in {}ms", attempts, interval + jitter);
            sleep(Duration::from_millis(interval + jitter)).await;
            interval = ((interval as f64 * self.options.reconnect_backoff_factor) as u64)
                .min(self.options.max_reconnect_interval);
        }
    }

    /// One WebSocket session: connect, rejoin topics, pump messages until
    /// the stream dies
    async fn run_session(&self) -> Result<(), Error> {
        let ws_url = self.websocket_url().await?;
        info!("connecting to realtime feed");

        let (ws_stream, _response) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| Error::realtime(format!("WebSocket connection failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();
        let (socket_tx, mut socket_rx) = mpsc::channel::<WsMessage>(100);
        *self.socket.write().await = Some(socket_tx);

        // Writer task: forward queued frames to the sink
        let writer = tokio::spawn(async move {
            while let Some(message) = socket_rx.recv().await {
                if let Err(e) = write.send(message).await {
                    error!("WebSocket send error: {}", e);
                    socket_rx.close();
                    break;
                }
            }
        });

        self.set_state(ConnectionState::Connected).await;
        self.rejoin_topics().await;

        let heartbeat = Duration::from_millis(self.options.heartbeat_interval);
        loop {
            tokio::select! {
                biased;

                msg = read.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => self.handle_frame(&text).await,
                        Some(Ok(msg)) if msg.is_close() => {
                            debug!("received close frame");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("WebSocket read error: {}", e);
                            break;
                        }
                        None => {
                            debug!("WebSocket stream closed by remote");
                            break;
                        }
                    }
                }

                _ = sleep(heartbeat) => {
                    let message = json!({
                        "topic": "phoenix",
                        "event": ChannelEvent::Heartbeat,
                        "payload": {},
                        "ref": self.next_ref(),
                    });
                    if self.send_message(message).await.is_err() {
                        warn!("heartbeat send failed, assuming connection lost");
                        break;
                    }
                }
            }
        }

        *self.socket.write().await = None;
        writer.abort();
        Ok(())
    }

    /// Route one incoming text frame
    async fn handle_frame(&self, text: &str) {
        let message: RealtimeMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("unparseable realtime frame: {} ({})", text, e);
                return;
            }
        };

        match message.event {
            ChannelEvent::PostgresChanges => {
                let Some(record) = message.insert_record() else {
                    trace!("change event without INSERT record on {}", message.topic);
                    return;
                };
                let topics = self.topics.read().await;
                if let Some(state) = topics.get(&message.topic) {
                    for callback in state.callbacks.values() {
                        callback(record);
                    }
                } else {
                    trace!("event for unsubscribed topic {}", message.topic);
                }
            }
            ChannelEvent::Reply => {
                trace!("reply on {}: {}", message.topic, message.payload);
            }
            ChannelEvent::Error => {
                warn!("channel error on {}: {}", message.topic, message.payload);
            }
            ChannelEvent::Close => {
                debug!("channel closed: {}", message.topic);
            }
            other => {
                trace!("ignoring {:?} on {}", other, message.topic);
            }
        }
    }

    /// Re-send phx_join for every live topic; used on connect and after
    /// every reconnect
    async fn rejoin_topics(&self) {
        let joins: Vec<serde_json::Value> = {
            let topics = self.topics.read().await;
            topics
                .iter()
                .map(|(topic, state)| {
                    json!({
                        "topic": topic,
                        "event": ChannelEvent::Join,
                        "payload": state.join_payload,
                        "ref": self.next_ref(),
                    })
                })
                .collect()
        };

        for message in joins {
            if let Err(e) = self.send_message(message).await {
                warn!("failed to rejoin topic: {}", e);
            }
        }
    }

    async fn send_message(&self, message: serde_json::Value) -> Result<(), Error> {
        let socket = self.socket.read().await;
        match socket.as_ref() {
            Some(tx) => tx
                .send(WsMessage::Text(message.to_string()))
                .await
                .map_err(|e| Error::realtime(format!("socket task gone: {}", e))),
            None => Err(Error::realtime("client socket unavailable")),
        }
    }

    async fn websocket_url(&self) -> Result<String, Error> {
        let base = Url::parse(&self.url)?;
        match base.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            s => return Err(Error::realtime(format!("unsupported URL scheme: {}", s))),
        }

        let endpoint = base.join("/realtime/v1/websocket")?;
        let mut ws_url = endpoint.to_string();
        if let Some(stripped) = ws_url.strip_prefix("http") {
            ws_url = format!("ws{}", stripped);
        }

        let token_param = {
            let token = self.access_token.read().await;
            token
                .as_ref()
                .map(|t| format!("&token={}", t))
                .unwrap_or_default()
        };

        Ok(format!(
            "{}?apikey={}&vsn=2.0.0{}",
            ws_url, self.key, token_param
        ))
    }

    /// 切断処理
    pub async fn disconnect(&self) {
        self.is_manually_closed.store(true, Ordering::SeqCst);

        let mut socket = self.socket.write().await;
        if let Some(tx) = socket.take() {
            let _ = tx.send(WsMessage::Close(None)).await;
        }
        drop(socket);

        self.set_state(ConnectionState::Disconnected).await;
    }
}

/// An active insert subscription. Unsubscribing (or dropping) removes the
/// callback; once `unsubscribe` returns, no further delivery can happen.
pub struct Subscription {
    inner: Option<SubscriptionParts>,
}

struct SubscriptionParts {
    id: Uuid,
    topic: String,
    topics: Arc<RwLock<HashMap<String, TopicState>>>,
    socket: Arc<RwLock<Option<mpsc::Sender<WsMessage>>>>,
    next_ref: Arc<AtomicU32>,
}

impl Subscription {
    /// Release the subscription and wait until the callback is detached
    pub async fn unsubscribe(mut self) {
        if let Some(parts) = self.inner.take() {
            parts.release().await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(parts) = self.inner.take() {
            tokio::spawn(async move {
                parts.release().await;
            });
        }
    }
}

impl SubscriptionParts {
    async fn release(self) {
        let mut topics = self.topics.write().await;
        let Some(state) = topics.get_mut(&self.topic) else {
            return;
        };
        state.callbacks.remove(&self.id);

        if state.callbacks.is_empty() {
            topics.remove(&self.topic);
            let message = json!({
                "topic": self.topic,
                "event": ChannelEvent::Leave,
                "payload": {},
                "ref": self.next_ref.fetch_add(1, Ordering::SeqCst).to_string(),
            });
            let socket = self.socket.read().await;
            if let Some(tx) = socket.as_ref() {
                let _ = tx.send(WsMessage::Text(message.to_string())).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_record_reads_nested_data_shape() {
        let message: RealtimeMessage = serde_json::from_str(
            r#"{
                "topic": "realtime:public:messages",
                "event": "postgres_changes",
                "payload": {
                    "data": {
                        "type": "INSERT",
                        "table": "messages",
                        "record": { "id": "abc", "message": "hello" }
                    }
                },
                "ref": null
            }"#,
        )
        .unwrap();

        let record = message.insert_record().unwrap();
        assert_eq!(record["message"], "hello");
    }

    #[test]
    fn non_insert_events_yield_no_record() {
        let message: RealtimeMessage = serde_json::from_str(
            r#"{
                "topic": "realtime:public:messages",
                "event": "postgres_changes",
                "payload": {
                    "data": { "type": "UPDATE", "record": { "id": "abc" } }
                },
                "ref": null
            }"#,
        )
        .unwrap();
        assert!(message.insert_record().is_none());
    }

    #[test]
    fn unknown_events_deserialize_without_error() {
        let message: RealtimeMessage = serde_json::from_str(
            r#"{"topic": "phoenix", "event": "presence_diff", "payload": {}, "ref": "1"}"#,
        )
        .unwrap();
        assert_eq!(message.event, ChannelEvent::Unknown);
    }

    #[tokio::test]
    async fn dispatch_skips_unsubscribed_topics() {
        let client = RealtimeClient::new("http://localhost:4000", "key");
        let frame = r#"{
            "topic": "realtime:public:likes",
            "event": "postgres_changes",
            "payload": { "data": { "type": "INSERT", "record": {} } },
            "ref": null
        }"#;
        // Nothing subscribed; must not panic or deliver anywhere
        client.handle_frame(frame).await;
    }

    #[tokio::test]
    async fn released_subscription_receives_nothing_further() {
        use std::sync::atomic::AtomicUsize;

        let client = RealtimeClient::new("http://localhost:4000", "key");
        let hits = Arc::new(AtomicUsize::new(0));

        // Register the callback directly; connection management is not
        // under test here
        let id = Uuid::new_v4();
        {
            let mut topics = client.topics.write().await;
            let mut callbacks: HashMap<Uuid, InsertCallback> = HashMap::new();
            let hits = hits.clone();
            callbacks.insert(
                id,
                Box::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
            topics.insert(
                "realtime:public:messages".to_string(),
                TopicState {
                    join_payload: json!({}),
                    callbacks,
                },
            );
        }

        let frame = r#"{
            "topic": "realtime:public:messages",
            "event": "postgres_changes",
            "payload": { "data": { "type": "INSERT", "record": { "id": 1 } } },
            "ref": null
        }"#;

        client.handle_frame(frame).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let subscription = Subscription {
            inner: Some(SubscriptionParts {
                id,
                topic: "realtime:public:messages".to_string(),
                topics: client.topics.clone(),
                socket: client.socket.clone(),
                next_ref: client.next_ref.clone(),
            }),
        };
        subscription.unsubscribe().await;

        client.handle_frame(frame).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
