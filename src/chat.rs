//! Conversation channel for one match: the full message history plus a
//! live view of new messages, merged into one ordered, duplicate-free
//! sequence.
//!
//! History load and live delivery are independent asynchronous sources
//! with no ordering guarantee between them, so the in-memory view keys
//! every message by id and keeps itself sorted; a message arriving through
//! both paths renders once.

use reqwest::Client;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::Auth;
use crate::error::Error;
use crate::matches::MatchesClient;
use crate::models::{Message, NewMessage, Profile};
use crate::postgrest::{PostgrestClient, SortOrder};
use crate::realtime::{RealtimeClient, Subscription};

/// Ordered, id-deduplicated set of messages
#[derive(Debug, Default)]
pub struct ConversationView {
    messages: Vec<Message>,
    seen: HashSet<Uuid>,
}

impl ConversationView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message unless its id is already present, keeping the
    /// view sorted by (created_at, id). Returns whether it was inserted.
    pub fn insert(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        let key = message.sort_key();
        let index = self.messages.partition_point(|m| m.sort_key() <= key);
        self.messages.insert(index, message);
        true
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A live conversation with the other participant of one match.
///
/// Constructed via [`ConversationChannel::open`]; sequence is explicit:
/// the match is resolved first, then the live subscription opens, then
/// history loads into the same view the subscription appends to.
pub struct ConversationChannel {
    url: String,
    key: String,
    client: Client,
    auth: Arc<Auth>,

    match_id: Uuid,
    self_id: Uuid,
    other: Profile,

    view: Arc<Mutex<ConversationView>>,
    subscription: Option<Subscription>,
    pump: Option<JoinHandle<()>>,
}

impl ConversationChannel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn open(
        url: &str,
        key: &str,
        client: Client,
        auth: Arc<Auth>,
        realtime: &RealtimeClient,
        self_id: Uuid,
        match_id: Uuid,
    ) -> Result<Self, Error> {
        // 1. Resolve the match; missing row is the terminal not-found state
        let matches = MatchesClient::new(url, key, client.clone(), auth.clone());
        let detail = matches.get_detail(match_id).await?;
        let other = detail.other_participant(self_id)?.clone();

        let view = Arc::new(Mutex::new(ConversationView::new()));

        // 2. Open the live subscription before loading history so nothing
        // inserted in between can fall through the gap; the deduplicating
        // view absorbs the overlap
        let (tx, mut rx) = mpsc::channel::<Message>(64);
        let other_id = other.id;
        let subscription = realtime
            .subscribe_inserts("messages", move |record| {
                // The feed is global to the table; keep only this pair
                match serde_json::from_value::<Message>(record.clone()) {
                    Ok(message) if message.involves_pair(self_id, other_id) => {
                        if tx.try_send(message).is_err() {
                            log::warn!("conversation event buffer full, dropping delivery");
                        }
                    }
                    Ok(_) => {}
                    Err(err) => log::debug!("ignoring unparseable message event: {}", err),
                }
            })
            .await?;

        let pump_view = view.clone();
        let pump = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                pump_view.lock().unwrap().insert(message);
            }
        });

        let channel = Self {
            url: url.to_string(),
            key: key.to_string(),
            client,
            auth,
            match_id,
            self_id,
            other,
            view,
            subscription: Some(subscription),
            pump: Some(pump),
        };

        // 3. Load history into the same view
        let history = channel.load_history().await?;
        {
            let mut view = channel.view.lock().unwrap();
            for message in history {
                view.insert(message);
            }
        }

        Ok(channel)
    }

    fn messages_table(&self) -> PostgrestClient {
        let query = PostgrestClient::new(&self.url, &self.key, "messages", self.client.clone());
        match self.auth.access_token() {
            Some(token) => query.auth(&token),
            None => query,
        }
    }

    async fn load_history(&self) -> Result<Vec<Message>, Error> {
        let pair = format!(
            "and(sender_id.eq.{self_id},receiver_id.eq.{other_id}),and(sender_id.eq.{other_id},receiver_id.eq.{self_id})",
            self_id = self.self_id,
            other_id = self.other.id,
        );

        self.messages_table()
            .or(&pair)
            .order("created_at", SortOrder::Ascending)
            .order("id", SortOrder::Ascending)
            .execute::<Message>()
            .await
    }

    /// The resolved other participant
    pub fn other(&self) -> &Profile {
        &self.other
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    /// Snapshot of the ordered conversation
    pub fn messages(&self) -> Vec<Message> {
        self.view.lock().unwrap().messages().to_vec()
    }

    /// Send a message to the other participant. Blank bodies are rejected
    /// locally without touching the backend.
    ///
    /// The message is not appended to the local view here; the
    /// authoritative copy arrives through the live subscription.
    pub async fn send(&self, body: &str) -> Result<(), Error> {
        let body = body.trim();
        if body.is_empty() {
            return Err(Error::general("message body is empty"));
        }

        let message = NewMessage {
            sender_id: self.self_id,
            receiver_id: self.other.id,
            message: body.to_string(),
        };

        self.messages_table().insert(&message).await
    }

    /// Release the live subscription and stop applying events. After this
    /// returns, a stale event can no longer mutate the view.
    pub async fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe().await;
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl Drop for ConversationChannel {
    fn drop(&mut self) {
        // Subscription cleanup happens in its own Drop; stop the pump here
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn message(id_byte: u8, seconds: i64) -> Message {
        let mut bytes = [0u8; 16];
        bytes[15] = id_byte;
        Message {
            id: Uuid::from_bytes(bytes),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            message: format!("m{}", id_byte),
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
                + ChronoDuration::seconds(seconds),
        }
    }

    #[test]
    fn view_stays_sorted_under_any_interleaving() {
        let mut view = ConversationView::new();
        view.insert(message(3, 30));
        view.insert(message(1, 10));
        view.insert(message(4, 40));
        view.insert(message(2, 20));

        let times: Vec<_> = view.messages().iter().map(|m| m.created_at).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn duplicate_ids_render_once() {
        let mut view = ConversationView::new();
        let m = message(7, 70);
        assert!(view.insert(m.clone()));
        assert!(!view.insert(m));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let mut view = ConversationView::new();
        view.insert(message(2, 50));
        view.insert(message(1, 50));

        let ids: Vec<_> = view.messages().iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn pump_applies_live_messages_and_stops_after_abort() {
        let view = Arc::new(Mutex::new(ConversationView::new()));
        let (tx, mut rx) = mpsc::channel::<Message>(8);

        let pump_view = view.clone();
        let pump = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                pump_view.lock().unwrap().insert(message);
            }
        });

        tx.send(message(1, 1)).await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(view.lock().unwrap().len(), 1);

        pump.abort();
        let _ = pump.await;

        // Events after close never reach the view
        let _ = tx.send(message(2, 2)).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(view.lock().unwrap().len(), 1);
    }
}
