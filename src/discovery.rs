//! Discovery feed: a deduplicated queue of candidate profiles and a
//! cursor the user swipes through.
//!
//! Decision writes never block the swiping experience. Each verdict is
//! handed to a bounded background queue whose worker retries with backoff;
//! the cursor advances immediately and unconditionally once a decision is
//! issued.

use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::Auth;
use crate::error::Error;
use crate::models::{Gender, NewLike, Profile, Verdict};
use crate::postgrest::PostgrestClient;

/// Pending decision writes the feed will hold before it starts dropping
const QUEUE_CAPACITY: usize = 64;
/// Attempts per decision write, backoff doubling from `RETRY_BASE`
const WRITE_ATTEMPTS: u32 = 5;
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(8);

enum DecisionJob {
    Record(NewLike),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Deserialize)]
struct SeenRow {
    liked_user_id: Uuid,
}

/// The discovery feed for one signed-in, completed profile
pub struct DiscoveryFeed {
    url: String,
    key: String,
    client: Client,
    auth: Arc<Auth>,
    self_id: Uuid,
    own_gender: Option<Gender>,
    batch_size: u32,

    queue: Vec<Profile>,
    cursor: usize,
    last_error: Option<String>,

    decisions: mpsc::Sender<DecisionJob>,
    worker: JoinHandle<()>,
}

impl DiscoveryFeed {
    /// Build a feed for `profile`. An incomplete profile belongs in the
    /// setup flow, not here.
    pub(crate) fn new(
        url: &str,
        key: &str,
        client: Client,
        auth: Arc<Auth>,
        profile: &Profile,
        batch_size: u32,
    ) -> Result<Self, Error> {
        if !profile.is_complete() {
            return Err(Error::general(
                "profile is incomplete; finish setup before discovery",
            ));
        }

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = tokio::spawn(decision_worker(
            rx,
            url.to_string(),
            key.to_string(),
            client.clone(),
            auth.clone(),
        ));

        Ok(Self {
            url: url.to_string(),
            key: key.to_string(),
            client,
            auth,
            self_id: profile.id,
            own_gender: profile.gender,
            batch_size,
            queue: Vec::new(),
            cursor: 0,
            last_error: None,
            decisions: tx,
            worker,
        })
    }

    fn table(&self, table: &str) -> PostgrestClient {
        let query = PostgrestClient::new(&self.url, &self.key, table, self.client.clone());
        match self.auth.access_token() {
            Some(token) => query.auth(&token),
            None => query,
        }
    }

    /// Fetch a fresh candidate queue and reset the cursor.
    ///
    /// Candidates exclude the user themself, every previously decided
    /// target (either verdict), same-gender profiles, and profiles that
    /// never finished setup. Backend ordering is accepted as-is.
    ///
    /// On failure the previous queue and cursor are left untouched and the
    /// error is also kept on [`DiscoveryFeed::last_error`].
    pub async fn refresh(&mut self) -> Result<(), Error> {
        let seen = match self
            .table("likes")
            .select("liked_user_id")
            .eq("user_id", &self.self_id.to_string())
            .execute::<SeenRow>()
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };
        let seen_ids: Vec<String> = seen
            .iter()
            .map(|row| row.liked_user_id.to_string())
            .collect();

        let mut query = self
            .table("profiles")
            .not("id", &format!("eq.{}", self.self_id))
            .not_null("full_name");
        if !seen_ids.is_empty() {
            query = query.not_in("id", &seen_ids);
        }
        // Fixed heterosexual pairing assumption; not configurable
        if let Some(own_gender) = self.own_gender {
            query = query.neq("gender", &own_gender.to_string());
        }

        match query.limit(self.batch_size).execute::<Profile>().await {
            Ok(profiles) => {
                self.queue = profiles;
                self.cursor = 0;
                self.last_error = None;
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// The candidate the cursor points at, if any
    pub fn current(&self) -> Option<&Profile> {
        self.queue.get(self.cursor)
    }

    /// Zero-based cursor into the fetched queue
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether the queue has been swiped through
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.queue.len()
    }

    /// Candidates left to decide on
    pub fn remaining(&self) -> usize {
        self.queue.len().saturating_sub(self.cursor)
    }

    /// The last fetch failure, if the queue could not be refreshed
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record a verdict for the candidate at the cursor and advance by
    /// exactly one. A no-op when the queue is exhausted (or empty).
    ///
    /// The write itself is queued for the background worker; its outcome
    /// never moves the cursor back.
    pub fn record_decision(&mut self, verdict: Verdict) -> bool {
        let Some(candidate) = self.queue.get(self.cursor) else {
            return false;
        };

        let like = NewLike {
            user_id: self.self_id,
            liked_user_id: candidate.id,
            verdict,
        };
        if let Err(err) = self.decisions.try_send(DecisionJob::Record(like)) {
            // Queue full or worker gone; the swipe still goes through
            log::error!("dropping decision write: {}", err);
        }

        self.cursor += 1;
        true
    }

    /// Wait until every decision handed to the worker so far has been
    /// written (or given up on)
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.decisions.send(DecisionJob::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Drain pending decision writes and stop the worker
    pub async fn shutdown(self) {
        drop(self.decisions);
        let _ = self.worker.await;
    }
}

/// Background writer: retries each decision with exponential backoff, then
/// gives up loudly. Runs until the feed (and with it the sender) is gone.
async fn decision_worker(
    mut rx: mpsc::Receiver<DecisionJob>,
    url: String,
    key: String,
    client: Client,
    auth: Arc<Auth>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            DecisionJob::Record(like) => {
                let mut delay = RETRY_BASE;
                for attempt in 1..=WRITE_ATTEMPTS {
                    let query = PostgrestClient::new(&url, &key, "likes", client.clone());
                    let query = match auth.access_token() {
                        Some(token) => query.auth(&token),
                        None => query,
                    };

                    match query.insert(&like).await {
                        Ok(()) => break,
                        Err(err) if attempt == WRITE_ATTEMPTS => {
                            log::error!(
                                "giving up on decision {} -> {} after {} attempts: {}",
                                like.user_id,
                                like.liked_user_id,
                                WRITE_ATTEMPTS,
                                err
                            );
                        }
                        Err(err) => {
                            log::warn!(
                                "decision write attempt {} failed, retrying in {:?}: {}",
                                attempt,
                                delay,
                                err
                            );
                            tokio::time::sleep(delay).await;
                            delay = (delay * 2).min(RETRY_CAP);
                        }
                    }
                }
            }
            DecisionJob::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
