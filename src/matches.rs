//! Match lookups. Matches are created by the backend trigger on mutual
//! likes; this client only ever observes them.

use reqwest::Client;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Auth;
use crate::error::Error;
use crate::models::{MatchDetail, MatchSummary};
use crate::postgrest::{PostgrestClient, RpcBuilder};

/// Embeds both participant profiles through the match foreign keys
const MATCH_DETAIL_SELECT: &str =
    "*,user1:profiles!matches_user1_id_fkey(*),user2:profiles!matches_user2_id_fkey(*)";

/// Client for the `matches` table and its RPC
pub struct MatchesClient {
    url: String,
    key: String,
    client: Client,
    auth: Arc<Auth>,
}

impl MatchesClient {
    pub(crate) fn new(url: &str, key: &str, client: Client, auth: Arc<Auth>) -> Self {
        Self {
            url: url.to_string(),
            key: key.to_string(),
            client,
            auth,
        }
    }

    fn authed(&self, query: PostgrestClient) -> PostgrestClient {
        match self.auth.access_token() {
            Some(token) => query.auth(&token),
            None => query,
        }
    }

    /// Resolve one match with both participant profiles embedded.
    /// A missing row is a terminal not-found for the conversation flow.
    pub async fn get_detail(&self, match_id: Uuid) -> Result<MatchDetail, Error> {
        let query = PostgrestClient::new(&self.url, &self.key, "matches", self.client.clone());
        let detail = self
            .authed(query)
            .select(MATCH_DETAIL_SELECT)
            .eq("id", &match_id.to_string())
            .maybe_single::<MatchDetail>()
            .await?;

        detail.ok_or_else(|| Error::not_found(format!("match {}", match_id)))
    }

    /// All matches for a user, each carrying the other participant's
    /// profile, via the server-side joined RPC
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<MatchSummary>, Error> {
        let params = serde_json::json!({ "p_user_id": user_id });
        let mut rpc = RpcBuilder::new(
            &self.url,
            &self.key,
            "get_matches_with_profiles",
            params,
            self.client.clone(),
        );
        if let Some(token) = self.auth.access_token() {
            rpc = rpc.auth(&token);
        }

        rpc.execute::<Vec<MatchSummary>>().await
    }
}
