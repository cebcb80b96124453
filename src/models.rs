//! Row types shared across the client, aligned with the backend schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Self-reported gender on a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Male => write!(f, "Male"),
            Self::Female => write!(f, "Female"),
            Self::Other => write!(f, "Other"),
        }
    }
}

// The setup form pre-selects Female
impl Default for Gender {
    fn default() -> Self {
        Gender::Female
    }
}

/// A user-editable profile row from the `profiles` table.
///
/// The row is created by a backend trigger at signup with every column but
/// `id`/`email` null; profile setup fills the rest in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub gender: Option<Gender>,
    pub age: Option<u32>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub number_of_kids: Option<u32>,
    pub co_parenting: Option<bool>,
    pub about: Option<String>,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// A profile is complete once a full name has been set; incomplete
    /// profiles are gated out of discovery and into the setup flow.
    pub fn is_complete(&self) -> bool {
        self.full_name
            .as_deref()
            .map(|name| !name.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Fields written by profile setup; `id`, `email` and `photo_url` are
/// stamped by the client before the upsert.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    pub full_name: String,
    pub gender: Gender,
    pub age: u32,
    pub city: String,
    pub state: String,
    pub number_of_kids: u32,
    pub co_parenting: bool,
    pub about: String,
}

/// The verdict recorded for a swipe decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Like,
    Skip,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Like => write!(f, "like"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// A recorded decision from the `likes` table. Write-once per
/// (user_id, liked_user_id) pair; the backend trigger on insert is what
/// turns two inverse likes into a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub liked_user_id: Uuid,
    #[serde(rename = "type")]
    pub verdict: Verdict,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new decision
#[derive(Debug, Clone, Serialize)]
pub struct NewLike {
    pub user_id: Uuid,
    pub liked_user_id: Uuid,
    #[serde(rename = "type")]
    pub verdict: Verdict,
}

/// A bare match row. Participant order carries no meaning; use
/// [`MatchDetail::other_participant`] to normalize against the current user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRow {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A match row with both participant profiles embedded
#[derive(Debug, Clone, Deserialize)]
pub struct MatchDetail {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub user1: Profile,
    pub user2: Profile,
}

impl MatchDetail {
    /// Resolve the participant that is not `self_id`. Errors if `self_id`
    /// is not a participant of this match at all.
    pub fn other_participant(&self, self_id: Uuid) -> Result<&Profile, crate::error::Error> {
        if self.user1.id == self_id {
            Ok(&self.user2)
        } else if self.user2.id == self_id {
            Ok(&self.user1)
        } else {
            Err(crate::error::Error::not_found(format!(
                "user {} is not a participant of match {}",
                self_id, self.id
            )))
        }
    }
}

/// One row of the `get_matches_with_profiles` RPC: the match plus the
/// profile of the participant that is not the queried user.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchSummary {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub other_user: Profile,
}

/// An immutable chat message from the `messages` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether this message travels between `a` and `b`, in either direction
    pub fn involves_pair(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// Stable ordering key: creation time, ties broken by id
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

/// Insert payload for a new chat message
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(full_name: Option<&str>) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            email: "someone@example.com".to_string(),
            full_name: full_name.map(String::from),
            gender: Some(Gender::Female),
            age: Some(34),
            city: Some("Austin".to_string()),
            state: Some("TX".to_string()),
            number_of_kids: Some(2),
            co_parenting: Some(true),
            about: None,
            photo_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn completeness_requires_a_non_blank_full_name() {
        assert!(profile(Some("Dana R.")).is_complete());
        assert!(!profile(None).is_complete());
        assert!(!profile(Some("")).is_complete());
        assert!(!profile(Some("   ")).is_complete());
    }

    #[test]
    fn verdict_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Verdict::Like).unwrap(), "\"like\"");
        assert_eq!(serde_json::to_string(&Verdict::Skip).unwrap(), "\"skip\"");
    }

    #[test]
    fn gender_round_trips_capitalized() {
        let g: Gender = serde_json::from_str("\"Female\"").unwrap();
        assert_eq!(g, Gender::Female);
        assert_eq!(serde_json::to_string(&Gender::Male).unwrap(), "\"Male\"");
    }

    #[test]
    fn other_participant_normalizes_either_side() {
        let a = profile(Some("A"));
        let b = profile(Some("B"));
        let detail = MatchDetail {
            id: Uuid::new_v4(),
            user1_id: a.id,
            user2_id: b.id,
            created_at: Utc::now(),
            user1: a.clone(),
            user2: b.clone(),
        };
        assert_eq!(detail.other_participant(a.id).unwrap().id, b.id);
        assert_eq!(detail.other_participant(b.id).unwrap().id, a.id);
        assert!(detail.other_participant(Uuid::new_v4()).is_err());
    }
}
