//! Profile CRUD passthrough: read, setup/edit, search, and the admin
//! listing. Row-level security decides what the caller's token may touch.

use reqwest::Client;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{Auth, User};
use crate::error::Error;
use crate::models::{Gender, Profile, ProfileUpdate};
use crate::postgrest::{PostgrestClient, SortOrder};
use crate::storage::{FileOptions, StorageClient};

/// Search criteria for the browse page; every field is optional
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Substring match on the state column
    pub state: Option<String>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub gender: Option<Gender>,
}

/// Store for `profiles` rows and their photos
pub struct ProfileStore {
    url: String,
    key: String,
    client: Client,
    auth: Arc<Auth>,
    avatars_bucket: String,
}

impl ProfileStore {
    pub(crate) fn new(
        url: &str,
        key: &str,
        client: Client,
        auth: Arc<Auth>,
        avatars_bucket: String,
    ) -> Self {
        Self {
            url: url.to_string(),
            key: key.to_string(),
            client,
            auth,
            avatars_bucket,
        }
    }

    fn table(&self) -> PostgrestClient {
        let table = PostgrestClient::new(&self.url, &self.key, "profiles", self.client.clone());
        match self.auth.access_token() {
            Some(token) => table.auth(&token),
            None => table,
        }
    }

    /// Fetch one profile. A missing row is valid absence (a fresh signup
    /// has no profile yet), never an error.
    pub async fn get(&self, id: Uuid) -> Result<Option<Profile>, Error> {
        self.table()
            .eq("id", &id.to_string())
            .maybe_single::<Profile>()
            .await
    }

    /// Create or update the caller's profile row. `photo_url` replaces the
    /// stored photo reference when given and leaves it untouched otherwise.
    pub async fn save(
        &self,
        user: &User,
        update: ProfileUpdate,
        photo_url: Option<String>,
    ) -> Result<Profile, Error> {
        let mut payload = match serde_json::to_value(&update)? {
            serde_json::Value::Object(map) => map,
            _ => return Err(Error::general("profile update must serialize to an object")),
        };
        payload.insert("id".to_string(), serde_json::json!(user.id));
        payload.insert("email".to_string(), serde_json::json!(user.email));
        if let Some(photo_url) = photo_url {
            payload.insert("photo_url".to_string(), serde_json::json!(photo_url));
        }

        self.table()
            .upsert::<_, Profile>(serde_json::Value::Object(payload))
            .await
    }

    /// Upload a profile photo and return its public URL. The object name is
    /// prefixed with the owner id so uploads never collide across users.
    pub async fn upload_photo(
        &self,
        user_id: Uuid,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, Error> {
        let ext = filename.rsplit('.').next().unwrap_or("jpg");
        let object_name = format!("{}-{}.{}", user_id, Uuid::new_v4(), ext);

        let storage = StorageClient::new(&self.url, &self.key, self.client.clone());
        let bucket = storage.from(&self.avatars_bucket);
        let token = self.auth.access_token();
        let options = FileOptions::default().with_content_type(content_type_for(ext));

        bucket
            .upload(&object_name, bytes, options, token.as_deref())
            .await?;

        Ok(bucket.get_public_url(&object_name))
    }

    /// Delete a profile row. Whether the caller is allowed to (own row, or
    /// admin) is enforced by the backend policies.
    pub async fn delete(&self, id: Uuid) -> Result<(), Error> {
        self.table().eq("id", &id.to_string()).delete().await
    }

    /// Search complete profiles other than the caller's own
    pub async fn search(
        &self,
        self_id: Uuid,
        filters: SearchFilters,
    ) -> Result<Vec<Profile>, Error> {
        let mut query = self
            .table()
            .not("id", &format!("eq.{}", self_id))
            .not_null("full_name");

        if let Some(state) = &filters.state {
            query = query.ilike("state", &format!("%{}%", state));
        }
        if let Some(min_age) = filters.min_age {
            query = query.gte("age", &min_age.to_string());
        }
        if let Some(max_age) = filters.max_age {
            query = query.lte("age", &max_age.to_string());
        }
        if let Some(gender) = filters.gender {
            query = query.eq("gender", &gender.to_string());
        }

        query.limit(20).execute::<Profile>().await
    }

    /// Every profile, newest first. The backend only answers this for
    /// admin tokens.
    pub async fn list_all(&self) -> Result<Vec<Profile>, Error> {
        self.table()
            .order("created_at", SortOrder::Descending)
            .execute::<Profile>()
            .await
    }
}

fn content_type_for(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
