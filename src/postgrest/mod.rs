//! PostgREST passthrough client.
//!
//! Every data operation in the app is a direct query or mutation against
//! the hosted database; this module holds the small filter/mutation grammar
//! those passthroughs need. Row-level security on the backend remains the
//! actual authority on what a token may touch.

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

use crate::error::Error;
use crate::fetch::Fetch;

/// PostgREST APIエラーの詳細情報
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PostgrestErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for PostgrestErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// "exactly one row" requests answer with this code when no row exists;
/// callers treat it as valid absence
const NO_SINGLE_ROW: &str = "PGRST116";

/// ソート順
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

/// Query builder for one table, consumed per request
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    /// Base URL of the REST endpoint (`{project}/rest/v1`)
    url: String,

    /// The anonymous API key
    key: String,

    /// The table or view this client queries
    table: String,

    /// HTTP client
    client: Client,

    /// Bearer token for row-level security
    token: Option<String>,

    /// Accumulated query parameters; keys may repeat
    params: Vec<(String, String)>,
}

impl PostgrestClient {
    /// Create a new PostgrestClient for a table
    pub fn new(base_url: &str, api_key: &str, table: &str, http_client: Client) -> Self {
        Self {
            url: format!("{}/rest/v1", base_url),
            key: api_key.to_string(),
            table: table.to_string(),
            client: http_client,
            token: None,
            params: vec![("select".to_string(), "*".to_string())],
        }
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.url, self.table)
    }

    fn push(mut self, key: &str, value: String) -> Self {
        self.params.push((key.to_string(), value));
        self
    }

    fn set_select(mut self, columns: &str) -> Self {
        self.params.retain(|(k, _)| k != "select");
        self.params
            .insert(0, ("select".to_string(), columns.to_string()));
        self
    }

    /// Attach the access token of the signed-in user
    pub fn auth(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Choose the columns (or embedded resources) to return
    pub fn select(self, columns: &str) -> Self {
        self.set_select(columns)
    }

    /// Filter rows where column equals a value
    pub fn eq(self, column: &str, value: &str) -> Self {
        self.push(column, format!("eq.{}", value))
    }

    /// Filter rows where column does not equal a value
    pub fn neq(self, column: &str, value: &str) -> Self {
        self.push(column, format!("neq.{}", value))
    }

    /// Filter rows where column is greater than or equal to a value
    pub fn gte(self, column: &str, value: &str) -> Self {
        self.push(column, format!("gte.{}", value))
    }

    /// Filter rows where column is less than or equal to a value
    pub fn lte(self, column: &str, value: &str) -> Self {
        self.push(column, format!("lte.{}", value))
    }

    /// Filter rows where column matches a pattern, case insensitive
    pub fn ilike(self, column: &str, pattern: &str) -> Self {
        self.push(column, format!("ilike.{}", pattern))
    }

    /// Negate an operator: `not("id", "in.(a,b)")`, `not("name", "is.null")`
    pub fn not(self, column: &str, operator_with_value: &str) -> Self {
        self.push(column, format!("not.{}", operator_with_value))
    }

    /// Keep rows where column is not in the given set
    pub fn not_in(self, column: &str, values: &[String]) -> Self {
        self.not(column, &format!("in.({})", values.join(",")))
    }

    /// Keep rows where column is not null
    pub fn not_null(self, column: &str) -> Self {
        self.not(column, "is.null")
    }

    /// Raw disjunction in PostgREST syntax:
    /// `or("and(a.eq.1,b.eq.2),and(a.eq.2,b.eq.1)")`
    pub fn or(self, disjunction: &str) -> Self {
        self.push("or", format!("({})", disjunction))
    }

    /// Order the results by a column
    pub fn order(self, column: &str, order: SortOrder) -> Self {
        self.push("order", format!("{}.{}", column, order.as_str()))
    }

    /// Limit the number of rows returned
    pub fn limit(self, count: u32) -> Self {
        self.push("limit", count.to_string())
    }

    fn fetch<'a>(&'a self, builder: crate::fetch::FetchBuilder<'a>) -> crate::fetch::FetchBuilder<'a> {
        let builder = builder.api_key(&self.key);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn into_database_error(response: reqwest::Response) -> Error {
        let status = response.status();
        match response.json::<PostgrestErrorBody>().await {
            Ok(body) if body.code.as_deref() == Some(NO_SINGLE_ROW) => {
                Error::not_found(body.to_string())
            }
            Ok(body) => Error::database(format!("{} (Status: {})", body, status)),
            Err(_) => Error::database(format!("Request failed with status {}", status)),
        }
    }

    /// Execute the query and return all matching rows
    pub async fn execute<T: DeserializeOwned>(self) -> Result<Vec<T>, Error> {
        let response = self
            .fetch(Fetch::get(&self.client, &self.table_url()))
            .query(self.params.clone())
            .execute_raw()
            .await?;

        if !response.status().is_success() {
            return Err(Self::into_database_error(response).await);
        }

        Ok(response.json::<Vec<T>>().await?)
    }

    /// Execute the query expecting at most one row; absence is `None`,
    /// never an error
    pub async fn maybe_single<T: DeserializeOwned>(self) -> Result<Option<T>, Error> {
        let response = self
            .fetch(Fetch::get(&self.client, &self.table_url()))
            .header("Accept", "application/vnd.pgrst.object+json")
            .query(self.params.clone())
            .execute_raw()
            .await?;

        if response.status().is_success() {
            return Ok(Some(response.json::<T>().await?));
        }

        match Self::into_database_error(response).await {
            err if err.is_not_found() => Ok(None),
            err => Err(err),
        }
    }

    /// Insert a row without asking for the written representation back
    pub async fn insert<T: Serialize>(self, values: T) -> Result<(), Error> {
        let response = self
            .fetch(Fetch::post(&self.client, &self.table_url()))
            .header("Prefer", "return=minimal")
            .json(&values)?
            .execute_raw()
            .await?;

        if !response.status().is_success() {
            return Err(Self::into_database_error(response).await);
        }
        Ok(())
    }

    /// Insert or update a row, returning the stored representation
    pub async fn upsert<T: Serialize, R: DeserializeOwned>(self, values: T) -> Result<R, Error> {
        let response = self
            .fetch(Fetch::post(&self.client, &self.table_url()))
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .header("Accept", "application/vnd.pgrst.object+json")
            .query(self.params.clone())
            .json(&values)?
            .execute_raw()
            .await?;

        if !response.status().is_success() {
            return Err(Self::into_database_error(response).await);
        }

        Ok(response.json::<R>().await?)
    }

    /// Delete the rows selected by the accumulated filters
    pub async fn delete(self) -> Result<(), Error> {
        let response = self
            .fetch(Fetch::delete(&self.client, &self.table_url()))
            .header("Prefer", "return=minimal")
            .query(self.params.clone())
            .execute_raw()
            .await?;

        if !response.status().is_success() {
            return Err(Self::into_database_error(response).await);
        }
        Ok(())
    }
}

/// Builder for server-side RPC calls
pub struct RpcBuilder<T: Serialize> {
    url: String,
    key: String,
    params: T,
    client: Client,
    token: Option<String>,
}

impl<T: Serialize> RpcBuilder<T> {
    /// Create a new RpcBuilder for a stored function
    pub fn new(base_url: &str, api_key: &str, function: &str, params: T, http_client: Client) -> Self {
        Self {
            url: format!("{}/rest/v1/rpc/{}", base_url, function),
            key: api_key.to_string(),
            params,
            client: http_client,
            token: None,
        }
    }

    /// Attach the access token of the signed-in user
    pub fn auth(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Execute the RPC call and return the results
    pub async fn execute<R: DeserializeOwned>(&self) -> Result<R, Error> {
        let mut fetch = Fetch::post(&self.client, &self.url)
            .api_key(&self.key)
            .json(&self.params)?;
        if let Some(token) = &self.token {
            fetch = fetch.bearer_auth(token);
        }

        let response = fetch.execute_raw().await?;
        if !response.status().is_success() {
            return Err(PostgrestClient::into_database_error(response).await);
        }
        Ok(response.json::<R>().await?)
    }
}
