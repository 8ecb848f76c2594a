//! PostgREST client for the remote collections.
//!
//! Tables live under `{base}/rest/v1/{table}`. Every request carries the
//! project `apikey` header and a bearer token (the user's access token, or
//! the API key when no user token is set). Filters use the PostgREST
//! operator syntax (`column=eq.value`, `date=gte.2024-01-01`).

use async_trait::async_trait;
use habit_sync_engine::{Collection, RemoteBackend, RemoteError, Row, Selector, OWNER_COLUMN};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;

/// Remote backend speaking the PostgREST dialect over HTTP.
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
    timeout: Duration,
}

/// Error body returned by PostgREST.
#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

impl RestBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            access_token: RwLock::new(None),
            timeout,
        })
    }

    pub fn with_access_token(self, token: Option<String>) -> Self {
        self.set_access_token(token);
        self
    }

    /// Replace the bearer token, e.g. after a session refresh.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection.table_name())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let token = self
            .access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| self.api_key.clone());

        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), body = %body, "Backend rejected request");
        Err(status_error(status, &body))
    }

    async fn rows(&self, response: Response) -> Result<Vec<Row>, RemoteError> {
        response
            .json::<Vec<Row>>()
            .await
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let message = match serde_json::from_str::<PostgrestError>(body) {
        Ok(PostgrestError {
            code,
            message,
            details,
        }) => {
            let mut text = message.unwrap_or_else(|| status.to_string());
            if let Some(details) = details {
                text = format!("{text} ({details})");
            }
            if let Some(code) = code {
                text = format!("[{code}] {text}");
            }
            text
        }
        Err(_) if body.is_empty() => status.to_string(),
        Err(_) => body.to_string(),
    };
    RemoteError::from_status(status.as_u16(), message)
}

/// Render a value as the right-hand side of a PostgREST filter.
fn filter_value(value: &Value) -> String {
    match value {
        Value::Null => "is.null".to_string(),
        Value::String(s) => format!("eq.{s}"),
        other => format!("eq.{other}"),
    }
}

fn owner_filter(owner: &str) -> (String, String) {
    (OWNER_COLUMN.to_string(), format!("eq.{owner}"))
}

/// Query parameters for a selector, scoped to `owner`.
pub fn selector_query(owner: &str, selector: &Selector) -> Vec<(String, String)> {
    let mut query = vec![("select".to_string(), "*".to_string()), owner_filter(owner)];

    for (column, value) in &selector.equals {
        query.push((column.clone(), filter_value(value)));
    }
    if let Some(range) = &selector.date_range {
        if let Some(from) = range.from {
            query.push((range.column.clone(), format!("gte.{from}")));
        }
        if let Some(to) = range.to {
            query.push((range.column.clone(), format!("lte.{to}")));
        }
    }
    query.push(("order".to_string(), "id.asc".to_string()));
    if let Some(limit) = selector.limit {
        query.push(("limit".to_string(), limit.to_string()));
    }
    query
}

fn record_query(id: &str, owner: &str) -> Vec<(String, String)> {
    vec![("id".to_string(), format!("eq.{id}")), owner_filter(owner)]
}

#[async_trait]
impl RemoteBackend for RestBackend {
    async fn health_check(&self) -> Result<(), RemoteError> {
        let url = format!("{}/rest/v1/", self.base_url);
        self.send(self.request(Method::GET, &url)).await?;
        Ok(())
    }

    async fn insert(
        &self,
        collection: Collection,
        owner: &str,
        mut row: Row,
    ) -> Result<Row, RemoteError> {
        row.insert(OWNER_COLUMN.to_string(), Value::String(owner.to_string()));

        let request = self
            .request(Method::POST, &self.table_url(collection))
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.send(request).await?;

        self.rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Decode("insert returned no rows".to_string()))
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        owner: &str,
        mut changes: Row,
    ) -> Result<Row, RemoteError> {
        changes.remove("id");
        changes.remove(OWNER_COLUMN);

        let request = self
            .request(Method::PATCH, &self.table_url(collection))
            .query(&record_query(id, owner))
            .header("Prefer", "return=representation")
            .json(&changes);
        let response = self.send(request).await?;

        // PostgREST answers a PATCH that matched nothing with an empty array.
        self.rows(response).await?.into_iter().next().ok_or_else(|| {
            RemoteError::NotFound(format!("{}/{}", collection.table_name(), id))
        })
    }

    async fn delete(
        &self,
        collection: Collection,
        id: &str,
        owner: &str,
    ) -> Result<(), RemoteError> {
        let request = self
            .request(Method::DELETE, &self.table_url(collection))
            .query(&record_query(id, owner));
        self.send(request).await?;
        Ok(())
    }

    async fn select(
        &self,
        collection: Collection,
        owner: &str,
        selector: &Selector,
    ) -> Result<Vec<Row>, RemoteError> {
        let request = self
            .request(Method::GET, &self.table_url(collection))
            .query(&selector_query(owner, selector));
        let response = self.send(request).await?;
        self.rows(response).await
    }
}
