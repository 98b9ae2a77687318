//! Remote record store used by the cache-aware team services, plus the
//! PostgREST client that talks to the hosted backend.

use async_trait::async_trait;
use db::models::collection::Collection;
use reqwest::{Client, Method, RequestBuilder, Response, header};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::config::StoreConfig;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Failure reported by the store itself (constraint, RLS, bad filter, ...)
    #[error("{message}")]
    Postgrest {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("json error: {0}")]
    Serde(String),
    #[error("expected a single row, got {0}")]
    UnexpectedRowCount(usize),
}

impl StoreError {
    /// Returns true if the error is transient and a read may be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Postgrest { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// Message worth showing to a user, if the error carries one
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Postgrest { message, .. } | Self::Transport(message) => {
                Some(message.as_str()).filter(|m| !m.trim().is_empty())
            }
            _ => None,
        }
    }
}

/// Table-level operations against the hosted store. Rows travel as JSON in
/// the store's own column naming; callers decode them into models.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select_all(
        &self,
        collection: Collection,
        columns: &str,
        order_by: &str,
    ) -> Result<Vec<Value>, StoreError>;

    async fn select_one(
        &self,
        collection: Collection,
        columns: &str,
        id: Uuid,
    ) -> Result<Option<Value>, StoreError>;

    async fn insert(
        &self,
        collection: Collection,
        columns: &str,
        payload: Value,
    ) -> Result<Value, StoreError>;

    async fn update(
        &self,
        collection: Collection,
        columns: &str,
        id: Uuid,
        patch: Value,
    ) -> Result<Value, StoreError>;

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<(), StoreError>;

    async fn upsert(
        &self,
        collection: Collection,
        payload: Value,
        on_conflict: &str,
    ) -> Result<(), StoreError>;
}

/// Error body returned by PostgREST on non-2xx responses
#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

/// PostgREST client for the hosted backend's `/rest/v1` endpoint
#[derive(Debug, Clone)]
pub struct PostgrestStore {
    http: Client,
    rest_url: String,
    anon_key: SecretString,
}

impl PostgrestStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("roster-planner/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            rest_url: rest_url(config),
            anon_key: config.anon_key.clone(),
        })
    }

    fn table_url(&self, collection: Collection) -> String {
        format!("{}/{}", self.rest_url, collection.as_ref())
    }

    fn request(&self, method: Method, collection: Collection) -> RequestBuilder {
        let key = self.anon_key.expose_secret();
        self.http
            .request(method, self.table_url(collection))
            .header("apikey", key)
            .header(header::AUTHORIZATION, format!("Bearer {key}"))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let res = request.send().await.map_err(map_reqwest_error)?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        let body = res.text().await.unwrap_or_default();
        Err(decode_error_body(status.as_u16(), &body))
    }

    async fn rows(&self, request: RequestBuilder) -> Result<Vec<Value>, StoreError> {
        self.send(request)
            .await?
            .json::<Vec<Value>>()
            .await
            .map_err(|e| StoreError::Serde(e.to_string()))
    }
}

#[async_trait]
impl RecordStore for PostgrestStore {
    async fn select_all(
        &self,
        collection: Collection,
        columns: &str,
        order_by: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let order = format!("{order_by}.asc");
        let request = self
            .request(Method::GET, collection)
            .query(&[("select", columns), ("order", order.as_str())]);
        self.rows(request).await
    }

    async fn select_one(
        &self,
        collection: Collection,
        columns: &str,
        id: Uuid,
    ) -> Result<Option<Value>, StoreError> {
        let filter = format!("eq.{id}");
        let request = self
            .request(Method::GET, collection)
            .query(&[("select", columns), ("id", filter.as_str())]);
        let rows = self.rows(request).await?;
        at_most_one(rows)
    }

    async fn insert(
        &self,
        collection: Collection,
        columns: &str,
        payload: Value,
    ) -> Result<Value, StoreError> {
        let request = self
            .request(Method::POST, collection)
            .query(&[("select", columns)])
            .header("Prefer", "return=representation")
            .json(&payload);
        exactly_one(self.rows(request).await?)
    }

    async fn update(
        &self,
        collection: Collection,
        columns: &str,
        id: Uuid,
        patch: Value,
    ) -> Result<Value, StoreError> {
        let filter = format!("eq.{id}");
        let request = self
            .request(Method::PATCH, collection)
            .query(&[("select", columns), ("id", filter.as_str())])
            .header("Prefer", "return=representation")
            .json(&patch);
        exactly_one(self.rows(request).await?)
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<(), StoreError> {
        let filter = format!("eq.{id}");
        let request = self
            .request(Method::DELETE, collection)
            .query(&[("id", filter.as_str())]);
        self.send(request).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: Collection,
        payload: Value,
        on_conflict: &str,
    ) -> Result<(), StoreError> {
        let request = self
            .request(Method::POST, collection)
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&payload);
        self.send(request).await?;
        Ok(())
    }
}

fn rest_url(config: &StoreConfig) -> String {
    format!("{}/rest/v1", config.url.as_str().trim_end_matches('/'))
}

fn map_reqwest_error(e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Transport(e.to_string())
    }
}

fn decode_error_body(status: u16, body: &str) -> StoreError {
    match serde_json::from_str::<PostgrestErrorBody>(body) {
        Ok(parsed) => StoreError::Postgrest {
            status,
            code: parsed.code,
            message: parsed.message.unwrap_or_else(|| format!("http {status}")),
            details: parsed.details,
            hint: parsed.hint,
        },
        Err(_) => StoreError::Postgrest {
            status,
            code: None,
            message: if body.trim().is_empty() {
                format!("http {status}")
            } else {
                body.trim().to_string()
            },
            details: None,
            hint: None,
        },
    }
}

fn at_most_one(mut rows: Vec<Value>) -> Result<Option<Value>, StoreError> {
    match rows.len() {
        0 => Ok(None),
        1 => Ok(rows.pop()),
        n => Err(StoreError::UnexpectedRowCount(n)),
    }
}

fn exactly_one(rows: Vec<Value>) -> Result<Value, StoreError> {
    let count = rows.len();
    at_most_one(rows)?.ok_or(StoreError::UnexpectedRowCount(count))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;

    use super::*;

    #[test]
    fn test_rest_url_ignores_trailing_slash() {
        let config = StoreConfig::new(Url::parse("https://abc.supabase.co/").unwrap(), "key");
        assert_eq!(rest_url(&config), "https://abc.supabase.co/rest/v1");

        let store = PostgrestStore::new(&config).unwrap();
        assert_eq!(
            store.table_url(Collection::Teams),
            "https://abc.supabase.co/rest/v1/teams"
        );
    }

    #[test]
    fn test_decode_postgrest_error_body() {
        let err = decode_error_body(
            403,
            r#"{"code":"42501","message":"Forbidden","details":null,"hint":"check policies"}"#,
        );
        assert_eq!(
            err,
            StoreError::Postgrest {
                status: 403,
                code: Some("42501".to_string()),
                message: "Forbidden".to_string(),
                details: None,
                hint: Some("check policies".to_string()),
            }
        );
        assert_eq!(err.user_message(), Some("Forbidden"));
        assert!(!err.should_retry());
    }

    #[test]
    fn test_decode_non_json_error_body() {
        let err = decode_error_body(502, "Bad Gateway");
        assert_eq!(err.user_message(), Some("Bad Gateway"));
        assert!(err.should_retry());

        let err = decode_error_body(500, "");
        assert_eq!(err.to_string(), "http 500");
    }

    #[test]
    fn test_row_count_helpers() {
        assert_eq!(at_most_one(vec![]).unwrap(), None);
        assert_eq!(at_most_one(vec![json!({"id": 1})]).unwrap(), Some(json!({"id": 1})));
        assert_eq!(
            at_most_one(vec![json!({}), json!({})]),
            Err(StoreError::UnexpectedRowCount(2))
        );
        assert_eq!(exactly_one(vec![]), Err(StoreError::UnexpectedRowCount(0)));
    }

    #[test]
    fn test_retry_classification() {
        assert!(StoreError::Timeout.should_retry());
        assert!(StoreError::Transport("reset".into()).should_retry());
        assert!(!StoreError::Serde("bad".into()).should_retry());
        assert_eq!(StoreError::Timeout.user_message(), None);
    }
}
