use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, warn};

use crate::collection::model::{FindByIdResp, FindResp, InsertResp};

pub mod memory;
pub mod model;

pub use memory::MemoryCollection;
pub use model::UpdateResult;

/// Generic document-collection interface of the backend. Filters are JSON
/// objects matched by top-level field equality.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>>;

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Insert a document, returning its id.
    async fn insert_one(&self, collection: &str, document: Value) -> Result<String>;

    /// Set the fields in `set` on the first document matching `filter`.
    async fn update_one(&self, collection: &str, filter: Value, set: Value)
        -> Result<UpdateResult>;
}

#[derive(Clone)]
pub struct CollectionClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for CollectionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl CollectionClient {
    pub fn new(api_key: String, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid backend base URL")?;
        Self::with_base_url(api_key, base_url)
    }

    pub fn with_base_url(api_key: String, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("blogdesk/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(path)
            .context("invalid backend base URL")?;
        let mut builder = self
            .http
            .request(method, endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json");
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .json(body);
        }
        builder.build().context("failed to build backend request")
    }

    /// Send a request. Returns `None` for 404 so callers can map it.
    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<T>> {
        let request = self.build_request(method, path, body)?;
        debug!(method=%request.method(), url=%request.url(), "backend request");

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach backend")?;
        let status = res.status();
        debug!(%status, path, "backend response");

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("Rate limited by backend: {}", body);
            return Err(anyhow!("received 429 from backend: {}", body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!("Backend error - Status: {}, Body: {}", status, body);
            return Err(anyhow!("backend error {}: {}", status, body));
        }

        let text = res.text().await.context("failed to read backend response")?;
        let payload = serde_json::from_str(&text).context("invalid backend response JSON")?;
        Ok(Some(payload))
    }
}

pub fn find_path(collection: &str) -> String {
    format!("v1/collections/{}/find", collection)
}

pub fn document_path(collection: &str, id: &str) -> String {
    format!("v1/collections/{}/documents/{}", collection, id)
}

pub fn insert_path(collection: &str) -> String {
    format!("v1/collections/{}/documents", collection)
}

pub fn update_path(collection: &str) -> String {
    format!("v1/collections/{}/update", collection)
}

pub fn build_update_body(filter: &Value, set: &Value) -> Value {
    json!({ "filter": filter, "set": set })
}

#[async_trait]
impl DocumentCollection for CollectionClient {
    async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>> {
        let body = json!({ "filter": filter });
        let resp: Option<FindResp> = self
            .execute(Method::POST, &find_path(collection), Some(&body))
            .await?;
        let resp = resp.ok_or_else(|| anyhow!("collection '{}' not found", collection))?;
        Ok(resp.documents)
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let resp: Option<FindByIdResp> = self
            .execute(Method::GET, &document_path(collection, id), None)
            .await?;
        Ok(resp.map(|r| r.document))
    }

    async fn insert_one(&self, collection: &str, document: Value) -> Result<String> {
        let body = json!({ "document": document });
        let resp: Option<InsertResp> = self
            .execute(Method::POST, &insert_path(collection), Some(&body))
            .await?;
        let resp = resp.ok_or_else(|| anyhow!("collection '{}' not found", collection))?;
        Ok(resp.id)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Value,
        set: Value,
    ) -> Result<UpdateResult> {
        let body = build_update_body(&filter, &set);
        let resp: Option<UpdateResult> = self
            .execute(Method::POST, &update_path(collection), Some(&body))
            .await?;
        resp.ok_or_else(|| anyhow!("collection '{}' not found", collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CollectionClient {
        CollectionClient::new("key-123".into(), "https://backend.test/").unwrap()
    }

    #[test]
    fn paths_are_scoped_by_collection() {
        assert_eq!(find_path("articles"), "v1/collections/articles/find");
        assert_eq!(
            document_path("settings", "s-1"),
            "v1/collections/settings/documents/s-1"
        );
        assert_eq!(insert_path("settings"), "v1/collections/settings/documents");
        assert_eq!(update_path("articles"), "v1/collections/articles/update");
    }

    #[test]
    fn update_body_carries_filter_and_set() {
        let body = build_update_body(
            &json!({ "id": "a", "status": "scheduled" }),
            &json!({ "status": "published" }),
        );
        assert_eq!(body["filter"]["status"], "scheduled");
        assert_eq!(body["set"]["status"], "published");
    }

    #[test]
    fn build_request_sets_headers() {
        let body = json!({ "filter": {} });
        let request = client()
            .build_request(Method::POST, &find_path("articles"), Some(&body))
            .unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().path(), "/v1/collections/articles/find");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer key-123"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn get_request_has_no_content_type() {
        let request = client()
            .build_request(Method::GET, &document_path("settings", "x"), None)
            .unwrap();
        assert!(request.headers().get("Content-Type").is_none());
        assert!(request.body().is_none());
    }

    #[test]
    fn debug_hides_api_key() {
        let rendered = format!("{:?}", client());
        assert!(!rendered.contains("key-123"));
    }
}
