//! Article operations over the articles collection.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::collection::DocumentCollection;
use crate::model::{ContentItem, ContentStatus};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("article {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

fn decode(doc: Value) -> anyhow::Result<ContentItem> {
    serde_json::from_value(doc).context("malformed article document")
}

/// Result of scanning the scheduled articles.
#[derive(Debug, Default)]
pub struct DueArticles {
    /// Due articles, oldest schedule first.
    pub items: Vec<ContentItem>,
    /// Scheduled documents that could not be decoded and were left alone.
    pub malformed: usize,
}

/// Every scheduled article whose time has come. Only the query itself is
/// fatal; undecodable documents are counted and skipped.
#[instrument(skip(coll))]
pub async fn list_due(
    coll: &dyn DocumentCollection,
    collection: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<DueArticles> {
    let docs = coll
        .find(
            collection,
            json!({ "status": ContentStatus::Scheduled.as_str() }),
        )
        .await
        .context("failed to query scheduled articles")?;
    let mut due = DueArticles::default();
    for doc in docs {
        let id = doc.get("id").and_then(Value::as_str).map(str::to_string);
        match decode(doc) {
            Ok(item) if item.is_due(now) => due.items.push(item),
            Ok(_) => {}
            Err(err) => {
                warn!(
                    ?err,
                    id = id.as_deref().unwrap_or("<unknown>"),
                    "skipping malformed scheduled article"
                );
                due.malformed += 1;
            }
        }
    }
    due.items.sort_by_key(|item| item.scheduled_at);
    Ok(due)
}

/// Publish `id` only if it is still scheduled. Returns false when another
/// writer got there first.
#[instrument(skip(coll))]
pub async fn publish_if_scheduled(
    coll: &dyn DocumentCollection,
    collection: &str,
    id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let res = coll
        .update_one(
            collection,
            json!({ "id": id, "status": ContentStatus::Scheduled.as_str() }),
            json!({ "status": ContentStatus::Published.as_str(), "publishedAt": now }),
        )
        .await
        .with_context(|| format!("failed to publish article {}", id))?;
    Ok(res.matched())
}

pub async fn find(
    coll: &dyn DocumentCollection,
    collection: &str,
    id: &str,
) -> Result<ContentItem, ContentError> {
    let doc = coll
        .find_by_id(collection, id)
        .await
        .with_context(|| format!("failed to load article {}", id))?
        .ok_or_else(|| ContentError::NotFound(id.to_string()))?;
    Ok(decode(doc)?)
}

async fn update(
    coll: &dyn DocumentCollection,
    collection: &str,
    id: &str,
    set: Value,
) -> Result<ContentItem, ContentError> {
    let res = coll
        .update_one(collection, json!({ "id": id }), set)
        .await
        .with_context(|| format!("failed to update article {}", id))?;
    if !res.matched() {
        return Err(ContentError::NotFound(id.to_string()));
    }
    find(coll, collection, id).await
}

/// Schedule `id` for publication at `at`, which must lie in the future.
#[instrument(skip(coll))]
pub async fn schedule(
    coll: &dyn DocumentCollection,
    collection: &str,
    id: &str,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<ContentItem, ContentError> {
    if at <= now {
        return Err(ContentError::Validation(
            "scheduledAt must be in the future".into(),
        ));
    }
    update(
        coll,
        collection,
        id,
        json!({
            "status": ContentStatus::Scheduled.as_str(),
            "scheduledAt": at,
            "publishedAt": Value::Null,
        }),
    )
    .await
}

#[instrument(skip(coll))]
pub async fn publish_now(
    coll: &dyn DocumentCollection,
    collection: &str,
    id: &str,
    now: DateTime<Utc>,
) -> Result<ContentItem, ContentError> {
    update(
        coll,
        collection,
        id,
        json!({
            "status": ContentStatus::Published.as_str(),
            "scheduledAt": Value::Null,
            "publishedAt": now,
        }),
    )
    .await
}

#[instrument(skip(coll))]
pub async fn revert_to_draft(
    coll: &dyn DocumentCollection,
    collection: &str,
    id: &str,
) -> Result<ContentItem, ContentError> {
    update(
        coll,
        collection,
        id,
        json!({
            "status": ContentStatus::Draft.as_str(),
            "scheduledAt": Value::Null,
            "publishedAt": Value::Null,
        }),
    )
    .await
}
