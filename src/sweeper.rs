//! Scheduled publication sweep: moves every due article to `published`.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::collection::DocumentCollection;
use crate::content;
use crate::model::PublishedArticle;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to query scheduled articles: {0:#}")]
    Query(anyhow::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub published_at: DateTime<Utc>,
    pub articles: Vec<PublishedArticle>,
    /// Due items another writer published first.
    pub skipped: usize,
    /// Due items whose update failed; retried on the next sweep.
    pub failed: usize,
    /// Scheduled documents that could not be read and were not touched.
    pub malformed: usize,
}

impl SweepReport {
    pub fn message(&self) -> String {
        match self.articles.len() {
            0 => "No scheduled articles due".to_string(),
            1 => "Published 1 scheduled article".to_string(),
            n => format!("Published {} scheduled articles", n),
        }
    }
}

/// Run one sweep at `now`. Only the initial query is fatal; each transition
/// is independent.
#[instrument(skip(coll))]
pub async fn sweep(
    coll: &dyn DocumentCollection,
    collection: &str,
    now: DateTime<Utc>,
) -> Result<SweepReport, SweepError> {
    let due = content::list_due(coll, collection, now)
        .await
        .map_err(SweepError::Query)?;
    if due.items.is_empty() {
        debug!("no scheduled articles due");
    }

    let outcomes = join_all(due.items.iter().map(|item| async move {
        let res = content::publish_if_scheduled(coll, collection, &item.id, now).await;
        (item, res)
    }))
    .await;

    let mut report = SweepReport {
        published_at: now,
        articles: Vec::new(),
        skipped: 0,
        failed: 0,
        malformed: due.malformed,
    };
    for (item, res) in outcomes {
        match res {
            Ok(true) => {
                info!(id = %item.id, title = %item.title, "published scheduled article");
                report.articles.push(PublishedArticle {
                    id: item.id.clone(),
                    title: item.title.clone(),
                    scheduled_at: item.scheduled_at,
                });
            }
            Ok(false) => {
                debug!(id = %item.id, "article no longer scheduled; skipping");
                report.skipped += 1;
            }
            Err(err) => {
                warn!(?err, id = %item.id, "failed to publish scheduled article");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Decide whether a sweep trigger may run. The secret is only enforced in
/// production-like environments with a configured secret.
pub fn authorize_trigger(
    production_like: bool,
    secret: Option<&str>,
    authorization: Option<&str>,
) -> bool {
    let Some(secret) = secret.filter(|_| production_like) else {
        return true;
    };
    authorization
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|token| constant_time_eq(token.trim().as_bytes(), secret.as_bytes()))
        .unwrap_or(false)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
