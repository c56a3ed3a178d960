use crate::collection::DocumentCollection;
use crate::db::{self, Pool};
use crate::settings;
use anyhow::Result;
use tracing::{error, info, instrument, warn};

/// What one worker step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Nothing due.
    Idle,
    /// The write tagged `version` reached the backend.
    Pushed { version: i64 },
    /// The push failed; the write was rescheduled.
    Deferred { attempt: i32 },
}

/// Worker tuning shared by every step.
#[derive(Debug, Clone, Copy)]
pub struct OutboxPolicy {
    pub max_backoff_secs: i64,
    pub alert_after_attempts: i32,
}

/// Push the head of the pending-writes queue to the backend.
#[instrument(skip_all)]
pub async fn process_next_write(
    pool: &Pool,
    remote: &dyn DocumentCollection,
    policy: OutboxPolicy,
) -> Result<WriteOutcome> {
    let Some(write) = db::next_pending_write(pool).await? else {
        return Ok(WriteOutcome::Idle);
    };

    let res = async {
        let document_id = match &write.document_id {
            Some(id) => id.clone(),
            None => {
                let current = settings::get_or_create(remote, &write.collection).await?;
                let id = current
                    .id
                    .ok_or_else(|| anyhow::anyhow!("settings document has no id"))?;
                db::assign_document_id(pool, &write.collection, &id).await?;
                id
            }
        };
        settings::push_patch(remote, &write.collection, &document_id, &write.patch).await
    }
    .await;

    match res {
        Ok(()) => {
            db::delete_write(pool, write.id).await?;
            info!(id = write.id, version = write.version, "settings write pushed");
            Ok(WriteOutcome::Pushed {
                version: write.version,
            })
        }
        Err(err) => {
            let attempt = write.attempt + 1;
            if attempt >= policy.alert_after_attempts {
                error!(
                    ?err,
                    id = write.id,
                    version = write.version,
                    attempt,
                    "settings write keeps failing; local state is ahead of the backend"
                );
            } else {
                warn!(?err, id = write.id, attempt, "settings write failed; backoff");
            }
            db::backoff_write_with_cap(pool, write.id, write.attempt, policy.max_backoff_secs)
                .await?;
            Ok(WriteOutcome::Deferred { attempt })
        }
    }
}
