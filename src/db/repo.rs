use super::model::PendingWrite;
use crate::model::SettingsPatch;
use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For a file-backed SQLite URL, expand a leading `~/`, make sure the parent
/// directory exists and ask SQLite to create the file. In-memory and
/// non-sqlite URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = query.unwrap_or("mode=rwc");
    format!("sqlite://{}?{}", path, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn load_snapshot(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM local_storage WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[instrument(skip(pool, value))]
pub async fn save_snapshot(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO local_storage (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .context("failed to persist snapshot")?;
    Ok(())
}

#[instrument(skip(pool, patch))]
pub async fn enqueue_write(
    pool: &Pool,
    collection: &str,
    document_id: Option<&str>,
    patch: &SettingsPatch,
    version: i64,
) -> Result<i64> {
    let patch = serde_json::to_string(patch)?;
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO pending_writes (collection, document_id, patch, version) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(collection)
    .bind(document_id)
    .bind(patch)
    .bind(version)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

fn pending_from_row(row: &SqliteRow) -> Result<PendingWrite> {
    let id: i64 = row.get("id");
    let raw: String = row.get("patch");
    let patch = serde_json::from_str(&raw)
        .with_context(|| format!("pending write {} has a malformed patch", id))?;
    Ok(PendingWrite {
        id,
        collection: row.get("collection"),
        document_id: row
            .try_get::<Option<String>, _>("document_id")
            .ok()
            .flatten()
            .filter(|s| !s.trim().is_empty()),
        patch,
        version: row.get("version"),
        attempt: row.get("attempt"),
    })
}

/// The oldest pending write, if it is due. Writes drain strictly in order, so
/// a head in backoff holds back everything behind it.
#[instrument(skip_all)]
pub async fn next_pending_write(pool: &Pool) -> Result<Option<PendingWrite>> {
    let row = sqlx::query(
        "SELECT id, collection, document_id, patch, version, attempt, \
                datetime(due_at) <= CURRENT_TIMESTAMP AS is_due \
         FROM pending_writes ORDER BY id ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) if row.get::<i64, _>("is_due") != 0 => Ok(Some(pending_from_row(&row)?)),
        _ => Ok(None),
    }
}

#[instrument(skip_all)]
pub async fn list_pending_writes(pool: &Pool) -> Result<Vec<PendingWrite>> {
    let rows = sqlx::query(
        "SELECT id, collection, document_id, patch, version, attempt \
         FROM pending_writes ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(pending_from_row).collect()
}

#[instrument(skip_all)]
pub async fn delete_write(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM pending_writes WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Point queued writes that were enqueued before the document id was known
/// at `document_id`.
#[instrument(skip_all)]
pub async fn assign_document_id(pool: &Pool, collection: &str, document_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE pending_writes SET document_id = ? WHERE collection = ? AND document_id IS NULL",
    )
    .bind(document_id)
    .bind(collection)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delay in seconds before retrying after `attempt` failures: 5s doubling,
/// capped at `max_cap_secs` (no cap when <= 0).
pub fn backoff_secs(attempt: i32, max_cap_secs: i64) -> i64 {
    let secs = 5_i64 * (1_i64 << attempt.clamp(0, 10));
    if max_cap_secs <= 0 {
        secs
    } else {
        secs.min(max_cap_secs)
    }
}

#[instrument(skip_all)]
pub async fn backoff_write_with_cap(
    pool: &Pool,
    id: i64,
    attempt: i32,
    max_cap_secs: i64,
) -> Result<()> {
    let secs = backoff_secs(attempt, max_cap_secs);
    sqlx::query(
        "UPDATE pending_writes SET attempt = ?, due_at = datetime('now', ? || ' seconds') WHERE id = ?",
    )
    .bind(attempt + 1)
    .bind(secs)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_pending_writes(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_writes")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn patch(color: &str) -> SettingsPatch {
        SettingsPatch {
            accent_color: Some(color.into()),
            ..Default::default()
        }
    }

    #[test]
    fn sqlite_urls_are_normalized() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://x/y"),
            "postgres://x/y"
        );
        let td = tempfile::tempdir().unwrap();
        let file = td.path().join("nested/app.db");
        let url = prepare_sqlite_url(&format!("sqlite://{}", file.display()));
        assert_eq!(url, format!("sqlite://{}?mode=rwc", file.display()));
        assert!(file.parent().unwrap().exists());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_secs(0, 60), 5);
        assert_eq!(backoff_secs(1, 60), 10);
        assert_eq!(backoff_secs(3, 60), 40);
        assert_eq!(backoff_secs(4, 60), 60);
        assert_eq!(backoff_secs(20, 0), 5 * 1024);
    }

    #[tokio::test]
    async fn snapshot_upserts() {
        let pool = setup_pool().await;
        assert!(load_snapshot(&pool, "k").await.unwrap().is_none());
        save_snapshot(&pool, "k", "one").await.unwrap();
        save_snapshot(&pool, "k", "two").await.unwrap();
        assert_eq!(load_snapshot(&pool, "k").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn queue_is_fifo_and_backoff_blocks_head() {
        let pool = setup_pool().await;
        enqueue_write(&pool, "settings", None, &patch("#111111"), 1)
            .await
            .unwrap();
        enqueue_write(&pool, "settings", Some("s-1"), &patch("#222222"), 2)
            .await
            .unwrap();

        let head = next_pending_write(&pool).await.unwrap().unwrap();
        assert_eq!(head.version, 1);
        assert_eq!(head.document_id, None);
        assert_eq!(head.patch, patch("#111111"));

        backoff_write_with_cap(&pool, head.id, head.attempt, 60)
            .await
            .unwrap();
        assert!(next_pending_write(&pool).await.unwrap().is_none());
        assert_eq!(count_pending_writes(&pool).await.unwrap(), 2);

        assign_document_id(&pool, "settings", "s-1").await.unwrap();
        let all = list_pending_writes(&pool).await.unwrap();
        assert_eq!(all[0].attempt, 1);
        assert_eq!(all[0].document_id.as_deref(), Some("s-1"));

        delete_write(&pool, head.id).await.unwrap();
        let head = next_pending_write(&pool).await.unwrap().unwrap();
        assert_eq!(head.version, 2);
    }
}
