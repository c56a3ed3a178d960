//! The singleton settings document on the backend.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::collection::DocumentCollection;
use crate::model::{Settings, SettingsPatch};

/// Fetch the settings document, creating it from defaults on first access.
#[instrument(skip(coll))]
pub async fn get_or_create(coll: &dyn DocumentCollection, collection: &str) -> Result<Settings> {
    let docs = coll
        .find(collection, json!({}))
        .await
        .context("failed to query settings")?;
    if let Some(doc) = docs.into_iter().next() {
        return serde_json::from_value(doc).context("malformed settings document");
    }

    let mut settings = Settings::default();
    let document = serde_json::to_value(&settings)?;
    let id = coll
        .insert_one(collection, document)
        .await
        .context("failed to create settings")?;
    info!(%id, "created default settings document");
    settings.id = Some(id);
    Ok(settings)
}

/// Partial update of the settings document `id`.
#[instrument(skip(coll, patch))]
pub async fn push_patch(
    coll: &dyn DocumentCollection,
    collection: &str,
    id: &str,
    patch: &SettingsPatch,
) -> Result<()> {
    let set: Value = serde_json::to_value(patch)?;
    let res = coll
        .update_one(collection, json!({ "id": id }), set)
        .await
        .context("failed to update settings")?;
    if !res.matched() {
        return Err(anyhow!("settings document {} not found", id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;

    #[tokio::test]
    async fn creates_once_then_reads_back() {
        let coll = MemoryCollection::new();
        let first = get_or_create(&coll, "settings").await.unwrap();
        assert!(first.id.is_some());
        let second = get_or_create(&coll, "settings").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(coll.documents("settings").len(), 1);
    }

    #[tokio::test]
    async fn push_patch_updates_only_given_fields() {
        let coll = MemoryCollection::new();
        let s = get_or_create(&coll, "settings").await.unwrap();
        let id = s.id.clone().unwrap();
        let patch = SettingsPatch {
            accent_color: Some("#ff0000".into()),
            ..Default::default()
        };
        push_patch(&coll, "settings", &id, &patch).await.unwrap();

        let after = get_or_create(&coll, "settings").await.unwrap();
        assert_eq!(after.accent_color, "#ff0000");
        assert_eq!(after.text_color, s.text_color);

        assert!(push_patch(&coll, "settings", "missing", &patch).await.is_err());
    }
}
