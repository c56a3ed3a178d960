use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, Debug)]
pub struct FindResp {
    #[serde(default)]
    pub documents: Vec<Value>,
}

#[derive(Deserialize, Debug)]
pub struct FindByIdResp {
    pub document: Value,
}

#[derive(Deserialize, Debug)]
pub struct InsertResp {
    pub id: String,
}

/// Outcome of a conditional update.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

impl UpdateResult {
    pub fn matched(&self) -> bool {
        self.matched_count > 0
    }
}
