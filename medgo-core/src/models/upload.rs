use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Stored,
    Indexing,
    Indexed,
    Failed,
    /// Any status this client does not know; polled like a pending one.
    #[serde(other)]
    Unknown,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Indexed | UploadStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResource {
    #[serde(alias = "upload_id")]
    pub id: String,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Normalized upload listing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UploadPage {
    pub items: Vec<UploadResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl UploadPage {
    /// Accepts either a bare array or `{items|uploads, total?, limit?, offset?}`.
    /// Entries that fail to decode are dropped.
    pub fn normalize(value: &Value) -> Self {
        let decode_items = |raw: &Vec<Value>| -> Vec<UploadResource> {
            raw.iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        };

        match value {
            Value::Array(raw) => Self {
                items: decode_items(raw),
                ..Self::default()
            },
            Value::Object(obj) => {
                let items = obj
                    .get("items")
                    .and_then(Value::as_array)
                    .or_else(|| obj.get("uploads").and_then(Value::as_array))
                    .map(decode_items)
                    .unwrap_or_default();
                Self {
                    items,
                    total: obj.get("total").and_then(Value::as_u64),
                    limit: obj.get("limit").and_then(Value::as_u64),
                    offset: obj.get("offset").and_then(Value::as_u64),
                }
            }
            _ => Self::default(),
        }
    }

    pub fn all_terminal(&self) -> bool {
        self.items.iter().all(|it| it.status.is_terminal())
    }
}
