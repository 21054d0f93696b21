use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What kind of local mutation produced a record.
///
/// Remote items only ever report `Deleted` or `Unchanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Created,
    Updated,
    Deleted,
    Unchanged,
}

#[derive(Debug, Error)]
#[error("unknown item status: {0}")]
pub struct UnknownStatus(pub String);

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Created => "C",
            ItemStatus::Updated => "U",
            ItemStatus::Deleted => "D",
            ItemStatus::Unchanged => "N",
        }
    }

    pub fn parse(value: &str) -> Result<Self, UnknownStatus> {
        match value {
            "C" => Ok(ItemStatus::Created),
            "U" => Ok(ItemStatus::Updated),
            "D" => Ok(ItemStatus::Deleted),
            "N" => Ok(ItemStatus::Unchanged),
            other => Err(UnknownStatus(other.to_string())),
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, ItemStatus::Deleted)
    }
}

/// Local or remote view of one logical file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub status: ItemStatus,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds. Not guaranteed monotonic across observations.
    pub modified_at: i64,
    pub size: u64,
}

impl Item {
    pub fn new(key: impl Into<String>, status: ItemStatus, modified_at: i64) -> Self {
        Self {
            key: key.into(),
            status,
            created_at: modified_at,
            modified_at,
            size: 0,
        }
    }
}

/// Remote container for items, resolved from the first key segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub project_id: String,
    pub name: String,
}

/// An [`Item`] as the provider sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub provider_id: String,
    pub group_id: String,
    pub key: String,
    pub status: ItemStatus,
    pub created_at: i64,
    pub modified_at: i64,
    pub size: u64,
    pub content: Option<Vec<u8>>,
}

impl RemoteItem {
    pub fn is_deleted(&self) -> bool {
        self.status.is_deleted()
    }
}

/// Splits `"group/rest/of/key"` into the group name and the remainder.
pub(crate) fn split_group(key: &str) -> Option<(&str, &str)> {
    let (group, rest) = key.split_once('/')?;
    if group.is_empty() || rest.is_empty() {
        return None;
    }
    Some((group, rest))
}
