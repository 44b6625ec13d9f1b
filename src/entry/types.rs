use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

// Accepts a YAML sequence, a single scalar, or null for list-valued keys
fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Sequence(seq) => seq
            .into_iter()
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => Ok(s),
                Value::Number(n) => Ok(n.to_string()),
                Value::Bool(b) => Ok(b.to_string()),
                _ => Err(Error::custom("expected a list of strings")),
            })
            .collect(),
        _ => Err(Error::custom("expected a list of strings")),
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// Front-matter of one entry: everything the index keeps except the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_color: Option<String>,

    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub tags: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub attachments: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub replies: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_reply: bool,

    #[serde(default, rename = "isAI", deserialize_with = "deserialize_flag")]
    pub is_ai: bool,

    /// Lives in the embedding sidecar, never in the entry file.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,

    // Keys written by other versions of the app survive a save
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl EntryMetadata {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            title: String::new(),
            created_at: now,
            updated_at: now,
            highlight: None,
            highlight_color: None,
            tags: Vec::new(),
            attachments: Vec::new(),
            replies: Vec::new(),
            is_reply: false,
            is_ai: false,
            embedding: None,
            extra: BTreeMap::new(),
        }
    }

    /// Drop duplicate tags and replies, keeping first occurrence order.
    pub fn normalize(&mut self) {
        dedup_in_order(&mut self.tags);
        dedup_in_order(&mut self.replies);
    }

    pub fn add_tag(&mut self, tag: &str) -> bool {
        if self.tags.iter().any(|t| t == tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        before != self.tags.len()
    }

    pub fn has_reply(&self, path: &str) -> bool {
        self.replies.iter().any(|r| r == path)
    }
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

/// One journal post or reply, body included.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub path: String,
    pub content: String,
    pub metadata: EntryMetadata,
}

/// Partial metadata update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPatch {
    pub title: Option<String>,
    pub highlight: Option<Option<String>>,
    pub highlight_color: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub attachments: Option<Vec<String>>,
    pub replies: Option<Vec<String>>,
    pub is_reply: Option<bool>,
    #[serde(rename = "isAI")]
    pub is_ai: Option<bool>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge into `meta`. `createdAt` is never touched and `isReply` only moves false -> true.
    pub fn apply(&self, meta: &mut EntryMetadata) {
        if let Some(title) = &self.title {
            meta.title = title.clone();
        }
        if let Some(highlight) = &self.highlight {
            meta.highlight = highlight.clone();
        }
        if let Some(color) = &self.highlight_color {
            meta.highlight_color = color.clone();
        }
        if let Some(tags) = &self.tags {
            meta.tags = tags.clone();
        }
        if let Some(attachments) = &self.attachments {
            meta.attachments = attachments.clone();
        }
        if let Some(replies) = &self.replies {
            meta.replies = replies.clone();
        }
        if self.is_reply == Some(true) {
            meta.is_reply = true;
        }
        if let Some(is_ai) = self.is_ai {
            meta.is_ai = is_ai;
        }
        meta.normalize();
    }
}
