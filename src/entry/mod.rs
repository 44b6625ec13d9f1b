pub mod text;
pub mod types;

use types::{Entry, EntryMetadata};

use crate::error::{PileError, Result};

/// Split front-matter and body from stored entry text.
pub fn split_frontmatter_body(content: &str) -> (Option<&str>, &str) {
    if content.starts_with("---") {
        if let Some(end_idx) = content[3..].find("\n---") {
            let frontmatter = content[3..end_idx + 3].trim_matches(|c: char| c == '\n' || c == '\r');
            let body_start = end_idx + 3 + 4; // skip "\n---"
            let body = if body_start < content.len() {
                content[body_start..].trim_start_matches(|c: char| c == '\r' || c == '\n')
            } else {
                ""
            };
            return (Some(frontmatter), body);
        }
    }
    (None, content)
}

pub struct EntryParser;

impl EntryParser {
    /// Parse a stored entry. A file without a front-matter block is not an entry.
    pub fn parse(path: &str, raw: &str) -> Result<Entry> {
        let (frontmatter, body) = split_frontmatter_body(raw);
        let yaml = frontmatter.ok_or_else(|| PileError::parse(path, "missing front-matter block"))?;
        let metadata = Self::parse_metadata(path, yaml)?;

        Ok(Entry {
            path: path.to_string(),
            content: body.to_string(),
            metadata,
        })
    }

    pub fn parse_metadata(path: &str, yaml: &str) -> Result<EntryMetadata> {
        let mut metadata: EntryMetadata =
            serde_yaml::from_str(yaml).map_err(|e| PileError::parse(path, e))?;
        metadata.normalize();
        Ok(metadata)
    }

    pub fn to_yaml(metadata: &EntryMetadata) -> Result<String> {
        Ok(serde_yaml::to_string(metadata)?)
    }

    /// Combine metadata and body into the stored text form.
    pub fn serialize(metadata: &EntryMetadata, content: &str) -> Result<String> {
        let yaml = Self::to_yaml(metadata)?;
        Ok(format!("---\n{}\n---\n\n{}", yaml.trim(), content))
    }

    pub fn serialize_entry(entry: &Entry) -> Result<String> {
        Self::serialize(&entry.metadata, &entry.content)
    }
}
