pub mod tokenizer;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use tokenizer::tokenize;

const SNIPPET_LEN: usize = 150;

/// One hit of a full-text query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    #[serde(rename = "ref")]
    pub path: String,
    pub score: f32,
    pub snippet: String,
}

#[derive(Debug, Clone)]
struct SearchDocument {
    terms: BTreeMap<String, u32>,
    text: String,
    recency: DateTime<Utc>,
}

/// In-memory inverted index over the plain text of entries.
#[derive(Debug, Clone, Default)]
pub struct SearchEngine {
    // term -> path -> term frequency
    postings: HashMap<String, HashMap<String, u32>>,
    documents: HashMap<String, SearchDocument>,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything indexed for `path` with the tokens of `text`.
    pub fn index_entry(&mut self, path: &str, text: &str, recency: DateTime<Utc>) {
        self.remove_entry(path);

        let mut terms: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokenize(text) {
            *terms.entry(token).or_insert(0) += 1;
        }

        for (term, tf) in &terms {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(path.to_string(), *tf);
        }

        self.documents.insert(
            path.to_string(),
            SearchDocument {
                terms,
                text: text.to_string(),
                recency,
            },
        );
    }

    pub fn remove_entry(&mut self, path: &str) {
        let Some(doc) = self.documents.remove(path) else {
            return;
        };
        for term in doc.terms.keys() {
            if let Some(paths) = self.postings.get_mut(term) {
                paths.remove(path);
                if paths.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.documents.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn clear(&mut self) {
        self.postings.clear();
        self.documents.clear();
    }

    /// Term frequencies recorded for one entry.
    pub fn document_terms(&self, path: &str) -> Option<&BTreeMap<String, u32>> {
        self.documents.get(path).map(|doc| &doc.terms)
    }

    pub fn document_text(&self, path: &str) -> Option<&str> {
        self.documents.get(path).map(|doc| doc.text.as_str())
    }

    /// Number of distinct terms across all postings.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Empty query: every indexed entry, newest first, score 0.
    /// Otherwise entries matching any query token, ranked by summed term frequency.
    pub fn search(&self, query: &str) -> Vec<SearchResult> {
        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        if query.trim().is_empty() {
            let mut all: Vec<(&String, &SearchDocument)> = self.documents.iter().collect();
            all.sort_by(|a, b| b.1.recency.cmp(&a.1.recency).then_with(|| a.0.cmp(b.0)));
            return all
                .into_iter()
                .map(|(path, doc)| SearchResult {
                    path: path.clone(),
                    score: 0.0,
                    snippet: extract_snippet(&doc.text, "", SNIPPET_LEN),
                })
                .collect();
        }

        let mut scores: HashMap<&str, u32> = HashMap::new();
        for term in &query_terms {
            if let Some(paths) = self.postings.get(term) {
                for (path, tf) in paths {
                    *scores.entry(path.as_str()).or_insert(0) += tf;
                }
            }
        }

        let mut hits: Vec<(&str, u32, &SearchDocument)> = scores
            .into_iter()
            .filter_map(|(path, score)| self.documents.get(path).map(|doc| (path, score, doc)))
            .collect();
        hits.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| b.2.recency.cmp(&a.2.recency))
                .then_with(|| a.0.cmp(b.0))
        });

        log::debug!("[Search] '{}' matched {} entries", query, hits.len());

        hits.into_iter()
            .map(|(path, score, doc)| SearchResult {
                path: path.to_string(),
                score: score as f32,
                snippet: extract_snippet(&doc.text, query, SNIPPET_LEN),
            })
            .collect()
    }
}

/// Up to `max_len` characters of `text` around the first occurrence of any query word.
pub fn extract_snippet(text: &str, query: &str, max_len: usize) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text_lower = text.to_lowercase();
    // Byte offsets of the lowercased text only line up when lowercasing kept lengths
    let searchable = text_lower.len() == text.len();

    let match_pos = query
        .split_whitespace()
        .filter(|_| searchable)
        .filter_map(|term| text_lower.find(&term.to_lowercase()))
        .min();

    match match_pos {
        Some(byte_pos) => {
            let char_pos = text[..byte_pos].chars().count();
            let start = char_pos.saturating_sub(max_len / 3);
            let snippet: String = text.chars().skip(start).take(max_len).collect();
            let trimmed = snippet.trim();
            if start > 0 {
                format!("...{}", trimmed)
            } else {
                trimmed.to_string()
            }
        }
        None => text.chars().take(max_len).collect::<String>().trim().to_string(),
    }
}
