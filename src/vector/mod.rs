use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorMatch {
    #[serde(rename = "ref")]
    pub path: String,
    pub score: f32,
}

/// Cosine similarity. Zero-length or mismatched vectors score 0.
pub fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom < 1e-10 {
        0.0
    } else {
        dot / denom
    }
}

/// Brute-force nearest-neighbour search over entry embeddings.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    vectors: HashMap<String, Vec<f32>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_embedding(&mut self, path: &str, vector: Vec<f32>) {
        if vector.is_empty() {
            self.vectors.remove(path);
            return;
        }
        self.vectors.insert(path.to_string(), vector);
    }

    pub fn remove_embedding(&mut self, path: &str) {
        self.vectors.remove(path);
    }

    pub fn get(&self, path: &str) -> Option<&[f32]> {
        self.vectors.get(path).map(|v| v.as_slice())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.vectors.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn clear(&mut self) {
        self.vectors.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<f32>)> {
        self.vectors.iter()
    }

    /// Top `top_n` entries by cosine similarity, best first.
    /// Entries whose dimension differs from the query are left out.
    pub fn query(&self, vector: &[f32], top_n: usize) -> Vec<VectorMatch> {
        if vector.is_empty() || top_n == 0 {
            return Vec::new();
        }

        let mut matches: Vec<VectorMatch> = self
            .vectors
            .par_iter()
            .filter(|(_, v)| v.len() == vector.len())
            .map(|(path, v)| VectorMatch {
                path: path.clone(),
                score: cosine_sim(vector, v),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        matches.truncate(top_n);
        matches
    }
}
