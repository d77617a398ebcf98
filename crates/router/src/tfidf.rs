//! TF-IDF embedding provider — pure Rust, no model weights to ship.
//!
//! Tokenizes text, builds IDF from a corpus of listener descriptions, and
//! produces TF-IDF vectors normalized to unit length for cosine similarity.

use std::collections::HashMap;

use crate::embedding::{Embedding, EmbeddingProvider};

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "it", "in", "on", "of", "to", "and", "or", "for", "with", "this",
    "that", "be", "are", "was", "were", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "can", "shall", "not", "no",
    "but", "if", "at", "by", "from", "as", "into", "about", "up", "out", "so", "its", "you",
    "your", "i", "my", "we", "our", "they", "them", "their", "he", "she", "his", "her",
];

/// Builds a vocabulary and IDF weights from a corpus of documents, then
/// embeds text as sparse TF-IDF vectors normalized to unit length.
#[derive(Clone)]
pub struct TfIdfProvider {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    dims: usize,
}

impl TfIdfProvider {
    pub fn from_corpus(documents: &[&str]) -> Self {
        let n = documents.len() as f32;
        if documents.is_empty() {
            return Self {
                vocabulary: HashMap::new(),
                idf: Vec::new(),
                dims: 0,
            };
        }

        let tokenized: Vec<Vec<String>> = documents.iter().map(|d| tokenize(d)).collect();

        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for tokens in &tokenized {
            let unique: std::collections::HashSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
            for term in unique {
                *doc_freq.entry(term.to_string()).or_insert(0) += 1;
                if !vocabulary.contains_key(term) {
                    let idx = vocabulary.len();
                    vocabulary.insert(term.to_string(), idx);
                }
            }
        }

        let dims = vocabulary.len();
        let mut idf = vec![0.0f32; dims];
        for (term, &idx) in &vocabulary {
            let df = *doc_freq.get(term).unwrap_or(&0) as f32;
            idf[idx] = (n / df.max(1.0)).ln() + 1.0;
        }

        Self { vocabulary, idf, dims }
    }

    /// Rebuild from an updated corpus — the hot-reload hook: a fresh
    /// `SecurityResolver` generation comes with a fresh listener set, and
    /// the provider's vocabulary needs to track it.
    pub fn rebuild(&mut self, documents: &[&str]) {
        let new = Self::from_corpus(documents);
        self.vocabulary = new.vocabulary;
        self.idf = new.idf;
        self.dims = new.dims;
    }
}

impl EmbeddingProvider for TfIdfProvider {
    fn embed(&self, text: &str) -> Embedding {
        if self.dims == 0 {
            return vec![];
        }

        let tokens = tokenize(text);
        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let mut vector = vec![0.0f32; self.dims];
        for (term, &count) in &tf {
            if let Some(&idx) = self.vocabulary.get(*term) {
                vector[idx] = count * self.idf[idx];
            }
        }
        normalize(&mut vector);
        vector
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && w.len() > 1)
        .filter(|w| !STOP_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
