//! Embedding infrastructure for semantic routing (§4.7).
//!
//! Pluggable embedding providers (TF-IDF here; an ONNX or API-backed
//! provider can implement the same trait) produce vectors from text. The
//! `EmbeddingIndex` stores pre-embedded listener descriptions and answers
//! similarity queries over them.

use std::cmp::Ordering;

/// A single embedding vector.
pub type Embedding = Vec<f32>;

/// Embeds text into vectors. Pluggable so the fabric isn't committed to
/// one embedding strategy.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Embedding;
    fn dimensions(&self) -> usize;
}

/// One candidate from a similarity search.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub name: String,
    pub score: f32,
}

/// Cosine similarity between two vectors. Computes the full formula (not
/// just a dot product) so non-normalized vectors are handled safely.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Index of pre-embedded listener descriptions for similarity search.
pub struct EmbeddingIndex {
    entries: Vec<(String, Embedding)>,
    threshold: f32,
}

impl EmbeddingIndex {
    pub fn new(threshold: f32) -> Self {
        Self {
            entries: Vec::new(),
            threshold,
        }
    }

    /// Register a handler with its pre-computed embedding. Replaces any
    /// existing entry under the same name — this is the hook hot-reload
    /// uses to refresh the index without rebuilding it from scratch.
    pub fn register(&mut self, name: &str, embedding: Embedding) {
        self.entries.retain(|(n, _)| n != name);
        self.entries.push((name.to_string(), embedding));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| n != name);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The best match above threshold, unfiltered.
    pub fn search(&self, query: &Embedding) -> Option<MatchResult> {
        self.rank(query).into_iter().next()
    }

    /// The best match above threshold, restricted to `allowed` names.
    /// An empty `allowed` list yields no match — the structural-denial
    /// invariant applies here too: no permitted handlers means nothing is
    /// reachable regardless of similarity score.
    pub fn search_filtered(&self, query: &Embedding, allowed: &[String]) -> Option<MatchResult> {
        if allowed.is_empty() {
            return None;
        }
        self.rank(query)
            .into_iter()
            .find(|m| allowed.iter().any(|a| a == &m.name))
    }

    /// Every entry at or above threshold, sorted by descending score. This
    /// is the rank step (§4.7): the router masks this list by the caller's
    /// permitted-handler set before ever calling the form filler, so a
    /// higher-scoring but disallowed candidate never reaches it.
    pub fn rank(&self, query: &Embedding) -> Vec<MatchResult> {
        let mut results: Vec<MatchResult> = self
            .entries
            .iter()
            .map(|(name, emb)| MatchResult {
                name: name.clone(),
                score: cosine_similarity(query, emb),
            })
            .filter(|r| r.score >= self.threshold)
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results
    }

    /// Top `k` matches, for observability rather than dispatch decisions.
    pub fn search_top_k(&self, query: &Embedding, k: usize) -> Vec<MatchResult> {
        let mut results = self.rank(query);
        results.truncate(k);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::super::tfidf::TfIdfProvider;
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn index_register_and_search() {
        let docs = vec![
            "read write manage files on the local filesystem source code configuration",
            "execute shell commands run programs compile code run tests",
        ];
        let provider = TfIdfProvider::from_corpus(&docs);
        let mut index = EmbeddingIndex::new(0.1);
        index.register("file-ops", provider.embed(docs[0]));
        index.register("shell", provider.embed(docs[1]));

        let query = provider.embed("read the source code file");
        let result = index.search(&query);
        assert_eq!(result.unwrap().name, "file-ops");
    }

    #[test]
    fn rank_returns_full_descending_list() {
        let docs = vec![
            "read write manage files on the local filesystem",
            "execute shell commands run programs",
            "search for code symbols",
        ];
        let provider = TfIdfProvider::from_corpus(&docs);
        let mut index = EmbeddingIndex::new(0.0);
        for (i, doc) in docs.iter().enumerate() {
            index.register(&format!("tool-{i}"), provider.embed(doc));
        }
        let query = provider.embed("search code files");
        let ranked = index.rank(&query);
        assert_eq!(ranked.len(), 3);
        for w in ranked.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[test]
    fn search_filtered_respects_allowlist() {
        let docs = vec![
            "read write manage files on the local filesystem source code configuration",
            "execute shell commands run programs compile code run tests",
        ];
        let provider = TfIdfProvider::from_corpus(&docs);
        let mut index = EmbeddingIndex::new(0.05);
        index.register("file-ops", provider.embed(docs[0]));
        index.register("shell", provider.embed(docs[1]));

        let query = provider.embed("execute shell commands run programs compile");
        let allowed = vec!["file-ops".to_string()];
        let result = index.search_filtered(&query, &allowed);
        if let Some(r) = &result {
            assert_ne!(r.name, "shell");
        }
    }

    #[test]
    fn search_filtered_empty_allowlist_never_matches() {
        let docs = vec!["read files from the filesystem"];
        let provider = TfIdfProvider::from_corpus(&docs);
        let mut index = EmbeddingIndex::new(0.05);
        index.register("file-ops", provider.embed(docs[0]));

        let query = provider.embed("read files");
        let empty: Vec<String> = vec![];
        assert!(index.search_filtered(&query, &empty).is_none());
    }

    #[test]
    fn remove_drops_entry() {
        let docs = vec!["read files from the filesystem"];
        let provider = TfIdfProvider::from_corpus(&docs);
        let mut index = EmbeddingIndex::new(0.1);
        index.register("file-ops", provider.embed(docs[0]));
        assert_eq!(index.len(), 1);
        index.remove("file-ops");
        assert_eq!(index.len(), 0);
    }
}
