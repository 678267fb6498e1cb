//! Long-term associative memory with retrieval gating.
//!
//! Texts accumulate in a pending buffer until [`LongTermMemory::index`]
//! flushes them — chunked into token windows and regrouped under the
//! indexer's byte cap — into the underlying engine. Retrieval goes through a
//! "need-to-retrieve" check: when the conversation has not drifted away from
//! the last result set, the cached set is returned and the engine is not
//! touched.

use std::sync::Arc;
use tracing::{debug, info};

use crate::llm::embeddings::TextEmbedder;
use crate::memory::chunk::{
    regroup_batches, Chunker, ADD_WINDOW_TOKENS, MAX_BATCH_BYTES, QUERY_WINDOW_TOKENS,
    WINDOW_OVERLAP_TOKENS,
};
use crate::memory::index::{cosine_similarity, AssociativeIndex, IndexError};

/// A fresh retrieval is issued when the query-to-cache similarity falls
/// below this fraction of the baseline.
const RETRIEVE_DRIFT_RATIO: f32 = 0.8;

pub struct LongTermMemory {
    index: Arc<dyn AssociativeIndex>,
    embedder: Arc<dyn TextEmbedder>,
    chunker: Chunker,
    pending: Vec<String>,
    cached_docs: Vec<String>,
    cached_doc_mean: Vec<f32>,
    baseline_similarity: f32,
}

impl LongTermMemory {
    pub fn new(
        index: Arc<dyn AssociativeIndex>,
        embedder: Arc<dyn TextEmbedder>,
        chunker: Chunker,
    ) -> Self {
        Self {
            index,
            embedder,
            chunker,
            pending: Vec::new(),
            cached_docs: Vec::new(),
            cached_doc_mean: Vec::new(),
            baseline_similarity: 0.0,
        }
    }

    /// Buffer texts for the next [`index`](Self::index) flush.
    pub fn add_texts<I, S>(&mut self, texts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for text in texts {
            let text = text.into();
            if !text.trim().is_empty() {
                self.pending.push(text);
            }
        }
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    /// Flush the pending buffer into the underlying engine.
    pub async fn index(&mut self) -> Result<(), IndexError> {
        if self.pending.is_empty() {
            debug!("no pending texts to index");
            return Ok(());
        }
        let joined = self.pending.join("\n");
        let chunks = self
            .chunker
            .split(&joined, ADD_WINDOW_TOKENS, WINDOW_OVERLAP_TOKENS);
        let batch_count = chunks.len();
        for batch in regroup_batches(chunks, MAX_BATCH_BYTES) {
            self.index.add_texts(&batch).await?;
        }
        info!("indexed {} pending chunks", batch_count);
        self.pending.clear();
        Ok(())
    }

    /// Gated retrieval: reuse the cached result set while the topic holds.
    pub async fn retrieve(
        &mut self,
        queries: &[String],
        k: usize,
    ) -> Result<Vec<String>, IndexError> {
        let split_queries: Vec<String> = queries
            .iter()
            .flat_map(|q| {
                self.chunker
                    .split(q, QUERY_WINDOW_TOKENS, WINDOW_OVERLAP_TOKENS)
            })
            .collect();
        if split_queries.is_empty() {
            return Ok(Vec::new());
        }

        let query_vectors = self.embedder.embed(&split_queries).await;
        let query_mean = mean_vector(&query_vectors);

        if !self.cached_docs.is_empty() && self.baseline_similarity > 0.0 {
            let current = cosine_similarity(&query_mean, &self.cached_doc_mean);
            if current >= RETRIEVE_DRIFT_RATIO * self.baseline_similarity {
                debug!(
                    "retrieval gate closed (similarity {:.3} ≥ 0.8 × {:.3})",
                    current, self.baseline_similarity
                );
                return Ok(self.cached_docs.clone());
            }
        }

        let docs = self.index.retrieve(&split_queries, k).await?;
        if docs.is_empty() {
            self.cached_docs.clear();
            self.cached_doc_mean.clear();
            self.baseline_similarity = 0.0;
        } else {
            let doc_vectors = self.embedder.embed(&docs).await;
            let doc_mean = mean_vector(&doc_vectors);
            self.baseline_similarity = cosine_similarity(&query_mean, &doc_mean);
            self.cached_doc_mean = doc_mean;
            self.cached_docs = docs.clone();
        }
        Ok(docs)
    }

    /// Wipe the engine, the pending buffer and the gate state.
    pub async fn clear(&mut self) -> Result<(), IndexError> {
        self.index.clear().await?;
        self.pending.clear();
        self.cached_docs.clear();
        self.cached_doc_mean.clear();
        self.baseline_similarity = 0.0;
        Ok(())
    }
}

/// Element-wise mean; shorter vectors are zero-padded to the longest.
fn mean_vector(vectors: &[Vec<f32>]) -> Vec<f32> {
    let dim = vectors.iter().map(Vec::len).max().unwrap_or(0);
    let mut mean = vec![0.0f32; dim];
    if dim == 0 || vectors.is_empty() {
        return mean;
    }
    for vector in vectors {
        for (i, v) in vector.iter().enumerate() {
            mean[i] += v;
        }
    }
    for v in &mut mean {
        *v /= vectors.len() as f32;
    }
    mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine stub: counts retrieve calls, returns a canned result set.
    struct StubIndex {
        docs: Vec<String>,
        retrieve_calls: AtomicUsize,
        added: std::sync::Mutex<Vec<String>>,
    }

    impl StubIndex {
        fn new(docs: Vec<String>) -> Self {
            Self {
                docs,
                retrieve_calls: AtomicUsize::new(0),
                added: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AssociativeIndex for StubIndex {
        async fn add_texts(&self, texts: &[String]) -> Result<(), IndexError> {
            self.added.lock().unwrap().extend_from_slice(texts);
            Ok(())
        }
        async fn retrieve(&self, _queries: &[String], _k: usize) -> Result<Vec<String>, IndexError> {
            self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.docs.clone())
        }
        async fn clear(&self) -> Result<(), IndexError> {
            Ok(())
        }
    }

    /// Embedder stub: "cat" and "dog" texts live on orthogonal axes.
    struct AxisEmbedder;

    #[async_trait]
    impl TextEmbedder for AxisEmbedder {
        async fn embed(&self, inputs: &[String]) -> Vec<Vec<f32>> {
            inputs
                .iter()
                .map(|t| {
                    if t.contains("dog") {
                        vec![0.0, 1.0]
                    } else {
                        vec![1.0, 0.0]
                    }
                })
                .collect()
        }
    }

    /// Embedder stub simulating total backend failure.
    struct FailingEmbedder;

    #[async_trait]
    impl TextEmbedder for FailingEmbedder {
        async fn embed(&self, inputs: &[String]) -> Vec<Vec<f32>> {
            inputs.iter().map(|_| vec![0.0]).collect()
        }
    }

    fn memory_with(index: Arc<StubIndex>) -> LongTermMemory {
        LongTermMemory::new(index, Arc::new(AxisEmbedder), Chunker::approximate())
    }

    #[tokio::test]
    async fn repeated_identical_queries_hit_the_index_once() {
        let stub = Arc::new(StubIndex::new(vec!["cat memory".into()]));
        let mut memory = memory_with(stub.clone());

        let q = vec!["tell me about the cat".to_string()];
        let first = memory.retrieve(&q, 3).await.unwrap();
        let second = memory.retrieve(&q, 3).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            stub.retrieve_calls.load(Ordering::SeqCst),
            1,
            "second call must short-circuit through the gate"
        );
    }

    #[tokio::test]
    async fn empty_prior_doc_set_always_hits_the_index() {
        let stub = Arc::new(StubIndex::new(Vec::new()));
        let mut memory = memory_with(stub.clone());

        let q = vec!["cat".to_string()];
        memory.retrieve(&q, 3).await.unwrap();
        memory.retrieve(&q, 3).await.unwrap();
        assert_eq!(stub.retrieve_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn topic_drift_reopens_the_gate() {
        let stub = Arc::new(StubIndex::new(vec!["cat memory".into()]));
        let mut memory = memory_with(stub.clone());

        memory.retrieve(&["the cat".to_string()], 3).await.unwrap();
        // Orthogonal topic: similarity collapses below 0.8 × baseline.
        memory.retrieve(&["the dog".to_string()], 3).await.unwrap();
        assert_eq!(stub.retrieve_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn embedding_failure_forces_fresh_retrieval() {
        let stub = Arc::new(StubIndex::new(vec!["doc".into()]));
        let mut memory =
            LongTermMemory::new(stub.clone(), Arc::new(FailingEmbedder), Chunker::approximate());

        let q = vec!["anything".to_string()];
        memory.retrieve(&q, 3).await.unwrap();
        // Baseline is zero — no similarity information, so retrieve again.
        memory.retrieve(&q, 3).await.unwrap();
        assert_eq!(stub.retrieve_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn index_flushes_and_clears_pending() {
        let stub = Arc::new(StubIndex::new(Vec::new()));
        let mut memory = memory_with(stub.clone());

        memory.add_texts(["alice: 'hi'".to_string(), "bob: 'yo'".to_string()]);
        assert_eq!(memory.pending().len(), 2);
        memory.index().await.unwrap();

        assert!(memory.pending().is_empty());
        let added = stub.added.lock().unwrap().join("\n");
        assert!(added.contains("alice: 'hi'"));
        assert!(added.contains("bob: 'yo'"));
    }

    #[tokio::test]
    async fn blank_texts_are_not_buffered() {
        let stub = Arc::new(StubIndex::new(Vec::new()));
        let mut memory = memory_with(stub);
        memory.add_texts(["  ".to_string(), String::new()]);
        assert!(memory.pending().is_empty());
    }

    #[tokio::test]
    async fn clear_resets_gate_state() {
        let stub = Arc::new(StubIndex::new(vec!["cat memory".into()]));
        let mut memory = memory_with(stub.clone());

        let q = vec!["cat".to_string()];
        memory.retrieve(&q, 3).await.unwrap();
        memory.clear().await.unwrap();
        memory.retrieve(&q, 3).await.unwrap();
        // Cache was dropped, so the second retrieve hits the engine again.
        assert_eq!(stub.retrieve_calls.load(Ordering::SeqCst), 2);
    }
}
