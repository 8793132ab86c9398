//! End-to-end tests of indexing and question answering with in-process fakes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docqa_rag::{
    AnswerGenerator, Candidate, Document, EmbeddingProvider, IndexSlot, IndexStatus, RagConfig,
    RagError, RagPipeline, RerankScore, Reranker, Result, RetryPolicy, Similarity, VectorIndex,
};

const DIM: usize = 16;

/// Bag-of-words embedder: every word bumps one of `DIM` buckets.
#[derive(Default)]
struct WordEmbedder {
    calls: AtomicUsize,
    /// Number of leading calls that fail with a transient error.
    failures: AtomicUsize,
}

impl WordEmbedder {
    fn flaky(failures: usize) -> Self {
        Self { calls: AtomicUsize::new(0), failures: AtomicUsize::new(failures) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIM];
        for word in text.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            if word.is_empty() {
                continue;
            }
            let bucket = word.bytes().fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            vector[bucket % DIM] += 1.0;
        }
        vector[DIM - 1] += 0.01;
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for WordEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RagError::EmbeddingError {
                provider: "words".into(),
                message: "503 Service Unavailable".into(),
                transient: true,
            });
        }
        Ok(texts.iter().map(|t| Self::embed(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn name(&self) -> &str {
        "words"
    }
}

/// Keeps at most `limit` candidates in reverse retrieval order.
struct ReversingReranker {
    limit: usize,
}

#[async_trait]
impl Reranker for ReversingReranker {
    async fn rerank(&self, _query: &str, candidates: &[Candidate]) -> Result<Vec<RerankScore>> {
        Ok(candidates
            .iter()
            .rev()
            .take(self.limit)
            .enumerate()
            .map(|(i, c)| RerankScore { id: c.id, score: 10.0 - i as f32 })
            .collect())
    }

    fn name(&self) -> &str {
        "reversing"
    }
}

/// Records every input and answers with a digest of it.
#[derive(Default)]
struct RecordingGenerator {
    inputs: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnswerGenerator for RecordingGenerator {
    async fn generate(&self, system_instruction: &str, input: &str) -> Result<String> {
        assert!(!system_instruction.is_empty());
        self.inputs.lock().unwrap().push(input.to_string());
        Ok(format!("answer from {} context lines", input.matches("Context:").count()))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

struct Harness {
    pipeline: RagPipeline,
    embedder: Arc<WordEmbedder>,
    generator: Arc<RecordingGenerator>,
}

fn harness_with(config: RagConfig, embedder: WordEmbedder, rerank_limit: usize) -> Harness {
    let embedder = Arc::new(embedder);
    let generator = Arc::new(RecordingGenerator::default());
    let pipeline = RagPipeline::builder()
        .config(config)
        .embedding_provider(embedder.clone())
        .reranker(Arc::new(ReversingReranker { limit: rerank_limit }))
        .generator(generator.clone())
        .retry_policy(fast_retry())
        .build()
        .unwrap();
    Harness { pipeline, embedder, generator }
}

fn harness() -> Harness {
    harness_with(RagConfig::default(), WordEmbedder::default(), usize::MAX)
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        request_timeout: Duration::from_secs(5),
    }
}

fn api_docs() -> Vec<Document> {
    vec![
        Document::new(
            "auth.md",
            "Authentication uses bearer tokens. Send the token in the Authorization header. \
             Tokens expire after one hour and must be refreshed with the refresh endpoint. \
             Revoked tokens are rejected with a 401 status.",
        ),
        Document::new(
            "pagination.md",
            "List endpoints are paginated. Pass the cursor parameter to fetch the next page. \
             The default page size is fifty items and the maximum is two hundred. \
             An empty cursor in the response marks the last page.",
        ),
    ]
}

#[tokio::test]
async fn ask_before_upload_is_not_indexed() {
    let h = harness();
    let err = h.pipeline.ask("How do I authenticate?").await.unwrap_err();
    assert!(matches!(err, RagError::NotIndexed));
    assert_eq!(h.embedder.calls(), 0, "no embedding call before an index exists");
    assert!(h.generator.inputs().is_empty());
}

#[tokio::test]
async fn blank_question_is_invalid_input() {
    let h = harness();
    h.pipeline.index_documents(api_docs()).await.unwrap();
    let err = h.pipeline.ask("   ").await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));
}

#[tokio::test]
async fn upload_then_ask_answers_from_context() {
    let h = harness();
    let status = h.pipeline.index_documents(api_docs()).await.unwrap();
    assert_eq!(status, IndexStatus::Created { documents: 2, chunks: 2 });
    assert!(h.pipeline.is_indexed());

    let answer = h.pipeline.ask("How do bearer tokens work?").await.unwrap();
    assert_eq!(answer.text, "answer from 2 context lines");
    assert_eq!(answer.context.passages.len(), 2);

    let inputs = h.generator.inputs();
    assert_eq!(inputs.len(), 1);
    assert!(inputs[0].contains("(Source: auth.md, chunk 0)"));
    assert!(inputs[0].ends_with("Question: How do bearer tokens work?\n"));
}

#[tokio::test]
async fn second_upload_keeps_the_existing_index() {
    let h = harness();
    h.pipeline.index_documents(api_docs()).await.unwrap();
    let before = h.pipeline.retrieve("cursor page size").await.unwrap();

    let status = h
        .pipeline
        .index_documents(vec![Document::new("other.md", "Completely unrelated text about cats.")])
        .await
        .unwrap();
    assert_eq!(status, IndexStatus::AlreadyExists);

    let after = h.pipeline.retrieve("cursor page size").await.unwrap();
    assert_eq!(before, after);
    assert!(after.iter().all(|c| c.chunk.document_id != "other.md"));
}

#[tokio::test]
async fn concurrent_uploads_build_once() {
    let h = harness();
    let (a, b) = tokio::join!(
        h.pipeline.index_documents(api_docs()),
        h.pipeline.index_documents(api_docs())
    );
    let statuses = [a.unwrap(), b.unwrap()];
    let created =
        statuses.iter().filter(|s| matches!(s, IndexStatus::Created { .. })).count();
    assert_eq!(created, 1);
    assert!(statuses.contains(&IndexStatus::AlreadyExists));
    assert_eq!(h.embedder.calls(), 1);
}

#[tokio::test]
async fn small_index_returns_every_chunk() {
    let config = RagConfig::builder().candidate_count(5).context_size(5).build().unwrap();
    let h = harness_with(config, WordEmbedder::default(), usize::MAX);
    h.pipeline.index_documents(api_docs()).await.unwrap();

    let candidates = h.pipeline.retrieve("tokens").await.unwrap();
    assert_eq!(candidates.len(), 2);
    assert!(candidates[0].score >= candidates[1].score);
}

#[tokio::test]
async fn reranker_subset_is_used_as_is() {
    let config = RagConfig::builder()
        .chunk_size(40)
        .chunk_overlap(5)
        .candidate_count(10)
        .context_size(10)
        .build()
        .unwrap();
    let h = harness_with(config, WordEmbedder::default(), 3);
    let status = h.pipeline.index_documents(api_docs()).await.unwrap();
    let IndexStatus::Created { chunks, .. } = status else { panic!("expected a new index") };
    assert!(chunks >= 10, "fixture should produce at least ten chunks, got {chunks}");

    let retrieved = h.pipeline.retrieve("page size").await.unwrap();
    assert_eq!(retrieved.len(), 10);

    let answer = h.pipeline.ask("page size").await.unwrap();
    assert_eq!(answer.context.passages.len(), 3);
    assert_eq!(answer.text, "answer from 3 context lines");

    // Reranker order wins over similarity order.
    let expected: Vec<_> = retrieved.iter().rev().take(3).map(|c| c.id).collect();
    let used: Vec<_> = answer.context.passages.iter().map(|p| p.id).collect();
    assert_eq!(used, expected);
}

#[tokio::test]
async fn asking_twice_gives_the_same_context() {
    let h = harness();
    h.pipeline.index_documents(api_docs()).await.unwrap();

    let first = h.pipeline.ask("When do tokens expire?").await.unwrap();
    let second = h.pipeline.ask("When do tokens expire?").await.unwrap();
    assert_eq!(first, second);

    let inputs = h.generator.inputs();
    assert_eq!(inputs[0], inputs[1]);
}

#[tokio::test]
async fn empty_document_fails_and_leaves_no_index() {
    let h = harness();
    let mut docs = api_docs();
    docs.push(Document::new("scanned.pdf", " \n\t "));

    let err = h.pipeline.index_documents(docs).await.unwrap_err();
    match err {
        RagError::DataError { document, .. } => assert_eq!(document, "scanned.pdf"),
        other => panic!("expected DataError, got {other:?}"),
    }
    assert!(!h.pipeline.is_indexed());
    assert_eq!(h.embedder.calls(), 0);

    // A later, valid upload still works.
    let status = h.pipeline.index_documents(api_docs()).await.unwrap();
    assert!(matches!(status, IndexStatus::Created { .. }));
}

#[tokio::test]
async fn no_documents_is_invalid_input() {
    let h = harness();
    let err = h.pipeline.index_documents(Vec::new()).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));
    assert!(!h.pipeline.is_indexed());
}

#[tokio::test]
async fn transient_embedding_failures_are_retried() {
    let h = harness_with(RagConfig::default(), WordEmbedder::flaky(2), usize::MAX);
    h.pipeline.index_documents(api_docs()).await.unwrap();
    assert_eq!(h.embedder.calls(), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let h = harness_with(RagConfig::default(), WordEmbedder::flaky(10), usize::MAX);
    let err = h.pipeline.index_documents(api_docs()).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(h.embedder.calls(), 3);
    assert!(!h.pipeline.is_indexed());
}

/// Accepts one passage per call and fails the calls marked `true` in its script.
struct ScriptedEmbedder {
    script: Vec<bool>,
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let call = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(texts[0].to_string());
            sent.len() - 1
        };
        if self.script.get(call).copied().unwrap_or(false) {
            return Err(RagError::EmbeddingError {
                provider: "scripted".into(),
                message: "503 Service Unavailable".into(),
                transient: true,
            });
        }
        Ok(texts.iter().map(|t| WordEmbedder::embed(t)).collect())
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(1)
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[tokio::test]
async fn each_embedding_batch_is_retried_on_its_own() {
    let embedder = Arc::new(ScriptedEmbedder {
        script: vec![true, true, false, true, true, false],
        sent: Mutex::new(Vec::new()),
    });
    let pipeline = RagPipeline::builder()
        .embedding_provider(embedder.clone())
        .reranker(Arc::new(ReversingReranker { limit: usize::MAX }))
        .generator(Arc::new(RecordingGenerator::default()))
        .retry_policy(fast_retry())
        .build()
        .unwrap();

    let status = pipeline.index_documents(api_docs()).await.unwrap();
    assert_eq!(status, IndexStatus::Created { documents: 2, chunks: 2 });

    let sent = embedder.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 6);
    assert!(sent[..3].iter().all(|t| t.starts_with("Authentication")));
    assert!(sent[3..].iter().all(|t| t.starts_with("List endpoints")));
}

#[tokio::test]
async fn snapshot_is_reloaded_by_a_fresh_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index").join("snapshot.json");

    let build = |embedder: Arc<WordEmbedder>| {
        RagPipeline::builder()
            .embedding_provider(embedder)
            .reranker(Arc::new(ReversingReranker { limit: usize::MAX }))
            .generator(Arc::new(RecordingGenerator::default()))
            .snapshot_path(&path)
            .build()
            .unwrap()
    };

    let first = build(Arc::new(WordEmbedder::default()));
    assert!(!first.load_snapshot().await.unwrap(), "nothing to load yet");
    first.index_documents(api_docs()).await.unwrap();
    assert!(path.exists());
    let expected = first.retrieve("refresh endpoint").await.unwrap();

    let embedder = Arc::new(WordEmbedder::default());
    let second = build(embedder.clone());
    assert!(second.load_snapshot().await.unwrap());
    assert_eq!(second.retrieve("refresh endpoint").await.unwrap(), expected);
    // Only the question was embedded; documents came from the snapshot.
    assert_eq!(embedder.calls(), 1);
}

#[tokio::test]
async fn index_with_foreign_dimensions_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    let chunk = docqa_rag::Chunk {
        id: "doc_0".into(),
        text: "short".into(),
        document_id: "doc".into(),
        index: 0,
        start: 0,
        end: 5,
        metadata: Default::default(),
    };
    VectorIndex::build(vec![chunk], vec![vec![1.0, 0.0, 0.0]], Similarity::Cosine)
        .unwrap()
        .persist(&path)
        .await
        .unwrap();

    let h = RagPipeline::builder()
        .embedding_provider(Arc::new(WordEmbedder::default()))
        .reranker(Arc::new(ReversingReranker { limit: usize::MAX }))
        .generator(Arc::new(RecordingGenerator::default()))
        .snapshot_path(&path)
        .build()
        .unwrap();
    let err = h.load_snapshot().await.unwrap_err();
    assert!(matches!(err, RagError::DataError { .. }));
    assert!(!h.is_indexed());
}

#[tokio::test]
async fn injected_fixture_index_is_served() {
    let chunks: Vec<_> = api_docs()
        .iter()
        .enumerate()
        .map(|(i, d)| docqa_rag::Chunk {
            id: format!("{}_0", d.id),
            text: d.text.clone(),
            document_id: d.id.clone(),
            index: 0,
            start: 0,
            end: d.text.chars().count(),
            metadata: [("name".to_string(), format!("fixture-{i}"))].into(),
        })
        .collect();
    let vectors = chunks.iter().map(|c| WordEmbedder::embed(&c.text)).collect();
    let index = VectorIndex::build(chunks, vectors, Similarity::Cosine).unwrap();

    let embedder = Arc::new(WordEmbedder::default());
    let pipeline = RagPipeline::builder()
        .embedding_provider(embedder)
        .reranker(Arc::new(ReversingReranker { limit: 1 }))
        .generator(Arc::new(RecordingGenerator::default()))
        .slot(Arc::new(IndexSlot::with_index(index)))
        .build()
        .unwrap();

    let answer = pipeline.ask("cursor").await.unwrap();
    assert_eq!(answer.context.passages.len(), 1);
    assert!(answer.context.text.contains("(Source: fixture-"));
}

#[test]
fn builder_requires_collaborators() {
    let err = RagPipeline::builder().build().unwrap_err();
    assert!(matches!(err, RagError::ConfigError(_)));
}
