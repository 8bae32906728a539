//! 소스 인덱서 - 추출 → 청킹 → 임베딩 → 원자적 저장
//!
//! 소스 하나의 인덱싱 상태 전이를 담당합니다.
//!
//! ```text
//! pending ──▶ processing ──▶ ready
//!                  │
//!                  └──────▶ error ──(retry)──▶ processing
//! ```
//!
//! 같은 소스에 대한 동시 호출은 서로 배제되지 않습니다. 나중에 커밋한 트랜잭션이 남습니다.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinHandle;

use crate::blob::BlobStore;
use crate::embedding::EmbeddingProvider;
use crate::extractor::{ContentExtractor, ExtractInput, EXTRACTION_VERSION};

use super::chunker::{ChunkConfig, Chunker, TokenChunker};
use super::error::{KnowledgeError, KnowledgeResult};
use super::progress::{IndexStep, IndexingProgress, ProgressBus};
use super::store::{IndexStatus, IndexWrite, KnowledgeSource, KnowledgeStore, SourceKind};
use super::workspace::Workspace;

pub const MISSING_BLOB_METADATA: &str = "Missing blob metadata for this source.";
pub const UNREADABLE_BLOB: &str = "Unable to read blob.";
pub const NO_TEXT_EXTRACTED: &str = "No text could be extracted.";

// ============================================================================
// Types
// ============================================================================

/// 인덱싱 옵션
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// 내용 해시가 같아도 다시 인덱싱
    pub force: bool,
}

/// 단일 소스 인덱싱 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// 내용이 바뀌지 않아 저장소를 건드리지 않음
    Unchanged,
    /// 내용이 없어 파생 데이터를 비움
    Cleared,
    /// 새로 인덱싱됨
    Indexed { chunks: usize, vectors: usize },
    /// 예상된 실패 (상태는 error로 저장됨)
    Failed { message: String },
}

/// 일괄 인덱싱 결과
#[derive(Debug, Clone, Default)]
pub struct IndexBatchReport {
    pub indexed: usize,
    pub unchanged: usize,
    /// (source_id, message)
    pub failed: Vec<(String, String)>,
}

/// 진행 중 카운터 가드 (Drop에서 감소)
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// SourceIndexer
// ============================================================================

/// 소스 인덱서
pub struct SourceIndexer {
    workspace: Arc<Workspace>,
    blobs: Arc<dyn BlobStore>,
    extractor: ContentExtractor,
    chunk_config: ChunkConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    progress: ProgressBus,
    in_flight: Arc<AtomicUsize>,
}

impl SourceIndexer {
    pub fn new(
        workspace: Arc<Workspace>,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunk_config: ChunkConfig,
        progress: ProgressBus,
    ) -> Self {
        Self {
            workspace,
            blobs,
            extractor: ContentExtractor::new(),
            chunk_config,
            embedder,
            progress,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 진행 이벤트 버스
    pub fn progress(&self) -> &ProgressBus {
        &self.progress
    }

    /// 인덱싱 진행 중 여부 (UI 표시용)
    pub fn is_indexing_in_progress(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// 백그라운드에서 인덱싱
    pub fn spawn_index(
        self: &Arc<Self>,
        source_id: String,
        options: IndexOptions,
    ) -> JoinHandle<KnowledgeResult<IndexOutcome>> {
        let indexer = Arc::clone(self);
        tokio::spawn(async move { indexer.index_source(&source_id, options).await })
    }

    /// 소스 하나 인덱싱
    ///
    /// 예상된 실패(blob 누락, 추출 결과 없음)는 `Ok(IndexOutcome::Failed)`로,
    /// 그 외 오류는 상태를 error로 저장하고 알린 뒤 `Err`로 반환합니다.
    /// 다른 워크스페이스의 소스나 보관된 소스는 `SourceNotFound`입니다.
    pub async fn index_source(
        &self,
        source_id: &str,
        options: IndexOptions,
    ) -> KnowledgeResult<IndexOutcome> {
        let store = self.workspace.ensure_open()?;
        let _guard = InFlightGuard::enter(&self.in_flight);

        match self.run(store, source_id, options).await {
            Ok(outcome) => Ok(outcome),
            Err(KnowledgeError::SourceNotFound(id)) => Err(KnowledgeError::SourceNotFound(id)),
            Err(e) => {
                let message = e.to_string();
                tracing::error!("Indexing failed for {}: {}", source_id, message);

                if let Err(persist) = store.set_status(source_id, IndexStatus::Error, Some(&message))
                {
                    tracing::warn!("Failed to record error status for {}: {}", source_id, persist);
                }
                self.progress.publish(
                    IndexingProgress::new(source_id, IndexStatus::Error, None).with_message(message),
                );
                Err(e)
            }
        }
    }

    /// 워크스페이스의 모든 파일 소스 인덱싱
    ///
    /// 한 소스의 실패는 나머지를 중단시키지 않고 보고서에 기록됩니다.
    pub async fn index_all_sources(&self, force: bool) -> KnowledgeResult<IndexBatchReport> {
        let store = self.workspace.ensure_open()?;
        let sources = store.list_sources(self.workspace.id(), Some(SourceKind::File))?;

        let mut report = IndexBatchReport::default();
        for source in sources.iter().filter(|s| s.blob_id.is_some()) {
            match self.index_source(&source.id, IndexOptions { force }).await {
                Ok(IndexOutcome::Unchanged) => report.unchanged += 1,
                Ok(IndexOutcome::Indexed { .. }) | Ok(IndexOutcome::Cleared) => report.indexed += 1,
                Ok(IndexOutcome::Failed { message }) => report.failed.push((source.id.clone(), message)),
                Err(KnowledgeError::NoWorkspaceOpen) => return Err(KnowledgeError::NoWorkspaceOpen),
                Err(e) => report.failed.push((source.id.clone(), e.to_string())),
            }
        }

        tracing::info!(
            "Indexed {} sources ({} unchanged, {} failed)",
            report.indexed,
            report.unchanged,
            report.failed.len()
        );
        Ok(report)
    }

    async fn run(
        &self,
        store: &KnowledgeStore,
        source_id: &str,
        options: IndexOptions,
    ) -> KnowledgeResult<IndexOutcome> {
        let source = store
            .get_active_source(self.workspace.id(), source_id)?
            .ok_or_else(|| KnowledgeError::SourceNotFound(source_id.to_string()))?;
        let notes = notes_block(source.notes.as_deref());

        let Some(blob_id) = source.blob_id.clone() else {
            if notes.is_empty() {
                store.clear_index(source_id)?;
                self.publish_complete(source_id);
                return Ok(IndexOutcome::Cleared);
            }

            store.set_status(source_id, IndexStatus::Processing, None)?;
            let write = IndexWrite {
                text: notes,
                extraction_version: EXTRACTION_VERSION,
                ..Default::default()
            };
            return self.chunk_embed_persist(store, source_id, write).await;
        };

        let Some(blob) = store.get_blob(&blob_id)? else {
            return self.fail(store, source_id, MISSING_BLOB_METADATA);
        };

        if !options.force
            && source.index_status == IndexStatus::Ready
            && source.content_hash.as_deref() == Some(blob.hash.as_str())
        {
            tracing::debug!("Source {} unchanged, skipping", source_id);
            return Ok(IndexOutcome::Unchanged);
        }

        tracing::info!("Indexing source {} ({})", source_id, source.name);
        store.set_status(source_id, IndexStatus::Processing, None)?;
        self.publish_step(source_id, IndexStep::Extracting);

        let bytes = match self.blobs.read(&blob_id).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return self.fail(store, source_id, UNREADABLE_BLOB),
            Err(e) => {
                tracing::warn!("Blob read failed for {}: {:#}", blob_id, e);
                return self.fail(store, source_id, UNREADABLE_BLOB);
            }
        };

        let extracted = self
            .extractor
            .extract(ExtractInput {
                bytes,
                mime: blob.mime.clone(),
                filename: blob.filename.clone(),
            })
            .await;

        let combined = combine_document(&extracted.text, &notes);
        if combined.is_empty() {
            return self.fail(store, source_id, NO_TEXT_EXTRACTED);
        }

        let metadata = extraction_metadata(&source, &extracted.warnings, extracted.text.chars().count());
        let write = IndexWrite {
            text: combined,
            rich_text: extracted.rich_text,
            extraction_version: EXTRACTION_VERSION,
            warnings: extracted.warnings,
            content_hash: Some(blob.hash),
            metadata: Some(metadata),
            ..Default::default()
        };

        self.chunk_embed_persist(store, source_id, write).await
    }

    /// 청킹 → 임베딩 → 단일 트랜잭션 저장
    async fn chunk_embed_persist(
        &self,
        store: &KnowledgeStore,
        source_id: &str,
        mut write: IndexWrite,
    ) -> KnowledgeResult<IndexOutcome> {
        self.publish_step(source_id, IndexStep::Chunking);
        let text = write.text.clone();
        let chunker = TokenChunker::new(self.chunk_config);
        write.chunks = tokio::task::spawn_blocking(move || chunker.chunk(&text)).await?;

        self.publish_step(source_id, IndexStep::Embedding);
        let texts: Vec<String> = write.chunks.iter().map(|c| c.text.clone()).collect();
        write.embeddings = self.embedder.embed_batch(&texts).await?;

        let counts = store.replace_index(source_id, &write)?;
        tracing::info!(
            "Indexed source {} ({} chunks, {} vectors)",
            source_id,
            counts.chunks,
            counts.vectors
        );
        self.publish_complete(source_id);

        Ok(IndexOutcome::Indexed {
            chunks: counts.chunks,
            vectors: counts.vectors,
        })
    }

    fn fail(
        &self,
        store: &KnowledgeStore,
        source_id: &str,
        message: &str,
    ) -> KnowledgeResult<IndexOutcome> {
        tracing::warn!("Indexing source {} failed: {}", source_id, message);
        store.set_status(source_id, IndexStatus::Error, Some(message))?;
        self.progress.publish(
            IndexingProgress::new(source_id, IndexStatus::Error, None).with_message(message),
        );
        Ok(IndexOutcome::Failed {
            message: message.to_string(),
        })
    }

    fn publish_step(&self, source_id: &str, step: IndexStep) {
        self.progress.publish(IndexingProgress::new(
            source_id,
            IndexStatus::Processing,
            Some(step),
        ));
    }

    fn publish_complete(&self, source_id: &str) {
        self.progress.publish(IndexingProgress::new(
            source_id,
            IndexStatus::Ready,
            Some(IndexStep::Complete),
        ));
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 메모 블록 (메모가 비어 있으면 빈 문자열)
pub fn notes_block(notes: Option<&str>) -> String {
    match notes.map(str::trim) {
        Some(n) if !n.is_empty() => format!("Notes:\n{}", n),
        _ => String::new(),
    }
}

/// 추출 텍스트 + 메모 블록 (빈 줄로 구분)
fn combine_document(extracted: &str, notes: &str) -> String {
    let extracted = extracted.trim();
    match (extracted.is_empty(), notes.is_empty()) {
        (true, true) => String::new(),
        (false, true) => extracted.to_string(),
        (true, false) => notes.to_string(),
        (false, false) => format!("{}\n\n{}", extracted, notes),
    }
}

fn extraction_metadata(
    source: &KnowledgeSource,
    warnings: &[String],
    chars: usize,
) -> serde_json::Value {
    let entry = json!({
        "version": EXTRACTION_VERSION,
        "warnings": warnings,
        "chars": chars,
    });

    let mut metadata = source.metadata.clone();
    match metadata.as_object_mut() {
        Some(map) => {
            map.insert("extraction".to_string(), entry);
            metadata
        }
        None => json!({ "extraction": entry }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FsBlobStore;
    use crate::embedding::HashedBagEmbedding;
    use crate::knowledge::store::{NewSource, StoreOptions};
    use anyhow::bail;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// 호출되면 신호를 보내고, 해제될 때까지 기다린 뒤 실패하는 임베더
    struct StalledEmbedder {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl EmbeddingProvider for StalledEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            self.entered.notify_one();
            self.release.notified().await;
            bail!("embedding backend unavailable")
        }

        fn dimension(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    async fn add_file_source(f: &Fixture, name: &str, body: &[u8]) -> KnowledgeSource {
        let blob = f.blobs.write(body, Some("text/plain"), Some(name)).await.unwrap();
        f.store.register_blob(&blob).unwrap();
        f.store
            .create_source(NewSource::new("ws", SourceKind::File, name).with_blob(&blob.id))
            .unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        blobs: Arc<FsBlobStore>,
        store: Arc<KnowledgeStore>,
        indexer: Arc<SourceIndexer>,
    }

    fn fixture(config: ChunkConfig) -> Fixture {
        fixture_with_embedder(config, Arc::new(HashedBagEmbedding::new()))
    }

    fn fixture_with_embedder(config: ChunkConfig, embedder: Arc<dyn EmbeddingProvider>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            KnowledgeStore::open(&dir.path().join("k.db"), StoreOptions::default()).unwrap(),
        );
        let blobs = Arc::new(FsBlobStore::open(&dir.path().join("blobs")).unwrap());
        let workspace = Arc::new(Workspace::new("ws", Arc::clone(&store)));
        let indexer = Arc::new(SourceIndexer::new(
            workspace,
            blobs.clone(),
            embedder,
            config,
            ProgressBus::new(),
        ));
        Fixture {
            _dir: dir,
            blobs,
            store,
            indexer,
        }
    }

    #[test]
    fn test_notes_block() {
        assert_eq!(notes_block(None), "");
        assert_eq!(notes_block(Some("  \n")), "");
        assert_eq!(notes_block(Some(" keep ")), "Notes:\nkeep");
    }

    #[test]
    fn test_combine_document() {
        assert_eq!(combine_document("", ""), "");
        assert_eq!(combine_document("body", ""), "body");
        assert_eq!(combine_document(" ", "Notes:\nn"), "Notes:\nn");
        assert_eq!(combine_document("body", "Notes:\nn"), "body\n\nNotes:\nn");
    }

    #[tokio::test]
    async fn test_notes_only_source() {
        let f = fixture(ChunkConfig::default());
        let source = f
            .store
            .create_source(NewSource::new("ws", SourceKind::Text, "memo").with_notes("Remember the milk"))
            .unwrap();

        let outcome = f
            .indexer
            .index_source(&source.id, IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Indexed { chunks: 1, vectors: 1 });

        let text = f.store.get_source_text(&source.id).unwrap().unwrap();
        assert_eq!(text.text, "Notes:\nRemember the milk");
        let source = f.store.get_source(&source.id).unwrap().unwrap();
        assert!(source.content_hash.is_none());
        assert_eq!(source.index_status, IndexStatus::Ready);
    }

    #[tokio::test]
    async fn test_file_source_progress_events() {
        let f = fixture(ChunkConfig::default());
        let blob = f
            .blobs
            .write(b"Vector search with RRF", Some("text/markdown"), Some("a.md"))
            .await
            .unwrap();
        f.store.register_blob(&blob).unwrap();
        let source = f
            .store
            .create_source(NewSource::new("ws", SourceKind::File, "a.md").with_blob(&blob.id))
            .unwrap();

        let mut rx = f.indexer.progress().subscribe();
        f.indexer
            .index_source(&source.id, IndexOptions::default())
            .await
            .unwrap();

        let mut steps = Vec::new();
        while let Ok(event) = rx.try_recv() {
            steps.push(event.step);
        }
        assert_eq!(
            steps,
            vec![
                Some(IndexStep::Extracting),
                Some(IndexStep::Chunking),
                Some(IndexStep::Embedding),
                Some(IndexStep::Complete),
            ]
        );

        let source = f.store.get_source(&source.id).unwrap().unwrap();
        assert_eq!(source.content_hash.as_deref(), Some(blob.hash.as_str()));
        assert_eq!(source.metadata["extraction"]["version"], 1);
        assert_eq!(source.metadata["extraction"]["chars"], 22);
    }

    #[tokio::test]
    async fn test_missing_blob_metadata() {
        let f = fixture(ChunkConfig::default());
        let source = f
            .store
            .create_source(NewSource::new("ws", SourceKind::File, "ghost").with_blob("deadbeef"))
            .unwrap();

        let outcome = f
            .indexer
            .index_source(&source.id, IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IndexOutcome::Failed {
                message: MISSING_BLOB_METADATA.to_string()
            }
        );
        let source = f.store.get_source(&source.id).unwrap().unwrap();
        assert_eq!(source.index_status, IndexStatus::Error);
        assert_eq!(source.index_error.as_deref(), Some(MISSING_BLOB_METADATA));
    }

    #[tokio::test]
    async fn test_empty_blob_without_notes_fails() {
        let f = fixture(ChunkConfig::default());
        let blob = f.blobs.write(b"  \n ", None, Some("blank.txt")).await.unwrap();
        f.store.register_blob(&blob).unwrap();
        let source = f
            .store
            .create_source(NewSource::new("ws", SourceKind::File, "blank").with_blob(&blob.id))
            .unwrap();

        let outcome = f
            .indexer
            .index_source(&source.id, IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IndexOutcome::Failed {
                message: NO_TEXT_EXTRACTED.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let f = fixture(ChunkConfig::default());
        let result = f.indexer.index_source("nope", IndexOptions::default()).await;
        assert!(matches!(result, Err(KnowledgeError::SourceNotFound(_))));
        assert!(!f.indexer.is_indexing_in_progress());
    }

    #[tokio::test]
    async fn test_spawned_index_completes() {
        let f = fixture(ChunkConfig::default());
        let source = f
            .store
            .create_source(NewSource::new("ws", SourceKind::Memory, "m").with_notes("background"))
            .unwrap();

        let handle = f.indexer.spawn_index(source.id.clone(), IndexOptions::default());
        let outcome = handle.await.unwrap().unwrap();
        assert!(matches!(outcome, IndexOutcome::Indexed { .. }));
        assert!(!f.indexer.is_indexing_in_progress());
    }

    #[tokio::test]
    async fn test_index_all_continues_past_failures() {
        let f = fixture(ChunkConfig::default());
        let good = add_file_source(&f, "good.txt", b"Quarterly planning notes").await;
        let ghost = f
            .store
            .create_source(NewSource::new("ws", SourceKind::File, "ghost").with_blob("deadbeef"))
            .unwrap();
        let pasted = f
            .store
            .create_source(NewSource::new("ws", SourceKind::Text, "pasted").with_notes("skip me"))
            .unwrap();
        let no_blob = f
            .store
            .create_source(NewSource::new("ws", SourceKind::File, "detached"))
            .unwrap();

        let report = f.indexer.index_all_sources(false).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.unchanged, 0);
        assert_eq!(
            report.failed,
            vec![(ghost.id.clone(), MISSING_BLOB_METADATA.to_string())]
        );

        let status = |id: &str| f.store.get_source(id).unwrap().unwrap().index_status;
        assert_eq!(status(&good.id), IndexStatus::Ready);
        assert_eq!(status(&pasted.id), IndexStatus::Pending);
        assert_eq!(status(&no_blob.id), IndexStatus::Pending);

        let again = f.indexer.index_all_sources(false).await.unwrap();
        assert_eq!((again.indexed, again.unchanged, again.failed.len()), (0, 1, 1));

        let forced = f.indexer.index_all_sources(true).await.unwrap();
        assert_eq!((forced.indexed, forced.unchanged, forced.failed.len()), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_archived_source_is_not_reindexed() {
        let f = fixture(ChunkConfig::default());
        let source = add_file_source(&f, "archived.txt", b"archived body text").await;
        f.indexer
            .index_source(&source.id, IndexOptions::default())
            .await
            .unwrap();
        assert!(f.store.archive_source(&source.id).unwrap());

        let result = f
            .indexer
            .index_source(&source.id, IndexOptions { force: true })
            .await;
        assert!(matches!(result, Err(KnowledgeError::SourceNotFound(_))));
        assert!(f.store.list_chunks(&source.id).unwrap().is_empty());
        assert!(f.store.get_source_text(&source.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_workspace_source_is_not_found() {
        let f = fixture(ChunkConfig::default());
        let foreign = f
            .store
            .create_source(NewSource::new("other", SourceKind::Memory, "m").with_notes("secret"))
            .unwrap();

        let result = f
            .indexer
            .index_source(&foreign.id, IndexOptions::default())
            .await;
        assert!(matches!(result, Err(KnowledgeError::SourceNotFound(_))));

        let foreign = f.store.get_source(&foreign.id).unwrap().unwrap();
        assert_eq!(foreign.index_status, IndexStatus::Pending);
        assert!(f.store.get_source_text(&foreign.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unexpected_error_is_persisted_and_published() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let f = fixture_with_embedder(
            ChunkConfig::default(),
            Arc::new(StalledEmbedder {
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            }),
        );
        let source = add_file_source(&f, "doc.txt", b"Embedding will fail here").await;
        let mut rx = f.indexer.progress().subscribe();

        let handle = f.indexer.spawn_index(source.id.clone(), IndexOptions::default());
        entered.notified().await;
        assert!(f.indexer.is_indexing_in_progress());
        release.notify_one();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(KnowledgeError::Storage(_))));
        assert!(!f.indexer.is_indexing_in_progress());

        let stored = f.store.get_source(&source.id).unwrap().unwrap();
        assert_eq!(stored.index_status, IndexStatus::Error);
        assert_eq!(stored.index_error.as_deref(), Some("embedding backend unavailable"));
        assert!(f.store.list_chunks(&source.id).unwrap().is_empty());

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.status, IndexStatus::Error);
        assert_eq!(last.message.as_deref(), Some("embedding backend unavailable"));
    }
}
