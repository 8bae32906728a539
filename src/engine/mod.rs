//! 엔진 조립 - 설정에서 저장소/인덱서/검색기를 구성
//!
//! CLI와 라이브러리 사용자가 구성 요소를 직접 엮지 않도록 묶어 둔 진입점입니다.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;

use crate::blob::{BlobStore, FsBlobStore};
use crate::collector::CollectedFile;
use crate::config::EngineConfig;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::knowledge::{
    ContextAssembler, HybridRetriever, KnowledgeSource, KnowledgeStore, NewSource, ProgressBus,
    ScopeType, SourceIndexer, SourceKind, Workspace,
};

/// 소스 이름 최대 길이 (텍스트 소스)
const TEXT_NAME_CHARS: usize = 48;

/// 새 소스의 스코프와 메모
#[derive(Debug, Clone)]
pub struct SourceScope {
    pub scope_type: ScopeType,
    pub scope_id: Option<String>,
    pub notes: Option<String>,
}

impl Default for SourceScope {
    fn default() -> Self {
        Self {
            scope_type: ScopeType::Workspace,
            scope_id: None,
            notes: None,
        }
    }
}

/// 조립된 지식 엔진
pub struct KnowledgeEngine {
    config: EngineConfig,
    store: Arc<KnowledgeStore>,
    blobs: Arc<FsBlobStore>,
    workspace: Arc<Workspace>,
    indexer: Arc<SourceIndexer>,
    retriever: HybridRetriever,
    context: ContextAssembler,
}

impl KnowledgeEngine {
    /// 데이터 디렉토리의 저장소를 열고 워크스페이스를 엶
    pub fn open(config: EngineConfig, workspace_id: &str) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", config.data_dir))?;

        let store = Arc::new(
            KnowledgeStore::open(&config.db_path(), config.store)
                .context("Failed to open knowledge store")?,
        );
        let blobs = Arc::new(FsBlobStore::open(&config.blob_dir())?);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(create_embedder());
        let workspace = Arc::new(Workspace::new(workspace_id, Arc::clone(&store)));

        let indexer = Arc::new(SourceIndexer::new(
            Arc::clone(&workspace),
            blobs.clone(),
            Arc::clone(&embedder),
            config.chunk,
            ProgressBus::new(),
        ));
        let retriever = HybridRetriever::new(Arc::clone(&workspace), embedder);
        let context = ContextAssembler::new(Arc::clone(&workspace));

        tracing::debug!("Opened workspace '{}' at {:?}", workspace_id, config.data_dir);

        Ok(Self {
            config,
            store,
            blobs,
            workspace,
            indexer,
            retriever,
            context,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn indexer(&self) -> &Arc<SourceIndexer> {
        &self.indexer
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub fn context(&self) -> &ContextAssembler {
        &self.context
    }

    /// 직접 입력한 텍스트를 소스로 추가 (text/plain blob)
    pub async fn add_text(&self, text: &str, scope: SourceScope) -> Result<KnowledgeSource> {
        let blob = self
            .blobs
            .write(text.as_bytes(), Some(crate::extractor::MIME_TEXT), None)
            .await?;
        self.store.register_blob(&blob)?;

        let source = self
            .new_source(SourceKind::Text, &text_name(text), scope)
            .with_blob(&blob.id);
        self.store.create_source(source)
    }

    /// 수집된 파일을 소스로 추가
    pub async fn add_file(&self, file: &CollectedFile, scope: SourceScope) -> Result<KnowledgeSource> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .with_context(|| format!("Failed to read file: {:?}", file.path))?;
        let name = file.file_name();

        let blob = self
            .blobs
            .write(&bytes, Some(file.kind.mime()), Some(&name))
            .await?;
        self.store.register_blob(&blob)?;

        let source = self
            .new_source(SourceKind::File, &name, scope)
            .with_blob(&blob.id)
            .with_metadata(json!({ "path": file.path.display().to_string() }));
        self.store.create_source(source)
    }

    /// URL 소스 추가 (내용은 메모만, 가져오지 않음)
    pub fn add_url(&self, url: &str, scope: SourceScope) -> Result<KnowledgeSource> {
        let parsed = url::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        let source = self
            .new_source(SourceKind::Url, parsed.as_str(), scope)
            .with_metadata(json!({ "url": parsed.as_str() }));
        self.store.create_source(source)
    }

    /// 메모 전용 소스 추가
    pub fn add_memory(&self, name: &str, scope: SourceScope) -> Result<KnowledgeSource> {
        let source = self.new_source(SourceKind::Memory, name, scope);
        self.store.create_source(source)
    }

    /// blob 바이트가 저장소에 남아 있는지 (진단용)
    pub async fn blob_exists(&self, blob_id: &str) -> Result<bool> {
        Ok(self.blobs.read(blob_id).await?.is_some())
    }

    pub fn blob_root(&self) -> &Path {
        self.blobs.root()
    }

    /// 워크스페이스 닫기
    pub fn close(&self) {
        self.workspace.close();
    }

    fn new_source(&self, kind: SourceKind, name: &str, scope: SourceScope) -> NewSource {
        let mut source = NewSource::new(self.workspace.id(), kind, name)
            .with_scope(scope.scope_type, scope.scope_id.as_deref());
        if let Some(notes) = scope.notes.as_deref() {
            source = source.with_notes(notes);
        }
        source
    }
}

/// 텍스트 앞부분으로 소스 이름 생성
fn text_name(text: &str) -> String {
    let first_line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if first_line.is_empty() {
        return "Untitled text".to_string();
    }
    if first_line.chars().count() <= TEXT_NAME_CHARS {
        first_line.to_string()
    } else {
        let mut name: String = first_line.chars().take(TEXT_NAME_CHARS).collect();
        name.push_str("...");
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{IndexOptions, IndexOutcome, IndexStatus};
    use tempfile::TempDir;

    fn open_engine(dir: &TempDir) -> KnowledgeEngine {
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        KnowledgeEngine::open(config, "default").unwrap()
    }

    #[test]
    fn test_text_name() {
        assert_eq!(text_name("\n  Title line\nbody"), "Title line");
        assert_eq!(text_name("   "), "Untitled text");
        let long = "x".repeat(60);
        assert_eq!(text_name(&long).chars().count(), TEXT_NAME_CHARS + 3);
    }

    #[tokio::test]
    async fn test_add_text_and_index() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        let source = engine
            .add_text("Hybrid search uses reciprocal rank fusion.", SourceScope::default())
            .await
            .unwrap();
        assert_eq!(source.kind, SourceKind::Text);
        assert!(engine.blob_exists(source.blob_id.as_deref().unwrap()).await.unwrap());

        let outcome = engine
            .indexer()
            .index_source(&source.id, IndexOptions::default())
            .await
            .unwrap();
        assert!(matches!(outcome, IndexOutcome::Indexed { chunks: 1, .. }));
        assert!(engine.config().db_path().exists());
    }

    #[tokio::test]
    async fn test_add_url_uses_notes_only() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        let source = engine
            .add_url(
                "https://example.com/docs",
                SourceScope {
                    notes: Some("Reference docs".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(source.metadata["url"], "https://example.com/docs");
        assert!(engine.add_url("not a url", SourceScope::default()).is_err());

        engine
            .indexer()
            .index_source(&source.id, IndexOptions::default())
            .await
            .unwrap();
        let source = engine.store().get_source(&source.id).unwrap().unwrap();
        assert_eq!(source.index_status, IndexStatus::Ready);
    }
}
