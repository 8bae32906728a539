//! palank-knowledge - 로컬 지식 인덱싱 및 하이브리드 검색 엔진
//!
//! 문서(PDF, DOCX, 텍스트)와 메모를 토큰 단위 청크로 나누어 SQLite에 저장하고,
//! FTS5 키워드 검색 + 벡터 유사도 검색을 RRF로 결합해 검색합니다.

pub mod blob;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod extractor;
pub mod knowledge;
pub mod tokenizer;

// Re-exports
pub use blob::{BlobRecord, BlobStore, FsBlobStore};
pub use config::EngineConfig;
pub use embedding::{EmbeddingProvider, HashedBagEmbedding};
pub use engine::{KnowledgeEngine, SourceScope};
pub use extractor::{ContentExtractor, ExtractInput, ExtractedContent};
pub use knowledge::{
    chunk_text, ChunkConfig, ContextAssembler, ContextMode, HybridRetriever, IndexOptions,
    IndexOutcome, IndexStatus, IndexingProgress, KnowledgeError, KnowledgeResult,
    KnowledgeSource, KnowledgeStore, RagChunkResult, ScopeType, SearchMethod, SearchQuery,
    SourceIndexer, SourceKind, SourceTextResult, StoreOptions, StoreStats, Workspace,
};
pub use tokenizer::{count_tokens, decode, encode};
