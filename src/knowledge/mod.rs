//! Knowledge 모듈 - 지식 소스 인덱싱과 하이브리드 검색
//!
//! - Store: SQLite 소스/텍스트/청크 저장 + FTS5 키워드 검색 + 청크 벡터
//! - Indexer: 추출 → 청킹 → 임베딩 → 원자적 저장, 진행 이벤트 발행
//! - Hybrid: RRF 알고리즘으로 두 검색 결과 통합
//! - Context: 토큰 예산에 맞춘 프롬프트 텍스트
//! - Chunker: 토큰 윈도우 텍스트 분할

mod chunker;
mod context;
mod error;
mod hybrid;
mod indexer;
mod progress;
mod store;
mod vector;
mod workspace;

// Re-exports
pub use chunker::{chunk_text, ChunkConfig, Chunker, TextChunk, TokenChunker};
pub use context::{ContextAssembler, ContextMode, SourceTextResult};
pub use error::{KnowledgeError, KnowledgeResult};
pub use hybrid::{
    build_fts_query, build_scope_filter, rrf_merge, HybridRetriever, RagChunkResult, SearchMethod,
    SearchQuery, DEFAULT_SEARCH_LIMIT, RRF_K,
};
pub use indexer::{
    notes_block, IndexBatchReport, IndexOptions, IndexOutcome, SourceIndexer,
    MISSING_BLOB_METADATA, NO_TEXT_EXTRACTED, UNREADABLE_BLOB,
};
pub use progress::{IndexStep, IndexingProgress, ProgressBus};
pub use store::{
    ChunkHit, IndexCounts, IndexStatus, IndexWrite, KnowledgeSource, KnowledgeStore, NewSource,
    ScopeFilter, ScopeType, SourceChunk, SourceKind, SourceText, StoreOptions, StoreStats,
};
pub use vector::{l2_distance, register_distance_function};
pub use workspace::Workspace;
