//! 하이브리드 검색 - FTS5 + 벡터 검색 RRF 통합
//!
//! RRF (Reciprocal Rank Fusion) 알고리즘으로
//! 키워드 검색(FTS5)과 벡터 최근접 검색을 통합합니다.
//!
//! 한쪽 인덱스를 사용할 수 없거나 쿼리가 실패하면 그 채널은 결과 0개로 취급됩니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::embedding::EmbeddingProvider;

use super::error::KnowledgeResult;
use super::store::{ChunkHit, KnowledgeStore, ScopeFilter, ScopeType};
use super::workspace::Workspace;

/// RRF 상수 k
pub const RRF_K: f64 = 60.0;

/// 기본 결과 수
pub const DEFAULT_SEARCH_LIMIT: usize = 8;

// ============================================================================
// Types
// ============================================================================

/// 검색 요청
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub scope_type: Option<ScopeType>,
    pub scope_id: Option<String>,
    pub limit: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            scope_type: None,
            scope_id: None,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn with_scope(mut self, scope_type: ScopeType, scope_id: Option<&str>) -> Self {
        self.scope_type = Some(scope_type);
        self.scope_id = scope_id.map(str::to_string);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// 검색 방법
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchMethod {
    /// 두 채널 모두에서 발견
    #[serde(rename = "hybrid")]
    Hybrid,
    /// FTS5 키워드 검색만
    #[serde(rename = "fts")]
    Fts,
    /// 벡터 검색만
    #[serde(rename = "vec")]
    Vector,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hybrid => "hybrid",
            Self::Fts => "fts",
            Self::Vector => "vec",
        }
    }
}

/// 검색 결과 청크
#[derive(Debug, Clone, Serialize)]
pub struct RagChunkResult {
    pub source_id: String,
    pub chunk_id: String,
    pub text: String,
    /// RRF 통합 스코어 (높을수록 좋음)
    pub score: f64,
    pub match_type: SearchMethod,
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
pub struct HybridRetriever {
    workspace: Arc<Workspace>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl HybridRetriever {
    pub fn new(workspace: Arc<Workspace>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            workspace,
            embedder,
        }
    }

    /// 하이브리드 검색 (RRF 통합)
    ///
    /// 닫힌 워크스페이스를 제외하면 실패하지 않습니다.
    pub async fn search(&self, query: &SearchQuery) -> KnowledgeResult<Vec<RagChunkResult>> {
        let store = self.workspace.ensure_open()?;
        let workspace_id = self.workspace.id();
        let filter = build_scope_filter(query.scope_type, query.scope_id.as_deref());
        let limit = query.limit;

        let fts_results = self.search_fts(store, workspace_id, &query.query, &filter, limit);
        let vector_results = self
            .search_vectors(store, workspace_id, &query.query, &filter, limit)
            .await;

        tracing::debug!(
            "Search '{}': {} fts, {} vector candidates",
            query.query,
            fts_results.len(),
            vector_results.len()
        );

        Ok(rrf_merge(&fts_results, &vector_results, limit))
    }

    fn search_fts(
        &self,
        store: &KnowledgeStore,
        workspace_id: &str,
        query: &str,
        filter: &ScopeFilter,
        limit: usize,
    ) -> Vec<ChunkHit> {
        if !store.fts_available() {
            return vec![];
        }
        let Some(fts_query) = build_fts_query(query) else {
            return vec![];
        };

        store
            .search_fts(workspace_id, &fts_query, filter, limit)
            .unwrap_or_else(|e| {
                tracing::debug!("FTS channel skipped: {}", e);
                vec![]
            })
    }

    async fn search_vectors(
        &self,
        store: &KnowledgeStore,
        workspace_id: &str,
        query: &str,
        filter: &ScopeFilter,
        limit: usize,
    ) -> Vec<ChunkHit> {
        if !store.vector_available() {
            return vec![];
        }

        let embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::debug!("Vector channel skipped (embedding failed): {}", e);
                return vec![];
            }
        };

        store
            .search_vectors(workspace_id, &embedding, filter, limit)
            .unwrap_or_else(|e| {
                tracing::debug!("Vector channel skipped: {}", e);
                vec![]
            })
    }
}

// ============================================================================
// Query Building
// ============================================================================

/// FTS5 쿼리 생성
///
/// 따옴표 제거, 영숫자/`_`/`-` 외 문자는 공백으로 치환한 뒤
/// 각 토큰을 따옴표로 감싸 `OR`로 연결합니다. 토큰이 없으면 `None`.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
pub fn build_fts_query(query: &str) -> Option<String> {
    let cleaned: String = query
        .chars()
        .filter(|c| *c != '"' && *c != '\'')
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();

    let tokens: Vec<String> = cleaned
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

/// 스코프 필터 생성
///
/// - 스코프 없음 → 필터 없음
/// - `workspace` → 워크스페이스 스코프 소스만
/// - 그 외 + ID → 정확히 일치
/// - 그 외, ID 없음 → 스코프 종류만
pub fn build_scope_filter(scope_type: Option<ScopeType>, scope_id: Option<&str>) -> ScopeFilter {
    match (scope_type, scope_id) {
        (None, _) => ScopeFilter::None,
        (Some(ScopeType::Workspace), _) => ScopeFilter::ScopeType(ScopeType::Workspace),
        (Some(scope_type), Some(id)) => ScopeFilter::Exact(scope_type, id.to_string()),
        (Some(scope_type), None) => ScopeFilter::ScopeType(scope_type),
    }
}

// ============================================================================
// Fusion
// ============================================================================

/// RRF (Reciprocal Rank Fusion)
///
/// 각 목록에서 1부터 시작하는 순위로 `1 / (k + rank)`를 더합니다 (k = 60).
/// 두 목록 모두에 나타난 청크는 항목이 두 개이므로 한쪽에만 나타난 경우보다 항상 높습니다.
pub fn rrf_merge(
    fts_results: &[ChunkHit],
    vector_results: &[ChunkHit],
    limit: usize,
) -> Vec<RagChunkResult> {
    // chunk_id -> (score, in_fts, in_vector, hit)
    let mut scores: HashMap<&str, (f64, bool, bool, &ChunkHit)> = HashMap::new();

    for (rank, hit) in fts_results.iter().enumerate() {
        let entry = scores
            .entry(hit.chunk_id.as_str())
            .or_insert((0.0, false, false, hit));
        if !entry.1 {
            entry.0 += 1.0 / (RRF_K + rank as f64 + 1.0);
            entry.1 = true;
        }
    }

    for (rank, hit) in vector_results.iter().enumerate() {
        let entry = scores
            .entry(hit.chunk_id.as_str())
            .or_insert((0.0, false, false, hit));
        if !entry.2 {
            entry.0 += 1.0 / (RRF_K + rank as f64 + 1.0);
            entry.2 = true;
        }
    }

    let mut results: Vec<RagChunkResult> = scores
        .into_values()
        .map(|(score, in_fts, in_vector, hit)| RagChunkResult {
            source_id: hit.source_id.clone(),
            chunk_id: hit.chunk_id.clone(),
            text: hit.text.clone(),
            score,
            match_type: match (in_fts, in_vector) {
                (true, true) => SearchMethod::Hybrid,
                (true, false) => SearchMethod::Fts,
                _ => SearchMethod::Vector,
            },
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(limit);
    results
}

// ============================================================================
// Tests
// ============================================================================
