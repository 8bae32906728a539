//! Knowledge Store - rusqlite 기반 동기 지식 저장소
//!
//! 지식 소스, 추출 텍스트, 청크, 청크 벡터를 하나의 SQLite 연결에 저장합니다.
//! 저장 위치: `<data_dir>/knowledge.db`
//!
//! 두 보조 인덱스는 선택 사항입니다.
//! - `source_chunks_fts`: FTS5 키워드 검색
//! - `chunk_vectors`: 직렬화된 임베딩 + `vec_distance_l2` SQL 함수
//!
//! 사용 가능 여부는 열 때 한 번 감지되어 [`KnowledgeStore::fts_available`] /
//! [`KnowledgeStore::vector_available`]로 노출됩니다.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::blob::BlobRecord;
use crate::embedding::serialize_vector;

use super::chunker::TextChunk;
use super::vector::register_distance_function;

// ============================================================================
// Enums
// ============================================================================

/// 스코프 (소스/검색이 속하는 논리적 컨테이너)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Workspace,
    Channel,
    Thread,
    Coworker,
}

/// 소스 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Text,
    File,
    Url,
    Memory,
}

/// 인덱싱 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

/// `as_str` / `Display` / `FromStr` 를 소문자 이름으로 구현
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    other => bail!("Unknown {}: {}", stringify!($ty), other),
                }
            }
        }
    };
}

text_enum!(ScopeType {
    Workspace => "workspace",
    Channel => "channel",
    Thread => "thread",
    Coworker => "coworker",
});

text_enum!(SourceKind {
    Text => "text",
    File => "file",
    Url => "url",
    Memory => "memory",
});

text_enum!(IndexStatus {
    Pending => "pending",
    Processing => "processing",
    Ready => "ready",
    Error => "error",
});

// ============================================================================
// Types
// ============================================================================

/// 지식 소스
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub id: String,
    pub workspace_id: String,
    pub scope_type: ScopeType,
    pub scope_id: Option<String>,
    pub kind: SourceKind,
    pub name: String,
    pub blob_id: Option<String>,
    /// 마지막 성공 인덱싱 시점의 blob 해시
    pub content_hash: Option<String>,
    pub index_status: IndexStatus,
    pub index_error: Option<String>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub notes: Option<String>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 새 소스 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewSource {
    pub workspace_id: String,
    pub scope_type: ScopeType,
    pub scope_id: Option<String>,
    pub kind: SourceKind,
    pub name: String,
    pub blob_id: Option<String>,
    pub notes: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewSource {
    /// 워크스페이스 스코프의 소스
    pub fn new(workspace_id: &str, kind: SourceKind, name: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            scope_type: ScopeType::Workspace,
            scope_id: None,
            kind,
            name: name.to_string(),
            blob_id: None,
            notes: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_scope(mut self, scope_type: ScopeType, scope_id: Option<&str>) -> Self {
        self.scope_type = scope_type;
        self.scope_id = scope_id.map(str::to_string);
        self
    }

    pub fn with_blob(mut self, blob_id: &str) -> Self {
        self.blob_id = Some(blob_id.to_string());
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// 소스당 하나의 추출 텍스트 (추출 결과 + 메모 블록)
#[derive(Debug, Clone, Serialize)]
pub struct SourceText {
    pub source_id: String,
    pub text: String,
    pub rich_text: Option<String>,
    pub extraction_version: i64,
    pub warnings: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// 저장된 청크
#[derive(Debug, Clone, Serialize)]
pub struct SourceChunk {
    pub id: String,
    pub source_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
}

/// 한 번의 인덱스 교체에 쓰일 데이터
#[derive(Debug, Clone, Default)]
pub struct IndexWrite {
    pub text: String,
    pub rich_text: Option<String>,
    pub extraction_version: i64,
    pub warnings: Vec<String>,
    pub chunks: Vec<TextChunk>,
    /// `chunks`와 같은 순서의 임베딩 (비어 있으면 벡터를 쓰지 않음)
    pub embeddings: Vec<Vec<f32>>,
    /// 파일 소스의 blob 해시 (메모 전용 소스는 `None`)
    pub content_hash: Option<String>,
    /// 소스 메타데이터 교체 값
    pub metadata: Option<serde_json::Value>,
}

/// 인덱스 교체 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexCounts {
    pub chunks: usize,
    pub vectors: usize,
}

/// 검색 스코프 필터
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    /// 필터 없음
    None,
    /// 스코프 종류만 일치
    ScopeType(ScopeType),
    /// 스코프 종류 + ID 일치
    Exact(ScopeType, String),
}

/// 청크 검색 결과 (FTS: bm25, 벡터: L2 거리. 둘 다 낮을수록 좋음)
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub source_id: String,
    pub text: String,
    pub score: f64,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub source_count: usize,
    pub pending: usize,
    pub processing: usize,
    pub ready: usize,
    pub error: usize,
    pub chunk_count: usize,
    pub vector_count: usize,
    pub fts_available: bool,
    pub vector_available: bool,
    pub db_path: PathBuf,
}

/// 저장소 열기 옵션
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    pub enable_fts: bool,
    pub enable_vectors: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            enable_fts: true,
            enable_vectors: true,
        }
    }
}

// ============================================================================
// KnowledgeStore
// ============================================================================

const SOURCE_COLUMNS: &str = "id, workspace_id, scope_type, scope_id, kind, name, blob_id, \
     content_hash, index_status, index_error, indexed_at, metadata_json, notes, archived_at, \
     created_at, updated_at";

/// Knowledge Store - 동기 지식 저장소
///
/// 하나의 연결을 읽기/쓰기에 공유합니다. 인덱스 교체는 단일 트랜잭션입니다.
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    fts_available: bool,
    vector_available: bool,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        Self::from_connection(conn, path.to_path_buf(), options)
    }

    /// 메모리 DB (테스트용)
    pub fn open_in_memory(options: StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn, PathBuf::from(":memory:"), options)
    }

    fn from_connection(conn: Connection, db_path: PathBuf, options: StoreOptions) -> Result<Self> {
        initialize_schema(&conn)?;

        let fts_available = options.enable_fts && initialize_fts(&conn);
        let vector_available = options.enable_vectors && initialize_vectors(&conn);

        tracing::debug!(
            "Knowledge store initialized at {:?} (fts={}, vectors={})",
            db_path,
            fts_available,
            vector_available
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            fts_available,
            vector_available,
        })
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// FTS5 인덱스 사용 가능 여부
    pub fn fts_available(&self) -> bool {
        self.fts_available
    }

    /// 벡터 인덱스 사용 가능 여부
    pub fn vector_available(&self) -> bool {
        self.vector_available
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow!("Lock error: {}", e))
    }

    // ------------------------------------------------------------------------
    // Blobs
    // ------------------------------------------------------------------------

    /// Blob 메타데이터 등록 (같은 ID는 유지)
    pub fn register_blob(&self, blob: &BlobRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO blobs (id, hash, mime, filename, size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                blob.id,
                blob.hash,
                blob.mime,
                blob.filename,
                blob.size as i64,
                blob.created_at.to_rfc3339()
            ],
        )
        .context("Failed to register blob")?;
        Ok(())
    }

    /// Blob 메타데이터 조회
    pub fn get_blob(&self, blob_id: &str) -> Result<Option<BlobRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, hash, mime, filename, size, created_at FROM blobs WHERE id = ?1",
            params![blob_id],
            |row| {
                Ok(BlobRecord {
                    id: row.get(0)?,
                    hash: row.get(1)?,
                    mime: row.get(2)?,
                    filename: row.get(3)?,
                    size: row.get::<_, i64>(4)? as u64,
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                })
            },
        )
        .optional()
        .context("Failed to load blob metadata")
    }

    // ------------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------------

    /// 소스 생성 (상태: pending)
    pub fn create_source(&self, source: NewSource) -> Result<KnowledgeSource> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let metadata = serde_json::to_string(&source.metadata)?;

        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO knowledge_sources
                 (id, workspace_id, scope_type, scope_id, kind, name, blob_id, index_status,
                  metadata_json, notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    id,
                    source.workspace_id,
                    source.scope_type.as_str(),
                    source.scope_id,
                    source.kind.as_str(),
                    source.name,
                    source.blob_id,
                    IndexStatus::Pending.as_str(),
                    metadata,
                    source.notes,
                    now
                ],
            )
            .context("Failed to insert knowledge source")?;
        }

        tracing::info!("Added {} source: {} (id={})", source.kind, source.name, id);

        self.get_source(&id)?
            .ok_or_else(|| anyhow!("Source disappeared after insert: {}", id))
    }

    /// ID로 소스 조회
    pub fn get_source(&self, source_id: &str) -> Result<Option<KnowledgeSource>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM knowledge_sources WHERE id = ?1", SOURCE_COLUMNS);
        conn.query_row(&sql, params![source_id], row_to_source)
            .optional()
            .context("Failed to load knowledge source")
    }

    /// 워크스페이스에 속하고 보관되지 않은 소스만 조회
    ///
    /// 다른 워크스페이스의 소스나 보관된 소스는 `None`입니다.
    pub fn get_active_source(
        &self,
        workspace_id: &str,
        source_id: &str,
    ) -> Result<Option<KnowledgeSource>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM knowledge_sources
             WHERE id = ?1 AND workspace_id = ?2 AND archived_at IS NULL",
            SOURCE_COLUMNS
        );
        conn.query_row(&sql, params![source_id, workspace_id], row_to_source)
            .optional()
            .context("Failed to load knowledge source")
    }

    /// 워크스페이스의 (보관되지 않은) 소스 목록
    pub fn list_sources(
        &self,
        workspace_id: &str,
        kind: Option<SourceKind>,
    ) -> Result<Vec<KnowledgeSource>> {
        let conn = self.lock()?;

        let mut sql = format!(
            "SELECT {} FROM knowledge_sources WHERE workspace_id = ?1 AND archived_at IS NULL",
            SOURCE_COLUMNS
        );
        let mut values = vec![Value::Text(workspace_id.to_string())];
        if let Some(kind) = kind {
            sql.push_str(" AND kind = ?2");
            values.push(Value::Text(kind.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at ASC, rowid ASC");

        let mut stmt = conn.prepare(&sql)?;
        let sources = stmt
            .query_map(params_from_iter(values), row_to_source)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list knowledge sources")?;

        Ok(sources)
    }

    /// 메모 변경 (다음 인덱싱에서 반영되도록 pending으로 되돌림)
    pub fn update_notes(&self, source_id: &str, notes: Option<&str>) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE knowledge_sources SET notes = ?2, index_status = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                source_id,
                notes,
                IndexStatus::Pending.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(rows > 0)
    }

    /// 인덱싱 상태 변경
    pub fn set_status(
        &self,
        source_id: &str,
        status: IndexStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE knowledge_sources SET index_status = ?2, index_error = ?3, updated_at = ?4
             WHERE id = ?1",
            params![source_id, status.as_str(), error, Utc::now().to_rfc3339()],
        )
        .context("Failed to update index status")?;
        Ok(())
    }

    /// 소스 보관 (검색 대상에서 제외, 파생 데이터 삭제)
    pub fn archive_source(&self, source_id: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let now = Utc::now().to_rfc3339();
        let rows = tx.execute(
            "UPDATE knowledge_sources SET archived_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![source_id, now],
        )?;
        if rows > 0 {
            delete_derived(&tx, source_id)?;
        }

        tx.commit().context("Failed to archive source")?;
        Ok(rows > 0)
    }

    /// 소스 삭제 (파생 데이터 포함)
    pub fn delete_source(&self, source_id: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        delete_derived(&tx, source_id)?;
        let rows = tx.execute(
            "DELETE FROM knowledge_sources WHERE id = ?1",
            params![source_id],
        )?;

        tx.commit().context("Failed to delete source")?;
        if rows > 0 {
            tracing::info!("Deleted source {}", source_id);
        }
        Ok(rows > 0)
    }

    // ------------------------------------------------------------------------
    // Index
    // ------------------------------------------------------------------------

    /// 소스의 텍스트/청크/벡터를 한 트랜잭션으로 교체하고 상태를 ready로 변경
    ///
    /// 벡터 쓰기는 최선 노력입니다. 실패한 청크는 키워드 검색으로만 조회됩니다.
    pub fn replace_index(&self, source_id: &str, write: &IndexWrite) -> Result<IndexCounts> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        // 벡터 인덱스를 끈 채 열었어도 이전 세대의 벡터 행은 지움
        best_effort_delete_vectors(&tx, source_id);
        tx.execute(
            "DELETE FROM source_chunks WHERE source_id = ?1",
            params![source_id],
        )
        .context("Failed to delete previous chunks")?;

        tx.execute(
            "INSERT INTO source_texts
             (source_id, text, rich_text, extraction_version, warnings_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source_id) DO UPDATE SET
                text = excluded.text,
                rich_text = excluded.rich_text,
                extraction_version = excluded.extraction_version,
                warnings_json = excluded.warnings_json,
                updated_at = excluded.updated_at",
            params![
                source_id,
                write.text,
                write.rich_text,
                write.extraction_version,
                serde_json::to_string(&write.warnings)?,
                now
            ],
        )
        .context("Failed to upsert source text")?;

        let mut chunk_ids = Vec::with_capacity(write.chunks.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO source_chunks (id, source_id, chunk_index, text, token_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (index, chunk) in write.chunks.iter().enumerate() {
                let chunk_id = uuid::Uuid::new_v4().to_string();
                stmt.execute(params![
                    chunk_id,
                    source_id,
                    index as i64,
                    chunk.text,
                    chunk.token_count as i64
                ])
                .context("Failed to insert chunk")?;
                chunk_ids.push(chunk_id);
            }
        }

        let mut vectors = 0;
        if self.vector_available {
            for (chunk_id, embedding) in chunk_ids.iter().zip(write.embeddings.iter()) {
                let result = tx.execute(
                    "INSERT OR REPLACE INTO chunk_vectors (chunk_id, source_id, embedding)
                     VALUES (?1, ?2, ?3)",
                    params![chunk_id, source_id, serialize_vector(embedding)],
                );
                match result {
                    Ok(_) => vectors += 1,
                    Err(e) => tracing::warn!("Skipping vector for chunk {}: {}", chunk_id, e),
                }
            }
        }

        match &write.content_hash {
            Some(hash) => tx.execute(
                "UPDATE knowledge_sources SET content_hash = ?2, index_status = ?3,
                 index_error = NULL, indexed_at = ?4, updated_at = ?4 WHERE id = ?1",
                params![source_id, hash, IndexStatus::Ready.as_str(), now],
            )?,
            None => tx.execute(
                "UPDATE knowledge_sources SET index_status = ?2,
                 index_error = NULL, indexed_at = ?3, updated_at = ?3 WHERE id = ?1",
                params![source_id, IndexStatus::Ready.as_str(), now],
            )?,
        };

        if let Some(metadata) = &write.metadata {
            tx.execute(
                "UPDATE knowledge_sources SET metadata_json = ?2 WHERE id = ?1",
                params![source_id, serde_json::to_string(metadata)?],
            )?;
        }

        tx.commit().context("Failed to commit index")?;

        Ok(IndexCounts {
            chunks: chunk_ids.len(),
            vectors,
        })
    }

    /// 파생 데이터 삭제 후 상태를 ready로 변경 (내용 없는 소스)
    pub fn clear_index(&self, source_id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        delete_derived(&tx, source_id)?;
        tx.execute(
            "UPDATE knowledge_sources SET index_status = ?2, index_error = NULL,
             indexed_at = ?3, updated_at = ?3 WHERE id = ?1",
            params![source_id, IndexStatus::Ready.as_str(), now],
        )?;

        tx.commit().context("Failed to clear index")?;
        Ok(())
    }

    /// 추출 텍스트 조회
    pub fn get_source_text(&self, source_id: &str) -> Result<Option<SourceText>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT source_id, text, rich_text, extraction_version, warnings_json, updated_at
             FROM source_texts WHERE source_id = ?1",
            params![source_id],
            |row| {
                let warnings: Option<String> = row.get(4)?;
                Ok(SourceText {
                    source_id: row.get(0)?,
                    text: row.get(1)?,
                    rich_text: row.get(2)?,
                    extraction_version: row.get(3)?,
                    warnings: warnings
                        .and_then(|w| serde_json::from_str(&w).ok())
                        .unwrap_or_default(),
                    updated_at: parse_datetime(row.get::<_, String>(5)?),
                })
            },
        )
        .optional()
        .context("Failed to load source text")
    }

    /// 소스의 청크 목록 (chunk_index 순)
    pub fn list_chunks(&self, source_id: &str) -> Result<Vec<SourceChunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, source_id, chunk_index, text, token_count FROM source_chunks
             WHERE source_id = ?1 ORDER BY chunk_index ASC",
        )?;

        let chunks = stmt
            .query_map(params![source_id], |row| {
                Ok(SourceChunk {
                    id: row.get(0)?,
                    source_id: row.get(1)?,
                    chunk_index: row.get::<_, i64>(2)? as usize,
                    text: row.get(3)?,
                    token_count: row.get::<_, i64>(4)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list chunks")?;

        Ok(chunks)
    }

    /// 소스의 벡터 수 (벡터 인덱스가 없으면 0)
    pub fn count_vectors(&self, source_id: &str) -> Result<usize> {
        if !self.vector_available {
            return Ok(0);
        }
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunk_vectors WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    /// FTS5 키워드 검색 (bm25 오름차순)
    ///
    /// `fts_query`는 이미 FTS5 문법으로 이스케이프된 쿼리여야 합니다.
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn search_fts(
        &self,
        workspace_id: &str,
        fts_query: &str,
        filter: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        if !self.fts_available {
            bail!("FTS5 index is not available");
        }

        let mut values = vec![
            Value::Text(fts_query.to_string()),
            Value::Text(workspace_id.to_string()),
        ];
        let scope_sql = scope_clause(filter, &mut values);
        values.push(Value::Integer(limit as i64));

        let sql = format!(
            r#"
            SELECT c.id, c.source_id, c.text, bm25(source_chunks_fts) AS score
            FROM source_chunks_fts
            JOIN source_chunks c ON c.seq = source_chunks_fts.rowid
            JOIN knowledge_sources s ON s.id = c.source_id
            WHERE source_chunks_fts MATCH ?
              AND s.workspace_id = ?
              AND s.archived_at IS NULL{}
            ORDER BY score ASC
            LIMIT ?
            "#,
            scope_sql
        );

        self.query_hits(&sql, values)
    }

    /// 벡터 최근접 검색 (L2 거리 오름차순)
    pub fn search_vectors(
        &self,
        workspace_id: &str,
        query_vector: &[f32],
        filter: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        if !self.vector_available {
            bail!("Vector index is not available");
        }

        let mut values = vec![
            Value::Blob(serialize_vector(query_vector)),
            Value::Text(workspace_id.to_string()),
        ];
        let scope_sql = scope_clause(filter, &mut values);
        values.push(Value::Integer(limit as i64));

        let sql = format!(
            r#"
            SELECT c.id, c.source_id, c.text, vec_distance_l2(v.embedding, ?) AS distance
            FROM chunk_vectors v
            JOIN source_chunks c ON c.id = v.chunk_id
            JOIN knowledge_sources s ON s.id = c.source_id
            WHERE s.workspace_id = ?
              AND s.archived_at IS NULL{}
            ORDER BY distance ASC
            LIMIT ?
            "#,
            scope_sql
        );

        self.query_hits(&sql, values)
    }

    fn query_hits(&self, sql: &str, values: Vec<Value>) -> Result<Vec<ChunkHit>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let hits = stmt
            .query_map(params_from_iter(values), |row| {
                Ok(ChunkHit {
                    chunk_id: row.get(0)?,
                    source_id: row.get(1)?,
                    text: row.get(2)?,
                    score: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hits)
    }

    // ------------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------------

    /// 워크스페이스 통계
    pub fn stats(&self, workspace_id: &str) -> Result<StoreStats> {
        let conn = self.lock()?;

        let mut stats = StoreStats {
            source_count: 0,
            pending: 0,
            processing: 0,
            ready: 0,
            error: 0,
            chunk_count: 0,
            vector_count: 0,
            fts_available: self.fts_available,
            vector_available: self.vector_available,
            db_path: self.db_path.clone(),
        };

        let mut stmt = conn.prepare(
            "SELECT index_status, COUNT(*) FROM knowledge_sources
             WHERE workspace_id = ?1 AND archived_at IS NULL GROUP BY index_status",
        )?;
        let rows = stmt.query_map(params![workspace_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        for row in rows {
            let (status, count) = row?;
            stats.source_count += count;
            match IndexStatus::from_str(&status) {
                Ok(IndexStatus::Pending) => stats.pending += count,
                Ok(IndexStatus::Processing) => stats.processing += count,
                Ok(IndexStatus::Ready) => stats.ready += count,
                Ok(IndexStatus::Error) => stats.error += count,
                Err(e) => tracing::warn!("{}", e),
            }
        }

        stats.chunk_count = conn.query_row(
            "SELECT COUNT(*) FROM source_chunks c
             JOIN knowledge_sources s ON s.id = c.source_id
             WHERE s.workspace_id = ?1",
            params![workspace_id],
            |row| row.get::<_, i64>(0),
        )? as usize;

        if self.vector_available {
            stats.vector_count = conn.query_row(
                "SELECT COUNT(*) FROM chunk_vectors v
                 JOIN knowledge_sources s ON s.id = v.source_id
                 WHERE s.workspace_id = ?1",
                params![workspace_id],
                |row| row.get::<_, i64>(0),
            )? as usize;
        }

        Ok(stats)
    }
}

// ============================================================================
// Schema
// ============================================================================

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS blobs (
            id TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            mime TEXT,
            filename TEXT,
            size INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS knowledge_sources (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            scope_type TEXT NOT NULL,
            scope_id TEXT,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            blob_id TEXT,
            content_hash TEXT,
            index_status TEXT NOT NULL DEFAULT 'pending',
            index_error TEXT,
            indexed_at TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            notes TEXT,
            archived_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sources_workspace
            ON knowledge_sources(workspace_id, scope_type, scope_id);

        CREATE TABLE IF NOT EXISTS source_texts (
            source_id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            rich_text TEXT,
            extraction_version INTEGER NOT NULL,
            warnings_json TEXT,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS source_chunks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            source_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            UNIQUE(source_id, chunk_index)
        );
        "#,
    )
    .context("Failed to create knowledge tables")?;

    Ok(())
}

/// FTS5 외부 콘텐츠 테이블 + 동기화 트리거
///
/// source: https://www.sqlite.org/fts5.html#external_content_tables
fn initialize_fts(conn: &Connection) -> bool {
    let result = conn.execute_batch(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS source_chunks_fts USING fts5(
            text,
            content=source_chunks,
            content_rowid=seq
        );

        CREATE TRIGGER IF NOT EXISTS source_chunks_ai AFTER INSERT ON source_chunks BEGIN
            INSERT INTO source_chunks_fts(rowid, text) VALUES (new.seq, new.text);
        END;

        CREATE TRIGGER IF NOT EXISTS source_chunks_ad AFTER DELETE ON source_chunks BEGIN
            INSERT INTO source_chunks_fts(source_chunks_fts, rowid, text)
            VALUES('delete', old.seq, old.text);
        END;

        CREATE TRIGGER IF NOT EXISTS source_chunks_au AFTER UPDATE ON source_chunks BEGIN
            INSERT INTO source_chunks_fts(source_chunks_fts, rowid, text)
            VALUES('delete', old.seq, old.text);
            INSERT INTO source_chunks_fts(rowid, text) VALUES (new.seq, new.text);
        END;
        "#,
    );

    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("FTS5 not available (optional): {}", e);
            false
        }
    }
}

/// 벡터 테이블 + 거리 함수
fn initialize_vectors(conn: &Connection) -> bool {
    if let Err(e) = register_distance_function(conn) {
        tracing::warn!("Vector distance function not available (optional): {}", e);
        return false;
    }

    let result = conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            embedding BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunk_vectors_source ON chunk_vectors(source_id);
        "#,
    );

    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Vector index not available (optional): {}", e);
            false
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 소스의 텍스트/청크/벡터 삭제 (트랜잭션 내부)
fn delete_derived(conn: &Connection, source_id: &str) -> Result<()> {
    best_effort_delete_vectors(conn, source_id);
    conn.execute(
        "DELETE FROM source_chunks WHERE source_id = ?1",
        params![source_id],
    )?;
    conn.execute(
        "DELETE FROM source_texts WHERE source_id = ?1",
        params![source_id],
    )?;
    Ok(())
}

/// 벡터 테이블이 없을 수도 있으므로 실패를 무시
fn best_effort_delete_vectors(conn: &Connection, source_id: &str) {
    if let Err(e) = conn.execute(
        "DELETE FROM chunk_vectors WHERE source_id = ?1",
        params![source_id],
    ) {
        tracing::debug!("Vector cleanup skipped for {}: {}", source_id, e);
    }
}

/// 스코프 필터 SQL 조각 (값은 `values`에 순서대로 추가)
fn scope_clause(filter: &ScopeFilter, values: &mut Vec<Value>) -> &'static str {
    match filter {
        ScopeFilter::None => "",
        ScopeFilter::ScopeType(scope_type) => {
            values.push(Value::Text(scope_type.as_str().to_string()));
            "\n              AND s.scope_type = ?"
        }
        ScopeFilter::Exact(scope_type, scope_id) => {
            values.push(Value::Text(scope_type.as_str().to_string()));
            values.push(Value::Text(scope_id.clone()));
            "\n              AND s.scope_type = ?\n              AND s.scope_id = ?"
        }
    }
}

fn row_to_source(row: &Row<'_>) -> rusqlite::Result<KnowledgeSource> {
    let metadata: String = row.get(11)?;
    Ok(KnowledgeSource {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        scope_type: parse_column(row, 2)?,
        scope_id: row.get(3)?,
        kind: parse_column(row, 4)?,
        name: row.get(5)?,
        blob_id: row.get(6)?,
        content_hash: row.get(7)?,
        index_status: parse_column(row, 8)?,
        index_error: row.get(9)?,
        indexed_at: row.get::<_, Option<String>>(10)?.map(parse_datetime),
        metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
        notes: row.get(12)?,
        archived_at: row.get::<_, Option<String>>(13)?.map(parse_datetime),
        created_at: parse_datetime(row.get::<_, String>(14)?),
        updated_at: parse_datetime(row.get::<_, String>(15)?),
    })
}

fn parse_column<T: FromStr<Err = anyhow::Error>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
