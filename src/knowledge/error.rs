//! Knowledge 엔진 에러 타입

use thiserror::Error;

/// 엔진 공개 연산의 에러
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// 열린 워크스페이스가 없음 (호출자 오류)
    #[error("No workspace is currently open")]
    NoWorkspaceOpen,

    #[error("Knowledge source not found: {0}")]
    SourceNotFound(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type KnowledgeResult<T> = std::result::Result<T, KnowledgeError>;
