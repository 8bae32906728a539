//! 워크스페이스 핸들
//!
//! 인덱서, 검색기, 컨텍스트 조립기는 전역 상태 대신 이 핸들을 주입받습니다.
//! 닫힌 워크스페이스에 대한 모든 공개 연산은 [`KnowledgeError::NoWorkspaceOpen`]을 반환합니다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::{KnowledgeError, KnowledgeResult};
use super::store::KnowledgeStore;

/// 열린 워크스페이스
pub struct Workspace {
    id: String,
    store: Arc<KnowledgeStore>,
    open: AtomicBool,
}

impl Workspace {
    pub fn new(id: impl Into<String>, store: Arc<KnowledgeStore>) -> Self {
        Self {
            id: id.into(),
            store,
            open: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 워크스페이스가 열려 있으면 저장소 반환
    pub fn ensure_open(&self) -> KnowledgeResult<&KnowledgeStore> {
        if self.open.load(Ordering::Acquire) {
            Ok(&self.store)
        } else {
            Err(KnowledgeError::NoWorkspaceOpen)
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// 워크스페이스 닫기 (이후 연산은 실패)
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::info!("Closed workspace {}", self.id);
        }
    }
}
