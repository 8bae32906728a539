//! 인덱싱 진행 이벤트
//!
//! 인덱서가 발행하고 UI 등 구독자가 받는 일시적 이벤트입니다. 저장되지 않으며,
//! 구독자가 없거나 뒤처지면 이벤트는 버려집니다 (재전송/백프레셔 없음).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::store::IndexStatus;

/// 브로드캐스트 채널 용량
const CHANNEL_CAPACITY: usize = 64;

/// 인덱싱 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStep {
    Extracting,
    Chunking,
    Embedding,
    Complete,
}

/// 진행 이벤트
#[derive(Debug, Clone, Serialize)]
pub struct IndexingProgress {
    pub source_id: String,
    pub status: IndexStatus,
    pub step: Option<IndexStep>,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl IndexingProgress {
    pub fn new(source_id: &str, status: IndexStatus, step: Option<IndexStep>) -> Self {
        Self {
            source_id: source_id.to_string(),
            status,
            step,
            message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// 진행 이벤트 pub/sub 버스
#[derive(Debug, Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<IndexingProgress>,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// 구독
    pub fn subscribe(&self) -> broadcast::Receiver<IndexingProgress> {
        self.tx.subscribe()
    }

    /// 발행 (구독자가 없어도 성공)
    pub fn publish(&self, event: IndexingProgress) {
        tracing::debug!(
            "Progress {}: {} {:?}",
            event.source_id,
            event.status,
            event.step
        );
        let _ = self.tx.send(event);
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}
