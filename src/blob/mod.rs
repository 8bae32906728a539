//! Blob 저장소 - 원본 파일 바이트 보관
//!
//! 파일 소스의 원본 바이트는 내용 해시(sha256)를 ID로 하는 디렉토리에 저장됩니다.
//! 메타데이터(MIME, 파일명, 크기)는 [`crate::knowledge::KnowledgeStore`]의 `blobs` 테이블이 관리합니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Blob 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobRecord {
    /// Blob ID (= 내용 해시)
    pub id: String,
    /// 바이트의 sha256 (hex)
    pub hash: String,
    pub mime: Option<String>,
    pub filename: Option<String>,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Blob 저장소 트레이트
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Blob 바이트 읽기 (없으면 `None`)
    async fn read(&self, blob_id: &str) -> Result<Option<Vec<u8>>>;

    /// Blob 쓰기. 같은 내용은 같은 ID를 가집니다.
    async fn write(
        &self,
        bytes: &[u8],
        mime: Option<&str>,
        filename: Option<&str>,
    ) -> Result<BlobRecord>;
}

/// 바이트의 sha256 hex 문자열
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ============================================================================
// FsBlobStore
// ============================================================================

/// 파일 시스템 Blob 저장소
///
/// `root/ab/abcdef...` 형태로 해시 앞 두 글자를 하위 디렉토리로 사용합니다.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// 저장소 열기 (디렉토리가 없으면 생성)
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create blob directory: {:?}", root))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, blob_id: &str) -> Option<PathBuf> {
        // 경로 탈출 방지: hex 문자열만 허용
        if blob_id.len() < 3 || !blob_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(self.root.join(&blob_id[..2]).join(blob_id))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn read(&self, blob_id: &str) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.blob_path(blob_id) else {
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read blob: {:?}", path)),
        }
    }

    async fn write(
        &self,
        bytes: &[u8],
        mime: Option<&str>,
        filename: Option<&str>,
    ) -> Result<BlobRecord> {
        let hash = content_hash(bytes);
        let path = self
            .blob_path(&hash)
            .context("Computed blob id is not a valid hex digest")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create blob shard directory")?;
        }

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::write(&path, bytes)
                .await
                .with_context(|| format!("Failed to write blob: {:?}", path))?;
            tracing::debug!("Stored blob {} ({} bytes)", hash, bytes.len());
        }

        Ok(BlobRecord {
            id: hash.clone(),
            hash,
            mime: mime.map(str::to_string),
            filename: filename.map(str::to_string),
            size: bytes.len() as u64,
            created_at: Utc::now(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let blobs = FsBlobStore::open(dir.path()).unwrap();

        let record = blobs
            .write(b"hello blob", Some("text/plain"), Some("hello.txt"))
            .await
            .unwrap();
        assert_eq!(record.id, content_hash(b"hello blob"));
        assert_eq!(record.size, 10);
        assert_eq!(record.filename.as_deref(), Some("hello.txt"));

        let bytes = blobs.read(&record.id).await.unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"hello blob"[..]));
    }

    #[tokio::test]
    async fn test_same_content_same_id() {
        let dir = TempDir::new().unwrap();
        let blobs = FsBlobStore::open(dir.path()).unwrap();

        let a = blobs.write(b"dup", None, Some("a.txt")).await.unwrap();
        let b = blobs.write(b"dup", None, Some("b.txt")).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_ids() {
        let dir = TempDir::new().unwrap();
        let blobs = FsBlobStore::open(dir.path()).unwrap();

        assert!(blobs.read(&content_hash(b"never written")).await.unwrap().is_none());
        assert!(blobs.read("../etc/passwd").await.unwrap().is_none());
    }
}
