//! 엔진 설정
//!
//! 설정 파일 없이 기본값 + 환경변수로 구성합니다.
//!
//! | 환경변수 | 설명 |
//! |----------|------|
//! | `PALANK_KNOWLEDGE_DIR` | 데이터 디렉토리 |
//! | `PALANK_CHUNK_TOKENS` | 청크 당 토큰 수 (기본 600) |
//! | `PALANK_CHUNK_OVERLAP` | 청크 겹침 토큰 수 (기본 80) |
//! | `PALANK_SEARCH_LIMIT` | 기본 검색 결과 수 (기본 8) |
//! | `PALANK_DISABLE_FTS` | `1`/`true`면 FTS5 인덱스 비활성화 |
//! | `PALANK_DISABLE_VECTORS` | `1`/`true`면 벡터 인덱스 비활성화 |

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::knowledge::{ChunkConfig, StoreOptions, DEFAULT_SEARCH_LIMIT};

/// 데이터 디렉토리 환경변수
pub const ENV_DATA_DIR: &str = "PALANK_KNOWLEDGE_DIR";
pub const ENV_CHUNK_TOKENS: &str = "PALANK_CHUNK_TOKENS";
pub const ENV_CHUNK_OVERLAP: &str = "PALANK_CHUNK_OVERLAP";
pub const ENV_SEARCH_LIMIT: &str = "PALANK_SEARCH_LIMIT";
pub const ENV_DISABLE_FTS: &str = "PALANK_DISABLE_FTS";
pub const ENV_DISABLE_VECTORS: &str = "PALANK_DISABLE_VECTORS";

/// 기본 데이터 디렉토리 (~/.palank-knowledge/)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palank-knowledge")
}

/// 엔진 설정
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub chunk: ChunkConfig,
    pub search_limit: usize,
    pub store: StoreOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunk: ChunkConfig::default(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            store: StoreOptions::default(),
        }
    }
}

impl EngineConfig {
    /// 기본값에 환경변수를 덮어씌운 설정
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 키 조회 함수로 설정 구성 (테스트용)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup(ENV_CHUNK_TOKENS) {
            config.chunk.chunk_tokens = parse_usize(ENV_CHUNK_TOKENS, &v)?;
        }
        if let Some(v) = lookup(ENV_CHUNK_OVERLAP) {
            config.chunk.overlap_tokens = parse_usize(ENV_CHUNK_OVERLAP, &v)?;
        }
        if let Some(v) = lookup(ENV_SEARCH_LIMIT) {
            config.search_limit = parse_usize(ENV_SEARCH_LIMIT, &v)?;
        }
        if let Some(v) = lookup(ENV_DISABLE_FTS) {
            config.store.enable_fts = !parse_flag(&v);
        }
        if let Some(v) = lookup(ENV_DISABLE_VECTORS) {
            config.store.enable_vectors = !parse_flag(&v);
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk.chunk_tokens == 0 {
            bail!("chunk_tokens must be greater than zero");
        }
        if self.chunk.overlap_tokens >= self.chunk.chunk_tokens {
            bail!(
                "overlap_tokens ({}) must be smaller than chunk_tokens ({})",
                self.chunk.overlap_tokens,
                self.chunk.chunk_tokens
            );
        }
        if self.search_limit == 0 {
            bail!("search_limit must be greater than zero");
        }
        Ok(())
    }

    /// SQLite DB 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.db")
    }

    /// Blob 디렉토리
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .with_context(|| format!("Invalid value for {}: {:?}", key, value))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.chunk, ChunkConfig::default());
        assert_eq!(config.search_limit, 8);
        assert!(config.store.enable_fts && config.store.enable_vectors);
        assert!(config.db_path().ends_with("knowledge.db"));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_DATA_DIR, "/tmp/knowledge"),
            (ENV_CHUNK_TOKENS, "200"),
            (ENV_CHUNK_OVERLAP, "20"),
            (ENV_SEARCH_LIMIT, "3"),
            (ENV_DISABLE_VECTORS, "true"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/knowledge"));
        assert_eq!(config.chunk, ChunkConfig::new(200, 20));
        assert_eq!(config.search_limit, 3);
        assert!(config.store.enable_fts);
        assert!(!config.store.enable_vectors);
        assert_eq!(config.blob_dir(), PathBuf::from("/tmp/knowledge/blobs"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_CHUNK_TOKENS, "abc")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_CHUNK_TOKENS, "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[
            (ENV_CHUNK_TOKENS, "50"),
            (ENV_CHUNK_OVERLAP, "50"),
        ]))
        .is_err());
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_SEARCH_LIMIT, "0")])).is_err());
    }
}
