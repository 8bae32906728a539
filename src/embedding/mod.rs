//! 임베딩 모듈 - 텍스트 → 고정 차원 벡터
//!
//! 텍스트를 고정 차원의 정규화된 벡터로 변환하는 임베딩 프로바이더입니다.
//! 현재 구현은 해시된 bag-of-tokens 방식이며, 학습된 모델로 교체될 수 있도록
//! [`EmbeddingProvider`] 트레이트 뒤에 있습니다.
//!
//! 다른 컴포넌트가 의존해도 되는 것은 **차원**과 **L2 정규화** 규약뿐입니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = HashedBagEmbedding::new();
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::tokenizer;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Hashed Bag-of-Tokens Embedding
// ============================================================================

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 384;

/// 해시된 bag-of-tokens 임베딩
///
/// 각 토큰 ID에 대해 `vector[id mod D] += 1` 후 L2 정규화합니다.
/// 결정적이며 네트워크를 사용하지 않습니다.
#[derive(Debug, Clone)]
pub struct HashedBagEmbedding {
    dimension: usize,
}

impl HashedBagEmbedding {
    /// 기본 차원(384)으로 생성
    pub fn new() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }

    /// 차원을 지정하여 생성
    pub fn with_dimension(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            bail!("Invalid dimension: 0. Must be greater than zero");
        }
        Ok(Self { dimension })
    }

    /// 동기 임베딩 (트레이트 구현이 그대로 사용)
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for id in tokenizer::encode(text) {
            vector[id as usize % self.dimension] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

impl Default for HashedBagEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for HashedBagEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashed-bag-of-tokens"
    }
}

/// L2 정규화 (영벡터는 그대로 둠)
fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

// ============================================================================
// Serialization
// ============================================================================

/// 벡터 → little-endian f32 바이트 (저장 및 쿼리용)
pub fn serialize_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// little-endian f32 바이트 → 벡터
///
/// 길이가 4의 배수가 아니면 남는 바이트는 무시합니다.
pub fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

// ============================================================================
// Factory Function
// ============================================================================

/// 기본 임베딩 프로바이더 생성
pub fn create_embedder() -> HashedBagEmbedding {
    let embedder = HashedBagEmbedding::new();
    tracing::debug!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    embedder
}

// ============================================================================
// Tests
// ============================================================================
