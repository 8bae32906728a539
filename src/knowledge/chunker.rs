//! Text Chunking Module
//!
//! 토큰 윈도우 기반 텍스트 분할을 제공합니다.
//! 토큰 스트림을 겹치는 고정 길이 윈도우로 자른 뒤 다시 텍스트로 복원합니다.

use serde::{Deserialize, Serialize};

use crate::tokenizer;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// 청크 당 최대 토큰 수
    pub chunk_tokens: usize,
    /// 인접 청크 간 겹치는 토큰 수
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: 600,
            overlap_tokens: 80,
        }
    }
}

impl ChunkConfig {
    /// 설정 생성
    pub fn new(chunk_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            chunk_tokens,
            overlap_tokens,
        }
    }

    /// 윈도우 이동 간격 (최소 1)
    pub fn step(&self) -> usize {
        self.chunk_tokens.saturating_sub(self.overlap_tokens).max(1)
    }
}

/// 분할된 청크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 청크 텍스트 (앞뒤 공백 제거)
    pub text: String,
    /// 윈도우의 토큰 수
    pub token_count: usize,
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할 (순서 보존)
    fn chunk(&self, text: &str) -> Vec<TextChunk>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// TokenChunker
// ============================================================================

/// 토큰 윈도우 청커
pub struct TokenChunker {
    config: ChunkConfig,
}

impl TokenChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 현재 설정
    pub fn config(&self) -> ChunkConfig {
        self.config
    }
}

impl Chunker for TokenChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        chunk_text(text, self.config.chunk_tokens, self.config.overlap_tokens)
    }

    fn name(&self) -> &'static str {
        "TokenChunker"
    }
}

/// 텍스트를 토큰 윈도우로 분할
///
/// - 빈 텍스트 / 공백만 있는 텍스트는 빈 목록
/// - `chunk_tokens` 크기의 윈도우를 `max(1, chunk_tokens - overlap_tokens)` 간격으로 이동
/// - 디코딩 결과가 공백뿐인 윈도우는 버림
/// - 마지막 청크는 `chunk_tokens`보다 짧을 수 있음
pub fn chunk_text(text: &str, chunk_tokens: usize, overlap_tokens: usize) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return vec![];
    }

    let config = ChunkConfig::new(chunk_tokens.max(1), overlap_tokens);
    let tokens = tokenizer::encode(text);
    let step = config.step();

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < tokens.len() {
        let end = (start + config.chunk_tokens).min(tokens.len());
        let window = &tokens[start..end];

        let decoded = tokenizer::decode(window);
        let trimmed = decoded.trim();
        if !trimmed.is_empty() {
            chunks.push(TextChunk {
                text: trimmed.to_string(),
                token_count: window.len(),
            });
        }

        if end >= tokens.len() {
            break;
        }

        start += step;
    }

    chunks
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_empty() {
        assert!(chunk_text("", 600, 80).is_empty());
        assert!(chunk_text("   \n\t ", 600, 80).is_empty());
    }

    #[test]
    fn test_small_text_single_chunk_roundtrip() {
        let text = "Short paragraph about hybrid search.";
        assert!(tokenizer::count_tokens(text) <= 600);

        let chunks = chunk_text(text, 600, 80);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].token_count, tokenizer::count_tokens(text));
    }

    #[test]
    fn test_adjacent_chunks_overlap() {
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let tokens = tokenizer::encode(&text);
        let (size, overlap) = (40, 10);

        let chunks = chunk_text(&text, size, overlap);
        assert!(chunks.len() > 2);

        // 마지막 청크를 제외한 모든 청크는 정확히 size 토큰
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.token_count, size);
        }

        // 윈도우 시작 위치가 (size - overlap) 간격이므로 인접 윈도우는 overlap 토큰을 공유
        let step = size - overlap;
        for i in 1..chunks.len() {
            let prev_start = (i - 1) * step;
            let start = i * step;
            let prev_end = (prev_start + size).min(tokens.len());
            assert_eq!(prev_end - start, overlap);
        }

        // 마지막 윈도우가 토큰 스트림 끝에 도달
        let last_start = (chunks.len() - 1) * step;
        assert_eq!(last_start + chunks.last().map(|c| c.token_count).unwrap_or(0), tokens.len());
    }

    #[test]
    fn test_no_overlap_covers_all_tokens() {
        let text = "Alpha beta gamma delta.";
        let total = tokenizer::count_tokens(text);

        let chunks = chunk_text(text, 2, 0);
        assert_eq!(chunks.len(), total.div_ceil(2));

        let covered: usize = chunks.iter().map(|c| c.token_count).sum();
        assert_eq!(covered, total);

        let joined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert!(joined.contains("Alpha"));
        assert!(joined.contains("delta"));
    }

    #[test]
    fn test_overlap_not_smaller_than_size_still_progresses() {
        let text = "one two three four five six seven eight";
        let chunks = chunk_text(text, 3, 5);
        // step = max(1, 3 - 5) = 1
        assert_eq!(ChunkConfig::new(3, 5).step(), 1);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.token_count <= 3));
    }

    #[test]
    fn test_chunker_trait() {
        let chunker: Box<dyn Chunker> = Box::new(TokenChunker::new(ChunkConfig::new(5, 1)));
        assert_eq!(chunker.name(), "TokenChunker");
        let chunks = chunker.chunk("Rust ownership and borrowing make memory safety explicit.");
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_config_default() {
        let config = ChunkConfig::default();
        assert_eq!(config.chunk_tokens, 600);
        assert_eq!(config.overlap_tokens, 80);
        assert_eq!(config.step(), 520);
    }
}
