//! 토크나이저 모듈 - BPE 기반 텍스트 ↔ 토큰 변환
//!
//! 고정된 서브워드 어휘(cl100k_base)를 사용하는 결정적 토크나이저입니다.
//! 청킹, 임베딩, 토큰 예산 계산의 기반이 됩니다.
//!
//! 어휘는 프로세스당 한 번만 로드되어 재사용됩니다.
//! ref: https://github.com/zurawiki/tiktoken-rs

use std::sync::OnceLock;

use anyhow::Result;
use tiktoken_rs::CoreBPE;

/// 디코딩 실패 시 보류할 최대 토큰 수
///
/// UTF-8 문자 하나는 최대 4바이트이므로 4개 토큰 안에 복원되지 않으면
/// 윈도우 경계에서 잘린 조각으로 간주합니다.
const MAX_PENDING_TOKENS: usize = 4;

/// 대체 문자 (복원 불가능한 바이트 조각)
const REPLACEMENT: char = '\u{FFFD}';

// ============================================================================
// Tokenizer
// ============================================================================

/// BPE 토크나이저
///
/// `encode` / `decode` / `count_tokens`는 모두 순수 함수이며 부수효과가 없습니다.
pub struct Tokenizer {
    bpe: CoreBPE,
}

impl Tokenizer {
    /// 내장 어휘(cl100k_base)로 토크나이저 생성
    ///
    /// 어휘 자산이 손상된 경우에만 실패합니다.
    pub fn load() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()?;
        Ok(Self { bpe })
    }

    /// 텍스트 → 토큰 ID
    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe
            .encode_ordinary(text)
            .into_iter()
            .map(|id| id as u32)
            .collect()
    }

    /// 토큰 ID → 텍스트
    ///
    /// 토큰 윈도우가 멀티바이트 문자 중간에서 잘린 경우에도 실패하지 않고
    /// 복원 가능한 부분만 디코딩합니다 (잘린 조각은 U+FFFD).
    pub fn decode(&self, ids: &[u32]) -> String {
        if ids.is_empty() {
            return String::new();
        }

        if let Ok(text) = self.bpe.decode(ids.iter().map(|&id| id as usize).collect()) {
            return text;
        }

        // 느린 경로: 토큰 단위로 복원
        let mut out = String::new();
        let mut pending: Vec<usize> = Vec::with_capacity(MAX_PENDING_TOKENS);

        for &id in ids {
            pending.push(id as usize);
            self.flush_pending(&mut pending, &mut out);
        }

        while !pending.is_empty() {
            pending.remove(0);
            out.push(REPLACEMENT);
            self.flush_pending(&mut pending, &mut out);
        }

        out
    }

    /// 보류 중인 토큰이 디코딩되면 출력에 추가
    fn flush_pending(&self, pending: &mut Vec<usize>, out: &mut String) {
        loop {
            if pending.is_empty() {
                return;
            }
            if let Ok(text) = self.bpe.decode(pending.clone()) {
                out.push_str(&text);
                pending.clear();
                return;
            }
            if pending.len() < MAX_PENDING_TOKENS {
                return;
            }
            pending.remove(0);
            out.push(REPLACEMENT);
        }
    }

    /// 토큰 개수
    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len()
    }
}

// ============================================================================
// Global Instance
// ============================================================================

static TOKENIZER: OnceLock<Tokenizer> = OnceLock::new();

/// 프로세스 공용 토크나이저
///
/// 최초 호출 시 어휘를 로드합니다. 어휘 손상은 복구 불가능한 시작 오류입니다.
pub fn tokenizer() -> &'static Tokenizer {
    TOKENIZER.get_or_init(|| match Tokenizer::load() {
        Ok(t) => t,
        Err(e) => panic!("Failed to load BPE vocabulary: {}", e),
    })
}

/// 텍스트 → 토큰 ID (공용 인스턴스)
pub fn encode(text: &str) -> Vec<u32> {
    tokenizer().encode(text)
}

/// 토큰 ID → 텍스트 (공용 인스턴스)
pub fn decode(ids: &[u32]) -> String {
    tokenizer().decode(ids)
}

/// 토큰 개수 (공용 인스턴스)
pub fn count_tokens(text: &str) -> usize {
    tokenizer().count_tokens(text)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_ascii() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let ids = encode(text);
        assert!(!ids.is_empty());
        assert_eq!(decode(&ids), text);
    }

    #[test]
    fn test_roundtrip_unicode() {
        let text = "안녕하세요 세계! 지식 검색 엔진";
        assert_eq!(decode(&encode(text)), text);
    }

    #[test]
    fn test_count_matches_encode() {
        let text = "Hybrid retrieval fuses BM25 and vector rankings.";
        assert_eq!(count_tokens(text), encode(text).len());
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_deterministic() {
        let text = "determinism matters";
        assert_eq!(encode(text), encode(text));
    }

    #[test]
    fn test_decode_split_multibyte_does_not_fail() {
        // 한글은 여러 토큰으로 나뉠 수 있으므로 임의의 절반만 디코딩해도 패닉이 없어야 함
        let ids = encode("가나다라마바사아자차카타파하");
        for cut in 0..ids.len() {
            let _ = decode(&ids[..cut]);
            let _ = decode(&ids[cut..]);
        }
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(decode(&[]), "");
    }
}
