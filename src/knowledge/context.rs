//! 컨텍스트 조립기 - 토큰 예산에 맞춘 프롬프트 텍스트

use std::sync::Arc;

use serde::Serialize;

use crate::tokenizer;

use super::error::KnowledgeResult;
use super::workspace::Workspace;

/// 조립 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// 전체 텍스트
    Full,
    /// 앞쪽 청크 일부
    SelectedChunks,
}

impl ContextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::SelectedChunks => "selected_chunks",
        }
    }
}

/// 프롬프트 텍스트 결과
#[derive(Debug, Clone, Serialize)]
pub struct SourceTextResult {
    pub text: String,
    pub token_count: usize,
    pub truncated: bool,
    pub mode_used: ContextMode,
    pub selected_chunk_ids: Vec<String>,
}

/// 컨텍스트 조립기
pub struct ContextAssembler {
    workspace: Arc<Workspace>,
}

impl ContextAssembler {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }

    /// 토큰 예산 안에서 소스 텍스트 반환
    ///
    /// 전체 텍스트가 예산 안이면 그대로, 아니면 청크를 순서대로 예산까지 담습니다.
    /// 첫 청크는 예산을 넘더라도 항상 포함됩니다. 추출 텍스트가 없거나
    /// 소스가 이 워크스페이스에 없으면(보관 포함) `None`.
    pub fn get_prompt_text(
        &self,
        source_id: &str,
        token_cap: usize,
    ) -> KnowledgeResult<Option<SourceTextResult>> {
        let store = self.workspace.ensure_open()?;

        if store
            .get_active_source(self.workspace.id(), source_id)?
            .is_none()
        {
            return Ok(None);
        }

        let Some(source_text) = store.get_source_text(source_id)? else {
            return Ok(None);
        };

        let total = tokenizer::count_tokens(&source_text.text);
        if total <= token_cap {
            return Ok(Some(SourceTextResult {
                text: source_text.text,
                token_count: total,
                truncated: false,
                mode_used: ContextMode::Full,
                selected_chunk_ids: vec![],
            }));
        }

        let mut used = 0usize;
        let mut texts = Vec::new();
        let mut ids = Vec::new();

        for chunk in store.list_chunks(source_id)? {
            if !ids.is_empty() && used + chunk.token_count > token_cap {
                break;
            }
            used += chunk.token_count;
            texts.push(chunk.text);
            ids.push(chunk.id);
        }

        Ok(Some(SourceTextResult {
            text: texts.join("\n\n"),
            token_count: used,
            truncated: true,
            mode_used: ContextMode::SelectedChunks,
            selected_chunk_ids: ids,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::TextChunk;
    use crate::knowledge::store::{IndexWrite, KnowledgeStore, NewSource, SourceKind, StoreOptions};

    fn setup(chunks: &[(&str, usize)]) -> (ContextAssembler, String) {
        let store = Arc::new(KnowledgeStore::open_in_memory(StoreOptions::default()).unwrap());
        let source = store
            .create_source(NewSource::new("ws", SourceKind::Text, "doc"))
            .unwrap();
        let write = IndexWrite {
            text: chunks.iter().map(|(t, _)| *t).collect::<Vec<_>>().join(" "),
            extraction_version: 1,
            chunks: chunks
                .iter()
                .map(|(t, n)| TextChunk {
                    text: t.to_string(),
                    token_count: *n,
                })
                .collect(),
            ..Default::default()
        };
        store.replace_index(&source.id, &write).unwrap();

        let workspace = Arc::new(Workspace::new("ws", store));
        (ContextAssembler::new(workspace), source.id)
    }

    #[test]
    fn test_missing_text_is_none() {
        let (assembler, _) = setup(&[("a", 1)]);
        assert!(assembler.get_prompt_text("unknown", 100).unwrap().is_none());
    }

    #[test]
    fn test_selected_chunks_respect_budget() {
        let (assembler, id) = setup(&[
            ("first chunk text", 10),
            ("second chunk text", 10),
            ("third chunk text", 10),
        ]);

        let result = assembler.get_prompt_text(&id, 2).unwrap().unwrap();
        assert_eq!(result.mode_used, ContextMode::SelectedChunks);
        assert!(result.truncated);
        // 첫 청크는 예산을 넘어도 포함
        assert_eq!(result.selected_chunk_ids.len(), 1);
        assert_eq!(result.text, "first chunk text");

        let result = assembler.get_prompt_text(&id, 5).unwrap().unwrap();
        assert_eq!(result.selected_chunk_ids.len(), 1);
    }

    #[test]
    fn test_stops_before_exceeding() {
        let (assembler, id) = setup(&[
            ("alpha alpha alpha", 3),
            ("beta beta beta", 3),
            ("gamma gamma gamma", 3),
        ]);

        // 전체 텍스트 토큰 수는 예산(6)보다 큼
        let result = assembler.get_prompt_text(&id, 6).unwrap().unwrap();
        assert!(result.truncated);
        assert_eq!(result.token_count, 6);
        assert_eq!(result.text, "alpha alpha alpha\n\nbeta beta beta");
    }
}
