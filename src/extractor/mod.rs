//! 콘텐츠 추출 모듈
//!
//! 바이트와 MIME/파일명 힌트로부터 텍스트 콘텐츠를 추출합니다.
//! - PDF 파일: pdf-extract로 페이지별 텍스트 추출
//! - DOCX 파일: 원시 텍스트와 HTML 렌더링을 병렬로 생성
//! - 그 외 (텍스트, 마크다운, 알 수 없는 형식): UTF-8 텍스트로 디코딩
//!
//! 추출은 형식 오류로 실패하지 않습니다. 최선의 텍스트와 경고를 반환합니다.

pub mod docx;
pub mod pdf;

use std::path::Path;

use tokio::task;

/// 추출 로직 버전 (source_texts.extraction_version)
pub const EXTRACTION_VERSION: i64 = 1;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_TEXT: &str = "text/plain";

/// 텍스트 레이어가 없는 PDF 경고
pub const PDF_NO_TEXT_WARNING: &str =
    "PDF contains no extractable text; it may be a scanned document";

// ============================================================================
// Input / Output
// ============================================================================

/// 추출 입력
#[derive(Debug, Clone, Default)]
pub struct ExtractInput {
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
    pub filename: Option<String>,
}

impl ExtractInput {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ..Default::default()
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// 추출된 콘텐츠
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContent {
    /// 정규화된 평문 텍스트
    pub text: String,
    /// HTML 렌더링 (DOCX)
    pub rich_text: Option<String>,
    /// 추출 중 발생한 경고
    pub warnings: Vec<String>,
}

/// 감지된 문서 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
}

impl DocumentFormat {
    /// MIME 우선, 확장자 차선으로 형식 결정. 알 수 없으면 Text.
    pub fn detect(mime: Option<&str>, filename: Option<&str>) -> Self {
        if let Some(mime) = mime {
            let mime = mime
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            match mime.as_str() {
                MIME_PDF => return Self::Pdf,
                MIME_DOCX => return Self::Docx,
                m if m.starts_with("text/") => return Self::Text,
                _ => {}
            }
        }

        let ext = filename
            .and_then(|f| Path::new(f).extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("pdf") => Self::Pdf,
            Some("docx") => Self::Docx,
            _ => Self::Text,
        }
    }
}

/// 확장자로 MIME 추정 (blob 등록용)
pub fn guess_mime(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("pdf") => MIME_PDF,
        Some("docx") => MIME_DOCX,
        Some("md") | Some("markdown") => MIME_MARKDOWN,
        _ => MIME_TEXT,
    }
}

// ============================================================================
// Content Extractor
// ============================================================================

/// 콘텐츠 추출기
#[derive(Debug, Clone, Default)]
pub struct ContentExtractor;

impl ContentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// 바이트에서 콘텐츠 추출
    pub async fn extract(&self, input: ExtractInput) -> ExtractedContent {
        let format = DocumentFormat::detect(input.mime.as_deref(), input.filename.as_deref());
        tracing::debug!(
            "Extracting {:?} ({} bytes, {:?})",
            format,
            input.bytes.len(),
            input.filename
        );

        match format {
            DocumentFormat::Pdf => self.extract_pdf(input.bytes).await,
            DocumentFormat::Docx => self.extract_docx(input.bytes).await,
            DocumentFormat::Text => extract_plain(&input.bytes),
        }
    }

    /// PDF 추출 (CPU 바운드이므로 spawn_blocking)
    async fn extract_pdf(&self, bytes: Vec<u8>) -> ExtractedContent {
        let shared = std::sync::Arc::new(bytes);
        let pdf_bytes = shared.clone();
        let result = task::spawn_blocking(move || pdf::extract_pages(&pdf_bytes)).await;

        match result {
            Ok(Ok(pages)) => pdf_content(&pages),
            Ok(Err(e)) => fallback_with_warning(&shared, format!("PDF extraction failed: {}", e)),
            Err(e) => fallback_with_warning(&shared, format!("PDF extraction task failed: {}", e)),
        }
    }

    /// DOCX 추출: 원시 텍스트와 HTML을 병렬로 생성하고 경고를 합침
    async fn extract_docx(&self, bytes: Vec<u8>) -> ExtractedContent {
        let shared = std::sync::Arc::new(bytes);
        let raw_bytes = shared.clone();
        let html_bytes = shared.clone();

        let (raw, html) = tokio::join!(
            task::spawn_blocking(move || docx::extract_raw_text(&raw_bytes)),
            task::spawn_blocking(move || docx::convert_to_html(&html_bytes)),
        );

        let mut warnings = Vec::new();

        let text = match raw {
            Ok(Ok(out)) => {
                merge_warnings(&mut warnings, out.warnings);
                normalize_whitespace(&out.value)
            }
            Ok(Err(e)) => {
                let fallback =
                    fallback_with_warning(&shared, format!("DOCX text extraction failed: {}", e));
                merge_warnings(&mut warnings, fallback.warnings);
                fallback.text
            }
            Err(e) => {
                warnings.push(format!("DOCX text extraction task failed: {}", e));
                String::new()
            }
        };

        let rich_text = match html {
            Ok(Ok(out)) => {
                merge_warnings(&mut warnings, out.warnings);
                Some(out.value).filter(|h| !h.is_empty())
            }
            Ok(Err(e)) => {
                merge_warnings(
                    &mut warnings,
                    vec![format!("DOCX HTML conversion failed: {}", e)],
                );
                None
            }
            Err(e) => {
                warnings.push(format!("DOCX HTML conversion task failed: {}", e));
                None
            }
        };

        ExtractedContent {
            text,
            rich_text,
            warnings,
        }
    }
}

/// 페이지 텍스트를 빈 줄로 합침 (페이지가 없으면 경고)
fn pdf_content(pages: &[String]) -> ExtractedContent {
    let text = normalize_whitespace(&pages.join("\n\n"));
    let warnings = if text.is_empty() {
        vec![PDF_NO_TEXT_WARNING.to_string()]
    } else {
        vec![]
    };

    ExtractedContent {
        text,
        rich_text: None,
        warnings,
    }
}

/// UTF-8 평문 디코딩 (잘못된 바이트는 대체 문자로)
fn extract_plain(bytes: &[u8]) -> ExtractedContent {
    let mut warnings = Vec::new();
    if std::str::from_utf8(bytes).is_err() {
        warnings.push("Input is not valid UTF-8; invalid sequences were replaced".to_string());
    }

    ExtractedContent {
        text: normalize_whitespace(&String::from_utf8_lossy(bytes)),
        rich_text: None,
        warnings,
    }
}

fn fallback_with_warning(bytes: &[u8], warning: String) -> ExtractedContent {
    tracing::warn!("{}", warning);
    let mut content = extract_plain(bytes);
    content.warnings.insert(0, warning);
    content
}

fn merge_warnings(into: &mut Vec<String>, from: Vec<String>) {
    for warning in from {
        if !into.contains(&warning) {
            into.push(warning);
        }
    }
}

/// 연속 공백을 단일 공백으로 줄이고 앞뒤 공백 제거
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_prefers_mime() {
        assert_eq!(
            DocumentFormat::detect(Some(MIME_PDF), Some("notes.txt")),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::detect(Some("text/markdown; charset=utf-8"), Some("x.pdf")),
            DocumentFormat::Text
        );
    }

    #[test]
    fn test_detect_falls_back_to_extension() {
        assert_eq!(
            DocumentFormat::detect(Some("application/octet-stream"), Some("Report.DOCX")),
            DocumentFormat::Docx
        );
        assert_eq!(DocumentFormat::detect(None, Some("a.pdf")), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::detect(None, None), DocumentFormat::Text);
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("readme.md"), MIME_MARKDOWN);
        assert_eq!(guess_mime("paper.pdf"), MIME_PDF);
        assert_eq!(guess_mime("unknown.bin"), MIME_TEXT);
    }

    #[test]
    fn test_pdf_without_text_warns() {
        let empty = pdf_content(&[]);
        assert!(empty.text.is_empty());
        assert_eq!(empty.warnings, vec![PDF_NO_TEXT_WARNING.to_string()]);

        let pages = pdf_content(&["Page one".to_string(), "Page two".to_string()]);
        assert_eq!(pages.text, "Page one Page two");
        assert!(pages.warnings.is_empty());
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\n b\t c  "), "a b c");
        assert_eq!(normalize_whitespace(" \n "), "");
    }

    #[tokio::test]
    async fn test_markdown_is_plain_text() {
        let extractor = ContentExtractor::new();
        let out = extractor
            .extract(
                ExtractInput::new(b"# Title\n\nAlpha   beta".to_vec()).with_filename("doc.md"),
            )
            .await;
        assert_eq!(out.text, "# Title Alpha beta");
        assert!(out.rich_text.is_none());
        assert!(out.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_warns() {
        let extractor = ContentExtractor::new();
        let out = extractor
            .extract(ExtractInput::new(vec![b'o', b'k', 0xff, b'!']))
            .await;
        assert!(out.text.starts_with("ok"));
        assert_eq!(out.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_pdf_degrades() {
        let extractor = ContentExtractor::new();
        let out = extractor
            .extract(ExtractInput::new(b"plain words".to_vec()).with_mime(MIME_PDF))
            .await;
        assert_eq!(out.text, "plain words");
        assert!(out.warnings[0].starts_with("PDF extraction"));
    }

    #[tokio::test]
    async fn test_docx_text_and_html() {
        let bytes = docx::tests::docx_with_body(
            "<w:p><w:pPr><w:pStyle w:val=\"Heading2\"/></w:pPr><w:r><w:t>Overview</w:t></w:r></w:p><w:p><w:r><w:t>Hybrid   search</w:t></w:r></w:p>",
        );
        let extractor = ContentExtractor::new();
        let out = extractor
            .extract(ExtractInput::new(bytes).with_filename("report.docx"))
            .await;

        assert_eq!(out.text, "Overview Hybrid search");
        assert_eq!(
            out.rich_text.as_deref(),
            Some("<h2>Overview</h2><p>Hybrid   search</p>")
        );
        assert!(out.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_docx_warnings_are_deduplicated() {
        let bytes = docx::tests::docx_with_body(
            "<w:p><w:r><w:pict></w:pict><w:t>figure</w:t></w:r></w:p>",
        );
        let out = ContentExtractor::new()
            .extract(ExtractInput::new(bytes).with_mime(MIME_DOCX))
            .await;
        // 이미지 경고는 두 패스 모두에서 보고되지만 한 번만 남음
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.text, "figure");
    }
}
