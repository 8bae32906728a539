//! DOCX 텍스트 추출 모듈
//!
//! DOCX(ZIP + WordprocessingML)에서 `word/document.xml`을 읽어
//! 원시 텍스트와 HTML 렌더링을 각각 생성합니다.
//! 변환 중 발견한 문제(이미지 생략, 알 수 없는 스타일 등)는 경고로 수집합니다.

use std::io::Read;

use anyhow::{anyhow, bail, Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// 단일 ZIP 엔트리에서 읽을 최대 바이트 (zip-bomb 방지)
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// 본문 XML 경로
const DOCUMENT_XML: &str = "word/document.xml";

// ============================================================================
// Types
// ============================================================================

/// 변환 결과 (텍스트 또는 HTML + 경고)
#[derive(Debug, Clone, Default)]
pub struct DocxOutput {
    pub value: String,
    pub warnings: Vec<String>,
}

/// 문단
#[derive(Debug, Clone, Default)]
struct Paragraph {
    style: Option<String>,
    runs: Vec<Run>,
}

/// 서식이 동일한 텍스트 조각
#[derive(Debug, Clone, Default)]
struct Run {
    text: String,
    bold: bool,
    italic: bool,
}

impl Paragraph {
    fn plain_text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

// ============================================================================
// Public API
// ============================================================================

/// 원시 텍스트 추출 (문단은 줄바꿈으로 구분)
pub fn extract_raw_text(bytes: &[u8]) -> Result<DocxOutput> {
    let (paragraphs, warnings) = parse_document(bytes)?;

    let value = paragraphs
        .iter()
        .map(Paragraph::plain_text)
        .collect::<Vec<_>>()
        .join("\n");

    Ok(DocxOutput { value, warnings })
}

/// HTML 렌더링 (제목 스타일 → `<h1>`..`<h6>`, 굵게/기울임 → `<strong>`/`<em>`)
pub fn convert_to_html(bytes: &[u8]) -> Result<DocxOutput> {
    let (paragraphs, mut warnings) = parse_document(bytes)?;
    let mut html = String::new();

    for paragraph in &paragraphs {
        if paragraph.runs.iter().all(|r| r.text.is_empty()) {
            continue;
        }

        let tag = match paragraph.style.as_deref() {
            None => "p".to_string(),
            Some(style) => match heading_level(style) {
                Some(level) => format!("h{}", level),
                None if is_known_body_style(style) => "p".to_string(),
                None => {
                    let warning = format!(
                        "Unrecognised paragraph style: '{}' (Style ID: {})",
                        style, style
                    );
                    if !warnings.contains(&warning) {
                        warnings.push(warning);
                    }
                    "p".to_string()
                }
            },
        };

        html.push('<');
        html.push_str(&tag);
        html.push('>');
        for run in &paragraph.runs {
            let mut text = escape_html(&run.text);
            if run.italic {
                text = format!("<em>{}</em>", text);
            }
            if run.bold {
                text = format!("<strong>{}</strong>", text);
            }
            html.push_str(&text);
        }
        html.push_str("</");
        html.push_str(&tag);
        html.push('>');
    }

    Ok(DocxOutput {
        value: html,
        warnings,
    })
}

// ============================================================================
// Parsing
// ============================================================================

/// ZIP에서 document.xml을 읽어 문단 목록으로 파싱
fn parse_document(bytes: &[u8]) -> Result<(Vec<Paragraph>, Vec<String>)> {
    let xml = read_document_xml(bytes)?;
    parse_paragraphs(&xml)
}

fn read_document_xml(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).context("Invalid DOCX archive")?;

    let entry = archive
        .by_name(DOCUMENT_XML)
        .map_err(|_| anyhow!("{} not found", DOCUMENT_XML))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .context("Failed to read document.xml")?;

    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        bail!("{} exceeds size limit", DOCUMENT_XML);
    }

    Ok(xml)
}

fn parse_paragraphs(xml: &[u8]) -> Result<(Vec<Paragraph>, Vec<String>)> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut paragraphs = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let mut paragraph: Option<Paragraph> = None;
    let mut run: Option<Run> = None;
    let mut in_text = false;
    let mut in_run_props = false;
    let mut images_omitted = 0usize;

    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| anyhow!("Malformed document.xml: {}", e))?;

        match event {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"p" => paragraph = Some(Paragraph::default()),
                b"r" => run = Some(Run::default()),
                b"rPr" => in_run_props = true,
                b"t" => in_text = true,
                b"drawing" | b"pict" => images_omitted += 1,
                other => apply_property(other, e, &mut paragraph, &mut run, in_run_props),
            },
            Event::Empty(ref e) => match e.local_name().as_ref() {
                b"tab" => push_text(&mut run, "\t"),
                b"br" | b"cr" => push_text(&mut run, "\n"),
                other => apply_property(other, e, &mut paragraph, &mut run, in_run_props),
            },
            Event::Text(ref t) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| anyhow!("Malformed text node: {}", e))?;
                push_text(&mut run, &text);
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPr" => in_run_props = false,
                b"r" => {
                    if let (Some(p), Some(r)) = (paragraph.as_mut(), run.take()) {
                        p.runs.push(r);
                    }
                }
                b"p" => {
                    if let Some(p) = paragraph.take() {
                        paragraphs.push(p);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if images_omitted > 0 {
        warnings.push(format!(
            "{} embedded image(s) were omitted from the extracted text",
            images_omitted
        ));
    }

    Ok((paragraphs, warnings))
}

/// 문단/런 속성 반영 (pStyle, b, i)
fn apply_property(
    name: &[u8],
    element: &BytesStart<'_>,
    paragraph: &mut Option<Paragraph>,
    run: &mut Option<Run>,
    in_run_props: bool,
) {
    match name {
        b"pStyle" => {
            if let Some(p) = paragraph.as_mut() {
                p.style = attribute_value(element, b"val");
            }
        }
        b"b" if in_run_props => {
            if let Some(r) = run.as_mut() {
                r.bold = is_toggle_on(element);
            }
        }
        b"i" if in_run_props => {
            if let Some(r) = run.as_mut() {
                r.italic = is_toggle_on(element);
            }
        }
        _ => {}
    }
}

fn push_text(run: &mut Option<Run>, text: &str) {
    if let Some(r) = run.as_mut() {
        r.text.push_str(text);
    }
}

/// 네임스페이스 접두사를 무시하고 속성 값 조회
fn attribute_value(element: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    element
        .attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.local_name().as_ref() == local)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// `<w:b/>`는 켜짐, `<w:b w:val="false"/>`는 꺼짐
fn is_toggle_on(element: &BytesStart<'_>) -> bool {
    !matches!(
        attribute_value(element, b"val").as_deref(),
        Some("false") | Some("0") | Some("off")
    )
}

fn heading_level(style: &str) -> Option<u8> {
    let lower = style.to_lowercase();
    let level = lower.strip_prefix("heading")?.trim().parse::<u8>().ok()?;
    (1..=6).contains(&level).then_some(level)
}

fn is_known_body_style(style: &str) -> bool {
    matches!(
        style.to_lowercase().as_str(),
        "normal" | "bodytext" | "listparagraph" | "title" | "subtitle" | "quote"
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// word/document.xml 본문으로 최소 DOCX 생성
    pub(crate) fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(DOCUMENT_XML, zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_raw_text_paragraphs() {
        let docx = docx_with_body(
            "<w:p><w:r><w:t>First paragraph</w:t></w:r></w:p><w:p><w:r><w:t xml:space=\"preserve\">Second </w:t></w:r><w:r><w:t>one</w:t></w:r></w:p>",
        );
        let out = extract_raw_text(&docx).unwrap();
        assert_eq!(out.value, "First paragraph\nSecond one");
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_html_headings_and_formatting() {
        let docx = docx_with_body(
            "<w:p><w:pPr><w:pStyle w:val=\"Heading1\"/></w:pPr><w:r><w:t>Title</w:t></w:r></w:p><w:p><w:r><w:rPr><w:b/></w:rPr><w:t>bold</w:t></w:r><w:r><w:t> &amp; plain</w:t></w:r></w:p>",
        );
        let out = convert_to_html(&docx).unwrap();
        assert_eq!(
            out.value,
            "<h1>Title</h1><p><strong>bold</strong> &amp; plain</p>"
        );
    }

    #[test]
    fn test_unknown_style_warns() {
        let docx = docx_with_body(
            "<w:p><w:pPr><w:pStyle w:val=\"FancyCallout\"/></w:pPr><w:r><w:t>x</w:t></w:r></w:p>",
        );
        let out = convert_to_html(&docx).unwrap();
        assert_eq!(out.value, "<p>x</p>");
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("FancyCallout"));
    }

    #[test]
    fn test_images_are_reported() {
        let docx = docx_with_body(
            "<w:p><w:r><w:drawing></w:drawing></w:r><w:r><w:t>caption</w:t></w:r></w:p>",
        );
        let out = extract_raw_text(&docx).unwrap();
        assert_eq!(out.value, "caption");
        assert!(out.warnings[0].contains("1 embedded image"));
    }

    #[test]
    fn test_not_a_zip_is_error() {
        assert!(extract_raw_text(b"not a zip").is_err());
    }

    #[test]
    fn test_heading_level() {
        assert_eq!(heading_level("Heading2"), Some(2));
        assert_eq!(heading_level("heading 3"), Some(3));
        assert_eq!(heading_level("Heading9"), None);
        assert_eq!(heading_level("Normal"), None);
    }
}
