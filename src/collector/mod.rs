//! 파일 수집 모듈
//!
//! 로컬 파일 및 폴더에서 지식 소스로 가져올 문서를 찾습니다.
//! .gitignore 패턴을 존중하고, 추출기가 다룰 수 있는 형식만 수집합니다.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ignore::WalkBuilder;

use crate::extractor::{MIME_DOCX, MIME_MARKDOWN, MIME_PDF, MIME_TEXT};

// ============================================================================
// Document Kinds
// ============================================================================

/// 수집 대상 문서 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// 마크다운
    Markdown,
    /// 그 외 텍스트 (코드, 설정 파일 등)
    Text,
    Pdf,
    Docx,
}

impl DocumentKind {
    /// 확장자로 문서 종류 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Some(Self::Markdown),
            "txt" | "rst" | "rs" | "ts" | "tsx" | "js" | "jsx" | "py" | "json" | "toml"
            | "yaml" | "yml" | "html" | "css" | "go" | "java" | "c" | "cpp" | "h" | "hpp"
            | "sh" | "sql" | "xml" | "csv" | "log" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// blob 등록에 쓰일 MIME 타입
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Markdown => MIME_MARKDOWN,
            Self::Text => MIME_TEXT,
            Self::Pdf => MIME_PDF,
            Self::Docx => MIME_DOCX,
        }
    }
}

// ============================================================================
// Collected File
// ============================================================================

/// 수집된 파일 정보
#[derive(Debug, Clone)]
pub struct CollectedFile {
    /// 파일 절대 경로
    pub path: PathBuf,
    pub kind: DocumentKind,
    /// 파일 크기 (바이트)
    pub size: u64,
}

impl CollectedFile {
    /// 지원하지 않는 확장자나 파일이 아니면 `None`
    pub fn from_path(path: PathBuf) -> Result<Option<Self>> {
        let Some(kind) = DocumentKind::from_path(&path) else {
            return Ok(None);
        };

        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;
        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            kind,
            size: metadata.len(),
        }))
    }

    /// 소스 이름으로 쓸 파일명
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

// ============================================================================
// File Collector
// ============================================================================

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
    /// 특정 확장자만 수집 (비어있으면 모든 지원 확장자)
    pub extensions: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 20 * 1024 * 1024, // 20MB
            extensions: vec![],
        }
    }
}

/// 파일 수집기
pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 수집기 생성
    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 단일 파일 수집
    ///
    /// 명시적으로 지정한 파일은 확장자를 몰라도 텍스트로 취급합니다.
    pub fn collect_file(&self, path: &Path) -> Result<CollectedFile> {
        let abs_path = absolutize(path)?;
        if !abs_path.is_file() {
            bail!("Not a file: {:?}", abs_path);
        }

        match CollectedFile::from_path(abs_path.clone())? {
            Some(file) => Ok(file),
            None => {
                let size = std::fs::metadata(&abs_path)?.len();
                Ok(CollectedFile {
                    path: abs_path,
                    kind: DocumentKind::Text,
                    size,
                })
            }
        }
    }

    /// 폴더 재귀 수집
    pub fn collect_directory(&self, path: &Path) -> Result<Vec<CollectedFile>> {
        let abs_path = absolutize(path)?;
        if !abs_path.is_dir() {
            bail!("Not a directory: {:?}", abs_path);
        }

        let mut files = Vec::new();

        // ignore 크레이트로 .gitignore 지원
        let walker = WalkBuilder::new(&abs_path)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            match CollectedFile::from_path(entry.path().to_path_buf()) {
                Ok(Some(file)) if self.should_include(&file) => files.push(file),
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to collect file: {}", e),
            }
        }

        tracing::info!("Collected {} files from {:?}", files.len(), abs_path);
        Ok(files)
    }

    fn should_include(&self, file: &CollectedFile) -> bool {
        if self.config.max_file_size > 0 && file.size > self.config.max_file_size {
            tracing::debug!("Skipping large file: {:?} ({} bytes)", file.path, file.size);
            return false;
        }

        if self.config.extensions.is_empty() {
            return true;
        }

        file.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.config
                    .extensions
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    let abs_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    if !abs_path.exists() {
        bail!("Path not found: {:?}", abs_path);
    }
    Ok(abs_path)
}

// ============================================================================
// Statistics
// ============================================================================

/// 수집 통계
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub total_files: usize,
    pub text_files: usize,
    pub pdf_files: usize,
    pub docx_files: usize,
    pub total_size: u64,
}

impl CollectionStats {
    pub fn from_files(files: &[CollectedFile]) -> Self {
        let mut stats = Self::default();

        for file in files {
            stats.total_files += 1;
            stats.total_size += file.size;

            match file.kind {
                DocumentKind::Markdown | DocumentKind::Text => stats.text_files += 1,
                DocumentKind::Pdf => stats.pdf_files += 1,
                DocumentKind::Docx => stats.docx_files += 1,
            }
        }

        stats
    }
}

// ============================================================================
// Tests
// ============================================================================
