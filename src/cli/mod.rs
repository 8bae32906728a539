//! CLI 모듈
//!
//! palank-knowledge CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::collector::{CollectionStats, CollectorConfig, DocumentKind, FileCollector};
use crate::config::EngineConfig;
use crate::engine::{KnowledgeEngine, SourceScope};
use crate::knowledge::{
    IndexOptions, IndexOutcome, KnowledgeError, KnowledgeSource, ScopeType, SearchMethod,
    SearchQuery,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-knowledge")]
#[command(version, about = "로컬 지식 인덱싱 및 하이브리드 검색 엔진", long_about = None)]
pub struct Cli {
    /// 워크스페이스 ID
    #[arg(short, long, global = true, default_value = "default")]
    pub workspace: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트, 파일, 폴더, 또는 URL을 지식 소스로 추가
    Add {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 추가할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 추가할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// URL (내용은 가져오지 않고 메모와 함께 저장)
        #[arg(short, long)]
        url: Option<String>,

        /// 소스에 붙일 메모
        #[arg(short, long)]
        notes: Option<String>,

        /// 스코프 (workspace, channel, thread, coworker)
        #[arg(long, default_value = "workspace")]
        scope: String,

        /// 스코프 ID
        #[arg(long)]
        scope_id: Option<String>,

        /// 인덱싱하지 않고 추가만
        #[arg(long)]
        no_index: bool,
    },

    /// 소스 하나 인덱싱
    Index {
        /// 소스 ID
        id: String,

        /// 내용이 같아도 다시 인덱싱
        #[arg(long)]
        force: bool,
    },

    /// 워크스페이스의 모든 파일 소스 인덱싱
    IndexAll {
        #[arg(long)]
        force: bool,
    },

    /// 지식베이스 검색
    Search {
        /// 검색 쿼리
        query: String,

        /// 스코프 필터
        #[arg(long)]
        scope: Option<String>,

        /// 스코프 ID 필터
        #[arg(long)]
        scope_id: Option<String>,

        /// 결과 개수 제한
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// 토큰 예산 안의 소스 텍스트 출력
    Context {
        /// 소스 ID
        id: String,

        /// 토큰 예산
        #[arg(long, default_value = "2000")]
        cap: usize,
    },

    /// 소스 목록
    List,

    /// 소스 삭제
    Delete {
        /// 소스 ID
        id: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::from_env().context("설정 오류")?;
    let engine =
        KnowledgeEngine::open(config, &cli.workspace).context("지식 엔진 초기화 실패")?;

    match cli.command {
        Commands::Add {
            text,
            file,
            dir,
            url,
            notes,
            scope,
            scope_id,
            no_index,
        } => {
            let scope = SourceScope {
                scope_type: parse_scope(&scope)?,
                scope_id,
                notes,
            };
            cmd_add(&engine, text, file, dir, url, scope, no_index).await
        }
        Commands::Index { id, force } => cmd_index(&engine, &id, force).await,
        Commands::IndexAll { force } => cmd_index_all(&engine, force).await,
        Commands::Search {
            query,
            scope,
            scope_id,
            limit,
        } => cmd_search(&engine, &query, scope, scope_id, limit).await,
        Commands::Context { id, cap } => cmd_context(&engine, &id, cap),
        Commands::List => cmd_list(&engine),
        Commands::Delete { id } => cmd_delete(&engine, &id),
        Commands::Status => cmd_status(&engine),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 소스 추가 명령어 (add)
async fn cmd_add(
    engine: &KnowledgeEngine,
    text: Option<String>,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    url: Option<String>,
    scope: SourceScope,
    no_index: bool,
) -> Result<()> {
    let sources = if let Some(text) = text {
        vec![engine.add_text(&text, scope).await.context("텍스트 추가 실패")?]
    } else if let Some(url) = url {
        vec![engine.add_url(&url, scope).context("URL 추가 실패")?]
    } else if file.is_some() || dir.is_some() {
        add_files(engine, file, dir, scope).await?
    } else if scope.notes.is_some() {
        vec![engine.add_memory("Memory", scope).context("메모 추가 실패")?]
    } else {
        bail!("--text, --file, --dir, --url, --notes 중 하나를 지정해야 합니다");
    };

    if sources.is_empty() {
        println!("[!] 추가할 소스가 없습니다.");
        return Ok(());
    }

    for source in &sources {
        println!("[OK] 소스 추가됨: {} (ID: {})", source.name, source.id);
    }

    if no_index {
        return Ok(());
    }

    println!();
    let mut handles = Vec::with_capacity(sources.len());
    for source in &sources {
        handles.push((
            source.name.clone(),
            engine
                .indexer()
                .spawn_index(source.id.clone(), IndexOptions::default()),
        ));
    }

    for (name, handle) in handles {
        let result = handle.await.map_err(KnowledgeError::from);
        print_outcome(&name, result.and_then(|r| r));
    }

    Ok(())
}

/// 파일/폴더 수집 후 소스 추가
async fn add_files(
    engine: &KnowledgeEngine,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    scope: SourceScope,
) -> Result<Vec<KnowledgeSource>> {
    let collector = FileCollector::new(CollectorConfig::default());

    let files = if let Some(ref file_path) = file {
        vec![collector.collect_file(file_path)?]
    } else if let Some(ref dir_path) = dir {
        collector.collect_directory(dir_path)?
    } else {
        bail!("--file 또는 --dir를 지정해야 합니다");
    };

    if files.is_empty() {
        return Ok(vec![]);
    }

    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: {} 파일", stats.total_files);
    println!(
        "    텍스트: {}, PDF: {}, DOCX: {}",
        stats.text_files, stats.pdf_files, stats.docx_files
    );
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    let mut sources = Vec::with_capacity(files.len());
    for (i, collected) in files.iter().enumerate() {
        let type_str = match collected.kind {
            DocumentKind::Markdown => "MD",
            DocumentKind::Text => "TXT",
            DocumentKind::Pdf => "PDF",
            DocumentKind::Docx => "DOCX",
        };
        println!(
            "[{}/{}] [{}] {}",
            i + 1,
            files.len(),
            type_str,
            collected.file_name()
        );

        match engine.add_file(collected, scope.clone()).await {
            Ok(source) => sources.push(source),
            Err(e) => println!("    실패: {:#}", e),
        }
    }
    println!();

    Ok(sources)
}

/// 인덱싱 명령어 (index)
async fn cmd_index(engine: &KnowledgeEngine, id: &str, force: bool) -> Result<()> {
    let result = engine
        .indexer()
        .index_source(id, IndexOptions { force })
        .await;
    if let Err(KnowledgeError::SourceNotFound(_)) = result {
        bail!("ID {}인 소스를 찾을 수 없습니다", id);
    }
    print_outcome(id, result);
    Ok(())
}

/// 전체 인덱싱 명령어 (index-all)
async fn cmd_index_all(engine: &KnowledgeEngine, force: bool) -> Result<()> {
    println!("[*] 파일 소스 인덱싱 중...");
    let report = engine.indexer().index_all_sources(force).await?;

    println!(
        "[OK] 완료: 인덱싱 {}, 변경 없음 {}, 실패 {}",
        report.indexed,
        report.unchanged,
        report.failed.len()
    );
    for (id, message) in &report.failed {
        println!("     [!] {}: {}", id, message);
    }
    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(
    engine: &KnowledgeEngine,
    query: &str,
    scope: Option<String>,
    scope_id: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let mut search = SearchQuery::new(query)
        .with_limit(limit.unwrap_or(engine.config().search_limit).max(1));
    if let Some(scope) = scope {
        search = search.with_scope(parse_scope(&scope)?, scope_id.as_deref());
    }

    println!("[*] 검색 중: \"{}\"", query);
    let results = engine.retriever().search(&search).await.context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        let method_str = match result.match_type {
            SearchMethod::Vector => "VEC",
            SearchMethod::Fts => "FTS",
            SearchMethod::Hybrid => "HYB",
        };

        let source_name = engine
            .store()
            .get_source(&result.source_id)
            .ok()
            .flatten()
            .map(|s| s.name)
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{}. [{}] [점수: {:.4}] {}",
            i + 1,
            method_str,
            result.score,
            source_name
        );
        println!("   소스: {}  청크: {}", result.source_id, result.chunk_id);
        println!("   내용: {}", truncate_text(&result.text, 200));
        println!();
    }

    Ok(())
}

/// 컨텍스트 명령어 (context)
fn cmd_context(engine: &KnowledgeEngine, id: &str, cap: usize) -> Result<()> {
    let Some(result) = engine.context().get_prompt_text(id, cap)? else {
        bail!("ID {}인 소스의 추출 텍스트가 없습니다 (인덱싱 필요)", id);
    };

    println!(
        "[OK] 모드: {} | 토큰: {} | 잘림: {}",
        result.mode_used.as_str(),
        result.token_count,
        if result.truncated { "예" } else { "아니오" }
    );
    if !result.selected_chunk_ids.is_empty() {
        println!("     선택된 청크: {}", result.selected_chunk_ids.len());
    }
    println!();
    println!("{}", result.text);

    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(engine: &KnowledgeEngine) -> Result<()> {
    let sources = engine
        .store()
        .list_sources(engine.workspace().id(), None)
        .context("소스 목록 조회 실패")?;

    if sources.is_empty() {
        println!("[!] 저장된 소스가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 소스 ({} 건):\n", sources.len());

    for source in sources {
        let scope = match source.scope_id {
            Some(ref id) => format!("{}:{}", source.scope_type, id),
            None => source.scope_type.to_string(),
        };

        println!(
            "  {} [{}] [{}] {}",
            source.id,
            source.kind,
            source.index_status,
            truncate_text(&source.name, 40)
        );
        println!(
            "        {} | {}",
            scope,
            source.created_at.format("%Y-%m-%d %H:%M")
        );
        if let Some(ref error) = source.index_error {
            println!("        오류: {}", error);
        }
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
fn cmd_delete(engine: &KnowledgeEngine, id: &str) -> Result<()> {
    let deleted = engine.store().delete_source(id).context("소스 삭제 실패")?;

    if deleted {
        println!("[OK] 소스 {} 삭제됨", id);
    } else {
        println!("[!] 삭제할 소스를 찾을 수 없습니다");
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(engine: &KnowledgeEngine) -> Result<()> {
    println!("palank-knowledge v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config = engine.config();
    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] Blob 디렉토리: {}", engine.blob_root().display());
    println!("[*] 워크스페이스: {}", engine.workspace().id());
    println!(
        "[*] 청킹: {} 토큰 / 겹침 {}",
        config.chunk.chunk_tokens, config.chunk.overlap_tokens
    );

    let stats = engine
        .store()
        .stats(engine.workspace().id())
        .context("통계 조회 실패")?;

    println!(
        "[OK] 소스: {} 건 (ready {}, pending {}, processing {}, error {})",
        stats.source_count, stats.ready, stats.pending, stats.processing, stats.error
    );
    println!("[OK] 청크: {} | 벡터: {}", stats.chunk_count, stats.vector_count);
    println!(
        "[{}] FTS5 인덱스: {}",
        if stats.fts_available { "OK" } else { "!" },
        if stats.fts_available { "사용 가능" } else { "사용 불가" }
    );
    println!(
        "[{}] 벡터 인덱스: {}",
        if stats.vector_available { "OK" } else { "!" },
        if stats.vector_available { "사용 가능" } else { "사용 불가" }
    );

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_scope(scope: &str) -> Result<ScopeType> {
    scope
        .parse::<ScopeType>()
        .with_context(|| format!("알 수 없는 스코프: {}", scope))
}

fn print_outcome(name: &str, result: Result<IndexOutcome, KnowledgeError>) {
    match result {
        Ok(IndexOutcome::Indexed { chunks, vectors }) => {
            println!("[OK] {}: 청크 {}, 벡터 {}", name, chunks, vectors)
        }
        Ok(IndexOutcome::Unchanged) => println!("[OK] {}: 변경 없음", name),
        Ok(IndexOutcome::Cleared) => println!("[OK] {}: 내용 없음 (비움)", name),
        Ok(IndexOutcome::Failed { message }) => println!("[!] {}: {}", name, message),
        Err(e) => println!("[!] {}: 인덱싱 실패: {}", name, e),
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_parse_scope() {
        assert_eq!(parse_scope("thread").unwrap(), ScopeType::Thread);
        assert!(parse_scope("galaxy").is_err());
    }

    #[test]
    fn test_cli_parses_add() {
        let cli = Cli::try_parse_from([
            "palank-knowledge",
            "--workspace",
            "team",
            "add",
            "--text",
            "hello",
            "--scope",
            "channel",
            "--scope-id",
            "c1",
            "--no-index",
        ])
        .unwrap();
        assert_eq!(cli.workspace, "team");
        match cli.command {
            Commands::Add {
                text,
                scope,
                scope_id,
                no_index,
                ..
            } => {
                assert_eq!(text.as_deref(), Some("hello"));
                assert_eq!(scope, "channel");
                assert_eq!(scope_id.as_deref(), Some("c1"));
                assert!(no_index);
            }
            _ => panic!("expected add"),
        }
    }
}
