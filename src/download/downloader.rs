//! 下载主流程：组装 `Book` → 生成 EPUB 目录 → 打包。

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::chapter_pool::fetch_chapters;
use super::models::{Book, Chapter};
use super::plan::{DownloadPlan, prepare_download_plan};
use crate::base_system::book_paths::{is_package_relative, staging_path};
use crate::base_system::context::Config;
use crate::book_parser::archiver;
use crate::book_parser::epub_generator::PackageBuilder;
use crate::error::{DownloadError, Result};
use crate::network_parser::network::ResourceFetch;

/// 用于从 book_id 确定性生成 UUID v5 的命名空间。
/// 元数据缺少 identifier 时，同一本书的包标识仍然保持不变。
const BOOK_UUID_NAMESPACE: uuid::Uuid = uuid::Uuid::NAMESPACE_DNS;

pub struct BookAssembler<'a> {
    fetcher: &'a dyn ResourceFetch,
    workers: usize,
}

impl<'a> BookAssembler<'a> {
    pub fn new(fetcher: &'a dyn ResourceFetch, workers: usize) -> Self {
        Self {
            fetcher,
            workers: workers.max(1),
        }
    }

    /// 任一步失败都不返回部分结果。
    pub fn assemble(&self, book_id: &str) -> Result<Book> {
        let plan = prepare_download_plan(self.fetcher, book_id)?;
        let chapters = fetch_chapters(self.fetcher, &plan.toc, plan.chapter_urls(), self.workers)?;
        validate_chapter_filenames(&chapters)?;
        let stylesheet_url = derive_stylesheet(&chapters);
        Ok(book_from_plan(plan, chapters, stylesheet_url))
    }
}

fn book_from_plan(plan: DownloadPlan, chapters: Vec<Chapter>, stylesheet_url: String) -> Book {
    let DownloadPlan { book_id, meta, .. } = plan;
    let uuid = if meta.identifier.trim().is_empty() {
        let fallback = uuid::Uuid::new_v5(&BOOK_UUID_NAMESPACE, book_id.as_bytes()).to_string();
        debug!(target: "download", book_id = %book_id, uuid = %fallback, "元数据缺少 identifier，使用派生 UUID");
        fallback
    } else {
        meta.identifier.trim().to_string()
    };

    Book {
        id: book_id,
        title: meta.title,
        uuid,
        language: meta.language,
        authors: meta.authors.into_iter().map(|a| a.name).collect(),
        cover: meta.cover,
        description: meta.description,
        publishers: meta.publishers.into_iter().map(|p| p.name).collect(),
        stylesheet_url,
        chapters,
    }
}

/// 第一个非空的样式表地址胜出；后续章节给出不同地址只记录警告。
pub(crate) fn derive_stylesheet(chapters: &[Chapter]) -> String {
    let mut chosen: Option<&str> = None;
    for chapter in chapters {
        for url in chapter.stylesheet_urls.iter().map(|u| u.trim()) {
            if url.is_empty() {
                continue;
            }
            match chosen {
                None => chosen = Some(url),
                Some(first) if first != url => {
                    warn!(
                        target: "download",
                        chapter = %chapter.filename,
                        kept = first,
                        ignored = url,
                        "章节使用了不同的样式表，沿用第一个"
                    );
                }
                Some(_) => {}
            }
        }
    }
    chosen.unwrap_or_default().to_string()
}

/// 文件名即 `OEBPS/` 下的成员名：必须是包内相对路径，且全书唯一。
pub(crate) fn validate_chapter_filenames(chapters: &[Chapter]) -> Result<()> {
    let mut seen = HashSet::with_capacity(chapters.len());
    for chapter in chapters {
        if !is_package_relative(&chapter.filename) {
            return Err(DownloadError::UnsafeFilename(chapter.filename.clone()));
        }
        if !seen.insert(chapter.filename.as_str()) {
            return Err(DownloadError::DuplicateFilename(chapter.filename.clone()));
        }
    }
    Ok(())
}

// ── 下载主流程 ──────────────────────────────────────────────────

pub fn assemble_book(config: &Config, fetcher: &dyn ResourceFetch, book_id: &str) -> Result<Book> {
    BookAssembler::new(fetcher, config.workers()).assemble(book_id)
}

/// 从已组装的 `Book` 生成暂存目录并打包到 `output`。
pub fn package_book(
    config: &Config,
    fetcher: &dyn ResourceFetch,
    book: &Book,
    output: &Path,
) -> Result<PathBuf> {
    let staging = staging_path(config, book.identifier());
    PackageBuilder::new(fetcher, &staging).build(book)?;
    archiver::archive(&staging, output)?;

    if config.auto_clear_staging {
        debug!(target: "epub", path = %staging.display(), "清理暂存目录");
        if let Err(err) = fs::remove_dir_all(&staging) {
            warn!(target: "epub", path = %staging.display(), error = %err, "暂存目录清理失败");
        }
    }
    Ok(output.to_path_buf())
}

pub fn download_book(
    config: &Config,
    fetcher: &dyn ResourceFetch,
    book_id: &str,
    output: &Path,
) -> Result<PathBuf> {
    let start = Instant::now();
    let book = assemble_book(config, fetcher, book_id)?;
    info!(target: "download", title = %book.title, chapters = book.chapters.len(), "书籍组装完成");
    let path = package_book(config, fetcher, &book, output)?;
    info!(
        target: "download",
        path = %path.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "下载完成"
    );
    Ok(path)
}
