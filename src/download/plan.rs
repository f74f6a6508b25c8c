//! 下载计划：拉取书籍元数据与扁平目录，得到章节 URL 列表和 URL → 目录项映射。

use std::collections::HashMap;

use tracing::{debug, info};

use super::models::{BookMeta, TocEntry};
use crate::error::{DownloadError, Result};
use crate::network_parser::network::ResourceFetch;

#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub book_id: String,
    pub meta: BookMeta,
    /// 远端章节 URL → 目录项，仅用于解析 `order` / `id`。
    pub toc: HashMap<String, TocEntry>,
}

impl DownloadPlan {
    pub fn chapter_urls(&self) -> &[String] {
        &self.meta.chapters
    }
}

pub fn book_meta_path(book_id: &str) -> String {
    format!("/api/v1/book/{}/", book_id.trim())
}

pub fn flat_toc_path(book_id: &str) -> String {
    format!("/api/v1/book/{}/flat-toc/", book_id.trim())
}

pub fn fetch_book_meta(fetcher: &dyn ResourceFetch, book_id: &str) -> Result<BookMeta> {
    let body = fetcher.fetch(&book_meta_path(book_id))?;
    serde_json::from_slice(&body).map_err(DownloadError::decode("book metadata"))
}

pub fn fetch_flat_toc(
    fetcher: &dyn ResourceFetch,
    book_id: &str,
) -> Result<HashMap<String, TocEntry>> {
    let body = fetcher.fetch(&flat_toc_path(book_id))?;
    let entries: Vec<TocEntry> =
        serde_json::from_slice(&body).map_err(DownloadError::decode("flat toc"))?;
    Ok(index_toc(entries))
}

/// 同一 URL 出现多次时保留第一项（目录里的锚点子项与章节共用 URL）。
pub fn index_toc(entries: Vec<TocEntry>) -> HashMap<String, TocEntry> {
    let mut toc = HashMap::with_capacity(entries.len());
    for entry in entries {
        toc.entry(entry.url.clone()).or_insert(entry);
    }
    toc
}

pub fn prepare_download_plan(fetcher: &dyn ResourceFetch, book_id: &str) -> Result<DownloadPlan> {
    info!(target: "download", book_id, "准备下载计划");
    let meta = fetch_book_meta(fetcher, book_id)?;
    debug!(target: "download", title = %meta.title, chapters = meta.chapters.len(), "元数据获取完成");

    let toc = fetch_flat_toc(fetcher, book_id)?;
    debug!(target: "download", entries = toc.len(), "目录获取完成");

    Ok(DownloadPlan {
        book_id: book_id.trim().to_string(),
        meta,
        toc,
    })
}
