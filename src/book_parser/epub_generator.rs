//! EPUB 暂存目录生成器。
//!
//! 把组装好的 `Book` 写成 `mimetype` + `META-INF/` + `OEBPS/` 目录树，交给 archiver 打包。
//! 任何下载或写盘失败都会立即中止，已写出的部分目录保留在磁盘上。

use std::fs;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::html_utils::{purify_html, rewrite_image_ref};
use super::image_utils::{IMAGES_DIR, ImageRef, resolve_images, usable_image_name};
use super::templates::{
    CONTAINER_XML, CORE_CSS, COVER_PATH, PackageDocument, STYLE_CSS, chapter_xhtml,
};
use crate::download::downloader::validate_chapter_filenames;
use crate::download::models::{Book, Chapter};
use crate::error::{DownloadError, Result};
use crate::network_parser::network::ResourceFetch;

pub(crate) const MIMETYPE_FILE: &str = "mimetype";
pub(crate) const MIMETYPE: &[u8] = b"application/epub+zip";
pub(crate) const META_INF_DIR: &str = "META-INF";
pub(crate) const OEBPS_DIR: &str = "OEBPS";

const DEFAULT_STYLE: &str = include_str!("../../assets/style.css");

pub struct PackageBuilder<'a> {
    fetcher: &'a dyn ResourceFetch,
    staging: PathBuf,
}

impl<'a> PackageBuilder<'a> {
    pub fn new(fetcher: &'a dyn ResourceFetch, staging: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            staging: staging.into(),
        }
    }

    fn oebps(&self) -> PathBuf {
        self.staging.join(OEBPS_DIR)
    }

    pub fn build(&self, book: &Book) -> Result<()> {
        info!(target: "epub", path = %self.staging.display(), title = %book.title, "生成 EPUB 目录");
        // JSON 读入的 Book 同样要检查
        validate_chapter_filenames(&book.chapters)?;
        self.prepare_folders()?;
        write_file(&self.staging.join(MIMETYPE_FILE), MIMETYPE)?;
        write_file(
            &self.staging.join(META_INF_DIR).join("container.xml"),
            CONTAINER_XML.as_bytes(),
        )?;

        let has_core_css = !book.stylesheet_url.trim().is_empty();
        let images = resolve_images(book);
        self.download_images(&images)?;
        self.write_chapters(book, has_core_css)?;

        let has_cover = self.download_cover(book)?;
        self.write_styles(book, has_core_css)?;

        let document = PackageDocument {
            book,
            chapters: book.chapters_in_reading_order(),
            images: &images,
            has_cover,
            has_core_css,
            generated_at: OffsetDateTime::now_utc(),
        };
        let oebps = self.oebps();
        write_file(&oebps.join("content.opf"), document.content_opf().as_bytes())?;
        write_file(&oebps.join("toc.ncx"), document.toc_ncx().as_bytes())?;

        info!(target: "epub", chapters = book.chapters.len(), images = images.len(), "EPUB 目录生成完成");
        Ok(())
    }

    /// 同一标识的旧目录先删除，重复生成结果一致。
    fn prepare_folders(&self) -> Result<()> {
        if self.staging.exists() {
            debug!(target: "epub", path = %self.staging.display(), "清理旧的暂存目录");
            fs::remove_dir_all(&self.staging).map_err(DownloadError::fs(&self.staging))?;
        }
        for dir in [
            self.staging.join(META_INF_DIR),
            self.oebps().join(IMAGES_DIR),
        ] {
            fs::create_dir_all(&dir).map_err(DownloadError::fs(&dir))?;
        }
        Ok(())
    }

    fn download_images(&self, images: &[ImageRef]) -> Result<()> {
        let oebps = self.oebps();
        for (i, image) in images.iter().enumerate() {
            debug!(target: "epub", index = i + 1, total = images.len(), url = %image.source_url, "下载图片");
            let bytes = self.fetcher.fetch(&image.source_url)?;
            write_file(&oebps.join(&image.local_path), &bytes)?;
        }
        Ok(())
    }

    fn write_chapters(&self, book: &Book, has_core_css: bool) -> Result<()> {
        let oebps = self.oebps();
        for chapter in &book.chapters {
            let body = render_chapter_body(chapter);
            let document = chapter_xhtml(&chapter.title, &body, has_core_css);
            write_file(&oebps.join(&chapter.filename), document.as_bytes())?;
        }
        Ok(())
    }

    /// 返回是否写出了封面。
    fn download_cover(&self, book: &Book) -> Result<bool> {
        let cover = book.cover.trim();
        if cover.is_empty() {
            warn!(target: "epub", "书籍没有封面地址，跳过封面");
            return Ok(false);
        }
        let bytes = self.fetcher.fetch(cover)?;
        write_file(&self.oebps().join(COVER_PATH), &bytes)?;
        Ok(true)
    }

    fn write_styles(&self, book: &Book, has_core_css: bool) -> Result<()> {
        let oebps = self.oebps();
        write_file(&oebps.join(STYLE_CSS), DEFAULT_STYLE.as_bytes())?;
        if has_core_css {
            let bytes = self.fetcher.fetch(book.stylesheet_url.trim())?;
            write_file(&oebps.join(CORE_CSS), &bytes)?;
        }
        Ok(())
    }
}

/// 图片引用改写为包内路径，再做 XHTML 空元素规范化。
pub(crate) fn render_chapter_body(chapter: &Chapter) -> String {
    let mut content = chapter.content.clone();
    for reference in &chapter.images {
        let Some(name) = usable_image_name(reference) else {
            continue;
        };
        let local = format!("{IMAGES_DIR}/{name}");
        content = rewrite_image_ref(&content, reference, &local).into_owned();
    }
    purify_html(&content)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(DownloadError::fs(parent))?;
    }
    fs::write(path, bytes).map_err(DownloadError::fs(path))
}
