//! 章节图片引用解析：远端地址、包内路径与 MIME。

use std::collections::HashMap;

use tracing::warn;

use crate::base_system::book_paths::is_package_relative;
use crate::download::models::Book;

/// 包内图片目录（相对 OEBPS）。
pub(crate) const IMAGES_DIR: &str = "images";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageRef {
    pub source_url: String,
    /// 相对 OEBPS 的路径，例如 `images/bar.png`。
    pub local_path: String,
    pub media_type: &'static str,
}

// ── MIME / 扩展名 ───────────────────────────────────────────────

pub(crate) fn media_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "image/png",
    }
}

// ── 路径 ────────────────────────────────────────────────────────

/// 引用的最后一个路径段；没有 `/` 时原样返回。
pub(crate) fn local_image_name(reference: &str) -> &str {
    let trimmed = reference.trim().trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, name)) => name,
        None => trimmed,
    }
}

/// 能落进 `images/` 的文件名；空名、`.`、`..` 等返回 `None`。
pub(crate) fn usable_image_name(reference: &str) -> Option<&str> {
    let name = local_image_name(reference);
    is_package_relative(name).then_some(name)
}

pub(crate) fn local_image_path(reference: &str) -> String {
    format!("{IMAGES_DIR}/{}", local_image_name(reference))
}

/// 绝对地址原样使用，否则拼接到章节的资源根地址上。
pub(crate) fn image_source_url(asset_base_url: &str, reference: &str) -> String {
    let reference = reference.trim();
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return reference.to_string();
    }
    if asset_base_url.is_empty() {
        return reference.to_string();
    }
    format!(
        "{}/{}",
        asset_base_url.trim_end_matches('/'),
        reference.trim_start_matches('/')
    )
}

/// 收集全书图片，按包内路径去重（保留第一次出现的远端地址）。
///
/// 不同远端地址落到同一个包内路径时记录警告，后者被忽略。
pub(crate) fn resolve_images(book: &Book) -> Vec<ImageRef> {
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut images = Vec::new();

    for chapter in &book.chapters {
        for reference in &chapter.images {
            if usable_image_name(reference).is_none() {
                warn!(target: "epub", reference = %reference, "图片引用无法映射为包内文件名，跳过");
                continue;
            }
            let local_path = local_image_path(reference);
            let source_url = image_source_url(&chapter.asset_base_url, reference);

            if let Some(existing) = seen.get(&local_path) {
                if existing != &source_url {
                    warn!(
                        target: "epub",
                        path = %local_path,
                        kept = %existing,
                        ignored = %source_url,
                        "不同图片映射到同一路径，只保留第一张"
                    );
                }
                continue;
            }

            seen.insert(local_path.clone(), source_url.clone());
            images.push(ImageRef {
                media_type: media_type_for(&local_path),
                source_url,
                local_path,
            });
        }
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::Chapter;

    fn chapter(base: &str, images: &[&str]) -> Chapter {
        Chapter {
            asset_base_url: base.to_string(),
            images: images.iter().map(|s| s.to_string()).collect(),
            ..Chapter::default()
        }
    }

    #[test]
    fn local_names_use_last_segment() {
        assert_eq!(local_image_path("foo/bar.png"), "images/bar.png");
        assert_eq!(local_image_path("cover.jpg"), "images/cover.jpg");
        assert_eq!(local_image_path("a/b/c/d.gif"), "images/d.gif");
    }

    #[test]
    fn media_type_from_extension_defaults_to_png() {
        assert_eq!(media_type_for("images/a.JPG"), "image/jpeg");
        assert_eq!(media_type_for("images/a.svg"), "image/svg+xml");
        assert_eq!(media_type_for("images/a.webp"), "image/webp");
        assert_eq!(media_type_for("images/noext"), "image/png");
    }

    #[test]
    fn source_url_joins_asset_base() {
        assert_eq!(
            image_source_url("https://cdn/files/", "/foo/bar.png"),
            "https://cdn/files/foo/bar.png"
        );
        assert_eq!(
            image_source_url("https://cdn/files", "https://other/x.png"),
            "https://other/x.png"
        );
    }

    #[test]
    fn dot_segments_are_not_image_names() {
        assert_eq!(usable_image_name("figs/a.png"), Some("a.png"));
        assert_eq!(usable_image_name("foo/.."), None);
        assert_eq!(usable_image_name("foo/."), None);
        assert_eq!(usable_image_name(".."), None);
        assert_eq!(usable_image_name("  "), None);

        let book = Book {
            chapters: vec![chapter("https://cdn/a/", &["foo/..", "fig/ok.png", ".."])],
            ..Book::default()
        };
        let paths: Vec<String> = resolve_images(&book).into_iter().map(|i| i.local_path).collect();
        assert_eq!(paths, ["images/ok.png"]);
    }

    #[test]
    fn dedupes_by_local_path_keeping_first() {
        let book = Book {
            chapters: vec![
                chapter("https://cdn/a/", &["fig/one.png", "fig/two.png"]),
                chapter("https://cdn/a/", &["fig/one.png"]),
                chapter("https://cdn/b/", &["other/two.png"]),
            ],
            ..Book::default()
        };
        let images = resolve_images(&book);
        let paths: Vec<&str> = images.iter().map(|i| i.local_path.as_str()).collect();
        assert_eq!(paths, ["images/one.png", "images/two.png"]);
        assert_eq!(images[1].source_url, "https://cdn/a/fig/two.png");
    }
}
