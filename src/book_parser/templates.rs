//! 包内 XML 文档渲染：container.xml、章节 XHTML、content.opf、toc.ncx。

use time::OffsetDateTime;
use time::macros::format_description;

use super::html_utils::escape_html;
use super::image_utils::ImageRef;
use crate::download::models::{Book, Chapter};

pub(crate) const COVER_PATH: &str = "images/cover.jpg";
pub(crate) const STYLE_CSS: &str = "style.css";
pub(crate) const CORE_CSS: &str = "core.css";

const CORE_CSS_LINK: &str =
    r#"<link type="text/css" rel="stylesheet" media="all" href="core.css" />"#;

pub(crate) const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

// ── 章节 ────────────────────────────────────────────────────────

pub(crate) fn chapter_xhtml(title: &str, content: &str, with_core_css: bool) -> String {
    let core = if with_core_css { CORE_CSS_LINK } else { "" };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8" />
  <title>{title}</title>
  <link type="text/css" rel="stylesheet" media="all" href="style.css" />
  {core}
</head>
<body>
{content}
</body>
</html>
"#,
        title = escape_html(title),
    )
}

// ── 包文档 ──────────────────────────────────────────────────────

/// 渲染 content.opf / toc.ncx 所需的全部输入。章节已按阅读顺序排列。
pub(crate) struct PackageDocument<'a> {
    pub book: &'a Book,
    pub chapters: Vec<&'a Chapter>,
    pub images: &'a [ImageRef],
    pub has_cover: bool,
    pub has_core_css: bool,
    pub generated_at: OffsetDateTime,
}

/// manifest 中第 `position` 个章节的 id（按阅读顺序，从 0 起）。
fn chapter_item_id(position: usize) -> String {
    format!("chapter-{:04}", position + 1)
}

fn image_item_id(position: usize) -> String {
    format!("image-{:04}", position + 1)
}

impl PackageDocument<'_> {
    fn date(&self) -> String {
        self.generated_at
            .format(format_description!("[year]-[month]-[day]"))
            .unwrap_or_default()
    }

    fn iso_date(&self) -> String {
        self.generated_at
            .format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
            ))
            .unwrap_or_default()
    }

    fn authors(&self) -> String {
        self.book.authors.join(", ")
    }

    pub(crate) fn content_opf(&self) -> String {
        let book = self.book;
        let title = escape_html(&book.title);
        let uid = escape_html(book.identifier());
        let creator = escape_html(&self.authors());
        let publisher = escape_html(&book.publishers.join(", "));
        let year = self.generated_at.year();

        let mut out = String::with_capacity(4096);
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="bookid" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf" xmlns:dcterms="http://purl.org/dc/terms/">
"#);
        out.push_str(&format!("    <dc:title>{title}</dc:title>\n"));
        if !creator.is_empty() {
            out.push_str(&format!(
                "    <dc:creator opf:role=\"aut\">{creator}</dc:creator>\n"
            ));
        }
        out.push_str(&format!(
            "    <dc:identifier id=\"bookid\">{uid}</dc:identifier>\n"
        ));
        out.push_str(&format!(
            "    <dc:language>{}</dc:language>\n",
            escape_html(&book.language)
        ));
        out.push_str(&format!("    <dc:date>{}</dc:date>\n", self.date()));
        if !publisher.is_empty() {
            out.push_str(&format!("    <dc:publisher>{publisher}</dc:publisher>\n"));
        }
        if !book.description.trim().is_empty() {
            out.push_str(&format!(
                "    <dc:description>{}</dc:description>\n",
                escape_html(&book.description)
            ));
        }
        out.push_str(&format!(
            "    <dc:rights>Copyright © {year} {}</dc:rights>\n",
            if publisher.is_empty() { &creator } else { &publisher }
        ));
        out.push_str(&format!(
            "    <meta property=\"dcterms:modified\">{}</meta>\n",
            self.iso_date()
        ));
        if self.has_cover {
            out.push_str("    <meta name=\"cover\" content=\"cover-image\"/>\n");
        }
        out.push_str("  </metadata>\n  <manifest>\n");

        out.push_str(
            "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
        );
        out.push_str(&format!(
            "    <item id=\"style\" href=\"{STYLE_CSS}\" media-type=\"text/css\"/>\n"
        ));
        if self.has_core_css {
            out.push_str(&format!(
                "    <item id=\"core-style\" href=\"{CORE_CSS}\" media-type=\"text/css\"/>\n"
            ));
        }
        if self.has_cover {
            out.push_str(&format!(
                "    <item id=\"cover-image\" href=\"{COVER_PATH}\" media-type=\"image/jpeg\"/>\n"
            ));
        }
        for (pos, chapter) in self.chapters.iter().enumerate() {
            out.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                chapter_item_id(pos),
                escape_html(&chapter.filename)
            ));
        }
        for (pos, image) in self.images.iter().enumerate() {
            // 封面单独登记，避免同一路径出现两次
            if self.has_cover && image.local_path == COVER_PATH {
                continue;
            }
            out.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
                image_item_id(pos),
                escape_html(&image.local_path),
                image.media_type
            ));
        }
        out.push_str("  </manifest>\n  <spine toc=\"ncx\">\n");
        for pos in 0..self.chapters.len() {
            out.push_str(&format!(
                "    <itemref idref=\"{}\"/>\n",
                chapter_item_id(pos)
            ));
        }
        out.push_str("  </spine>\n  <guide>\n");
        if self.has_cover {
            out.push_str(&format!(
                "    <reference type=\"cover\" title=\"Cover\" href=\"{COVER_PATH}\"/>\n"
            ));
        }
        out.push_str("  </guide>\n</package>\n");
        out
    }

    pub(crate) fn toc_ncx(&self) -> String {
        let book = self.book;
        let mut out = String::with_capacity(2048);
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
"#);
        out.push_str(&format!(
            "    <meta name=\"dtb:uid\" content=\"{}\"/>\n",
            escape_html(book.identifier())
        ));
        out.push_str("    <meta name=\"dtb:depth\" content=\"1\"/>\n");
        out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\"/>\n");
        out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\"/>\n");
        out.push_str("  </head>\n");
        out.push_str(&format!(
            "  <docTitle><text>{}</text></docTitle>\n",
            escape_html(&book.title)
        ));
        out.push_str(&format!(
            "  <docAuthor><text>{}</text></docAuthor>\n",
            escape_html(&self.authors())
        ));
        out.push_str("  <navMap>\n");
        for (pos, chapter) in self.chapters.iter().enumerate() {
            let label = if chapter.title.trim().is_empty() {
                &chapter.filename
            } else {
                &chapter.title
            };
            out.push_str(&format!(
                "    <navPoint id=\"nav-{}\" playOrder=\"{}\">\n      <navLabel><text>{}</text></navLabel>\n      <content src=\"{}\"/>\n    </navPoint>\n",
                pos + 1,
                pos + 1,
                escape_html(label),
                escape_html(&chapter.filename)
            ));
        }
        out.push_str("  </navMap>\n</ncx>\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn chapter(filename: &str, title: &str, order: i64) -> Chapter {
        Chapter {
            filename: filename.to_string(),
            title: title.to_string(),
            order,
            ..Chapter::default()
        }
    }

    fn sample_book() -> Book {
        Book {
            title: "Rust & Friends".to_string(),
            uuid: "9781492052593".to_string(),
            language: "en".to_string(),
            authors: vec!["Ann".to_string(), "Bo".to_string()],
            publishers: vec!["O'Reilly Media, Inc.".to_string()],
            chapters: vec![
                chapter("ch02.html", "Two", 2),
                chapter("ch00.html", "Zero", 0),
                chapter("ch01.html", "One", 1),
            ],
            ..Book::default()
        }
    }

    fn document<'a>(book: &'a Book, images: &'a [ImageRef]) -> PackageDocument<'a> {
        PackageDocument {
            book,
            chapters: book.chapters_in_reading_order(),
            images,
            has_cover: true,
            has_core_css: false,
            generated_at: datetime!(2024-03-05 07:08:09 UTC),
        }
    }

    fn position(haystack: &str, needle: &str) -> usize {
        haystack
            .find(needle)
            .unwrap_or_else(|| panic!("missing {needle}"))
    }

    #[test]
    fn opf_spine_follows_reading_order() {
        let book = sample_book();
        let opf = document(&book, &[]).content_opf();

        // manifest id 按阅读顺序分配
        assert!(opf.contains(r#"<item id="chapter-0001" href="ch00.html""#));
        assert!(opf.contains(r#"<item id="chapter-0003" href="ch02.html""#));
        assert!(
            position(&opf, r#"href="ch00.html""#) < position(&opf, r#"href="ch01.html""#)
                && position(&opf, r#"href="ch01.html""#) < position(&opf, r#"href="ch02.html""#)
        );
        assert_eq!(opf.matches("<itemref ").count(), 3);
    }

    #[test]
    fn opf_metadata_is_escaped_and_dated() {
        let book = sample_book();
        let opf = document(&book, &[]).content_opf();
        assert!(opf.contains("<dc:title>Rust &amp; Friends</dc:title>"));
        assert!(opf.contains(">Ann, Bo</dc:creator>"));
        assert!(opf.contains("<dc:publisher>O&#39;Reilly Media, Inc.</dc:publisher>"));
        assert!(opf.contains("<dc:date>2024-03-05</dc:date>"));
        assert!(opf.contains(">2024-03-05T07:08:09Z</meta>"));
        assert!(opf.contains("Copyright © 2024"));
        assert!(opf.contains(r#"href="images/cover.jpg""#));
        assert!(!opf.contains("core.css"));
    }

    #[test]
    fn opf_lists_images_and_optional_core_css() {
        let book = sample_book();
        let images = vec![ImageRef {
            source_url: "https://cdn/figs/a.gif".to_string(),
            local_path: "images/a.gif".to_string(),
            media_type: "image/gif",
        }];
        let mut doc = document(&book, &images);
        doc.has_core_css = true;
        doc.has_cover = false;
        let opf = doc.content_opf();
        assert!(opf.contains(r#"href="images/a.gif" media-type="image/gif""#));
        assert!(opf.contains(r#"href="core.css""#));
        assert!(!opf.contains("cover"));
    }

    #[test]
    fn ncx_play_order_is_one_based_in_reading_order() {
        let book = sample_book();
        let ncx = document(&book, &[]).toc_ncx();
        assert!(ncx.contains(r#"<meta name="dtb:uid" content="9781492052593"/>"#));
        assert!(ncx.contains(r#"playOrder="1">
      <navLabel><text>Zero</text></navLabel>"#));
        assert!(ncx.contains(r#"playOrder="3">
      <navLabel><text>Two</text></navLabel>"#));
        assert!(ncx.contains("<docAuthor><text>Ann, Bo</text></docAuthor>"));
    }

    #[test]
    fn chapter_shell_links_core_css_only_when_requested() {
        let plain = chapter_xhtml("A <b>", "<p>x</p>", false);
        assert!(plain.contains("<title>A &lt;b&gt;</title>"));
        assert!(!plain.contains(CORE_CSS));
        let styled = chapter_xhtml("A", "<p>x</p>", true);
        assert_eq!(styled.matches(r#"href="core.css""#).count(), 1);
    }
}
