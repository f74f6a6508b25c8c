//! HTML/XHTML 文本处理工具。
//!
//! 只做文本级（正则）处理：转义、图片路径改写、空元素自闭合。不做完整的 HTML 解析。

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::OnceLock;

// 编译一次复用的正则缓存
fn re_img_open() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<\s*img\b([^>]*?)\s*/?\s*>").expect("compile RE_IMG"))
}

fn re_br_hr() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<\s*(br|hr)\b[^>]*>").expect("compile RE_BR_HR"))
}

// ── HTML 转义 ───────────────────────────────────────────────────

pub(crate) fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

// ── 空元素自闭合 ───────────────────────────────────────────────

/// EPUB 要求 XHTML：`<img>` 补成 `<img … />`（保留属性），`<br>`/`<hr>` 统一为 `<br/>`/`<hr/>`（丢弃属性）。
///
/// 重复调用结果不变。
pub(crate) fn purify_html(content: &str) -> String {
    let with_img = re_img_open().replace_all(content, |caps: &Captures| {
        let attrs = caps.get(1).map_or("", |m| m.as_str());
        if attrs.trim().is_empty() {
            "<img />".to_string()
        } else {
            format!("<img{attrs} />")
        }
    });
    re_br_hr()
        .replace_all(&with_img, |caps: &Captures| {
            format!("<{}/>", caps[1].to_ascii_lowercase())
        })
        .into_owned()
}

// ── 图片引用改写 ───────────────────────────────────────────────

fn is_ref_boundary(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '"' | '\'' | '(' | ')' | '<' | '>' | '=' | ',' | '?' | '#')
}

/// 引用之后的文本是否构成边界；句末的 `.` 后面跟空白、`<` 或结尾时也算。
fn ends_at_boundary(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        None => true,
        Some('.') => chars.next().is_none_or(|c| c.is_whitespace() || c == '<'),
        Some(ch) => is_ref_boundary(ch),
    }
}

/// 把正文中对 `reference` 的引用替换为 `local`。
///
/// 允许引用前带任意以 `/` 结尾的前缀（绝对 URL 或上级目录），但两端必须落在属性/URL 边界上，
/// 不会命中 `xfoo/bar.png` 或 `foo/bar.png.bak` 这类更长的路径。
pub(crate) fn rewrite_image_ref<'a>(content: &'a str, reference: &str, local: &str) -> Cow<'a, str> {
    let reference = reference.trim();
    if reference.is_empty() || !content.contains(reference) {
        return Cow::Borrowed(content);
    }

    let pattern = format!(r#"(?:[^"'\s()<>=,]*/)?{}"#, regex::escape(reference));
    let Ok(re) = Regex::new(&pattern) else {
        return Cow::Borrowed(content);
    };

    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for m in re.find_iter(content) {
        let before_ok = content[..m.start()]
            .chars()
            .next_back()
            .is_none_or(is_ref_boundary);
        let after_ok = ends_at_boundary(&content[m.end()..]);
        if before_ok && after_ok {
            out.push_str(&content[last..m.start()]);
            out.push_str(local);
            last = m.end();
        }
    }
    if last == 0 {
        return Cow::Borrowed(content);
    }
    out.push_str(&content[last..]);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn img_gets_self_closed_keeping_attributes() {
        let input =
            r#"<img src="httpatomoreillycomsourceoreillyimages926284.jpg" alt="First Edition">"#;
        assert_eq!(
            purify_html(input),
            r#"<img src="httpatomoreillycomsourceoreillyimages926284.jpg" alt="First Edition" />"#
        );
        assert_eq!(purify_html("<img>"), "<img />");
        assert_eq!(
            purify_html("<IMG\n  class=\"x\"   src='a.png'  >"),
            "<img\n  class=\"x\"   src='a.png' />"
        );
    }

    #[test]
    fn br_and_hr_are_canonicalised() {
        assert_eq!(purify_html("<hr>"), "<hr/>");
        assert_eq!(purify_html("a<br>b<BR />c< br class=\"x\">d"), "a<br/>b<br/>c<br/>d");
        assert_eq!(purify_html(r#"<hr style="x" id='y'/>"#), "<hr/>");
        // 不误伤同前缀的其他标签
        assert_eq!(purify_html("<header><brand>"), "<header><brand>");
    }

    #[test]
    fn purify_is_idempotent() {
        let samples = [
            r#"<p>x<img src="a.png" alt="A"><br>y<hr class="c"></p>"#,
            "<img/><img /><img src='b.png'/><br/><hr/>",
            "<IMG SRC=\"c.png\" >< br >< HR size=2 >",
            "<div><img\talt=\"t\"\tsrc=\"d.png\"\t></div>",
        ];
        for sample in samples {
            let once = purify_html(sample);
            assert_eq!(purify_html(&once), once, "input: {sample}");
        }
    }

    #[test]
    fn rewrites_relative_and_absolute_references() {
        let content = r#"<img src="foo/bar.png"/><img src="https://cdn.x/files/foo/bar.png"/>"#;
        let out = rewrite_image_ref(content, "foo/bar.png", "images/bar.png");
        assert_eq!(
            out,
            r#"<img src="images/bar.png"/><img src="images/bar.png"/>"#
        );
        assert!(!out.contains("foo/bar.png"));
    }

    #[test]
    fn does_not_touch_longer_paths_sharing_a_suffix() {
        let content = r#"<img src="xfoo/bar.png"/><img src="foo/bar.png.bak"/><img src="foo/bar.png"/>"#;
        let out = rewrite_image_ref(content, "foo/bar.png", "images/bar.png");
        assert_eq!(
            out,
            r#"<img src="xfoo/bar.png"/><img src="foo/bar.png.bak"/><img src="images/bar.png"/>"#
        );
    }

    #[test]
    fn sentence_final_period_still_rewrites() {
        let content = "<p>see foo/bar.png.</p><p>foo/bar.png. next</p><p>end foo/bar.png.";
        let out = rewrite_image_ref(content, "foo/bar.png", "images/bar.png");
        assert_eq!(
            out,
            "<p>see images/bar.png.</p><p>images/bar.png. next</p><p>end images/bar.png."
        );
        assert!(!out.contains("foo/bar.png"));

        let longer = "<p>foo/bar.png.bak.</p>";
        assert_eq!(rewrite_image_ref(longer, "foo/bar.png", "images/bar.png"), longer);
    }

    #[test]
    fn reference_without_match_borrows_input() {
        let content = "<p>no images</p>";
        assert!(matches!(
            rewrite_image_ref(content, "a.png", "images/a.png"),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(escape_html(r#"<a & "b">"#), "&lt;a &amp; &quot;b&quot;&gt;");
    }
}
