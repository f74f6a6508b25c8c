//! 把暂存目录打包成 .epub。
//!
//! 成员顺序固定：`mimetype`（Stored，且必须是第一项）→ `META-INF/` → `OEBPS/`，其余成员 Deflated。
//! 先写入目标目录下的临时文件，成功后再重命名到目标路径。

use std::fs;
use std::io::{Seek, Write};
use std::path::Path;

use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::epub_generator::{META_INF_DIR, MIMETYPE_FILE, OEBPS_DIR};
use crate::error::{DownloadError, Result};

pub fn archive(staging: &Path, output: &Path) -> Result<()> {
    info!(target: "archive", from = %staging.display(), to = %output.display(), "打包 EPUB");

    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(DownloadError::fs(parent))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".epub-")
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(DownloadError::fs(parent))?;
    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        write_members(&mut zip, staging)?;
        zip.finish()?;
    }

    tmp.persist(output)
        .map_err(|e| DownloadError::FilesystemFailure {
            path: output.to_path_buf(),
            source: e.error,
        })?;
    info!(target: "archive", path = %output.display(), "EPUB 已保存");
    Ok(())
}

fn write_members<W: Write + Seek>(zip: &mut ZipWriter<W>, staging: &Path) -> Result<()> {
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mimetype = staging.join(MIMETYPE_FILE);
    let bytes = fs::read(&mimetype).map_err(DownloadError::fs(&mimetype))?;
    zip.start_file(MIMETYPE_FILE, stored)?;
    zip.write_all(&bytes).map_err(DownloadError::fs(&mimetype))?;

    for dir in [META_INF_DIR, OEBPS_DIR] {
        add_dir(zip, staging, &staging.join(dir), deflated)?;
    }
    Ok(())
}

/// 递归写入目录；同级条目按名称排序，输出可复现。
fn add_dir<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    root: &Path,
    dir: &Path,
    options: FileOptions,
) -> Result<()> {
    zip.add_directory(format!("{}/", member_name(root, dir)), options)?;

    let mut entries = fs::read_dir(dir)
        .map_err(DownloadError::fs(dir))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(DownloadError::fs(dir))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type().map_err(DownloadError::fs(&path))?;
        if file_type.is_dir() {
            add_dir(zip, root, &path, options)?;
        } else if file_type.is_file() {
            let name = member_name(root, &path);
            debug!(target: "archive", member = %name, "写入成员");
            let bytes = fs::read(&path).map_err(DownloadError::fs(&path))?;
            zip.start_file(name, options)?;
            zip.write_all(&bytes).map_err(DownloadError::fs(&path))?;
        }
    }
    Ok(())
}

/// 相对暂存根目录、以 `/` 分隔的成员名。
fn member_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn staging_tree(root: &Path) {
        fs::create_dir_all(root.join("META-INF")).unwrap();
        fs::create_dir_all(root.join("OEBPS/images")).unwrap();
        fs::write(root.join("mimetype"), "application/epub+zip").unwrap();
        fs::write(root.join("META-INF/container.xml"), "<container/>").unwrap();
        fs::write(root.join("OEBPS/content.opf"), "<package/>").unwrap();
        fs::write(root.join("OEBPS/b.html"), "<p>b</p>").unwrap();
        fs::write(root.join("OEBPS/a.html"), "<p>a</p>").unwrap();
        fs::write(root.join("OEBPS/images/x.png"), [0u8, 1, 2]).unwrap();
    }

    #[test]
    fn mimetype_is_first_and_stored() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("stage");
        staging_tree(&staging);
        let output = dir.path().join("out/book.epub");

        archive(&staging, &output).unwrap();

        let mut zip = zip::ZipArchive::new(fs::File::open(&output).unwrap()).unwrap();
        let mut first = zip.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        let mut content = Vec::new();
        first.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"application/epub+zip");
    }

    #[test]
    fn members_are_ordered_and_relative() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("stage");
        staging_tree(&staging);
        let output = dir.path().join("book.epub");

        archive(&staging, &output).unwrap();

        let mut zip = zip::ZipArchive::new(fs::File::open(&output).unwrap()).unwrap();
        let names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "mimetype",
                "META-INF/",
                "META-INF/container.xml",
                "OEBPS/",
                "OEBPS/a.html",
                "OEBPS/b.html",
                "OEBPS/content.opf",
                "OEBPS/images/",
                "OEBPS/images/x.png",
            ]
        );
        let html = zip.by_name("OEBPS/a.html").unwrap();
        assert_eq!(html.compression(), CompressionMethod::Deflated);
        drop(html);
        assert!(zip.by_name("OEBPS/images/").unwrap().is_dir());
    }

    #[test]
    fn missing_staging_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("book.epub");
        let err = archive(&dir.path().join("nope"), &output).unwrap_err();
        assert!(matches!(err, DownloadError::FilesystemFailure { .. }));
        assert!(!output.exists());
        // 临时文件随错误一起清理
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
