use std::path::{Component, Path, PathBuf};

use crate::base_system::context::{Config, safe_fs_name};

pub const DEFAULT_OUTPUT_NAME: &str = "ebook.epub";

/// 暂存目录名：按书籍标识（identifier）区分，同一本书重复下载会覆盖同一目录。
pub fn staging_folder_name(identifier: &str) -> String {
    safe_fs_name(identifier, "_", 120)
}

pub fn staging_path(config: &Config, identifier: &str) -> PathBuf {
    config.staging_root().join(staging_folder_name(identifier))
}

/// 包内成员路径只能由普通路径段组成：非空、不以根或盘符开头、不含 `.`/`..`。
///
/// 含 `\` 的名字也视为非法。
pub fn is_package_relative(name: &str) -> bool {
    !name.trim().is_empty()
        && !name.contains('\\')
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// 命令行 > 配置文件 > 内置默认名。
pub fn resolve_output_path(config: &Config, cli_output: Option<&Path>) -> PathBuf {
    match cli_output {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ if !config.output_path.trim().is_empty() => PathBuf::from(config.output_path.trim()),
        _ => PathBuf::from(DEFAULT_OUTPUT_NAME),
    }
}
