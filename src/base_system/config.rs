//! 带注释的 YAML 配置文件。
//!
//! 用户文件只需写出想覆盖的字段：读取时叠加到默认值之上；缺少字段时按字段表顺序
//! 回写一份完整的带注释版本，已有的值保持不变。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config file {path} is not valid yaml: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config value rejected: {0}")]
    Validation(String),
}

impl ConfigError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> ConfigError + '_ {
        move |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn invalid(err: serde_yaml::Error) -> ConfigError {
        ConfigError::Validation(err.to_string())
    }
}

/// 配置字段及其写进文件的注释。
#[derive(Debug, Clone, Copy)]
pub struct FieldMeta {
    pub name: &'static str,
    pub description: &'static str,
}

pub trait ConfigSpec: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;
    /// 决定文件中字段的顺序与注释。
    fn fields() -> &'static [FieldMeta];
}

/// 读取配置；文件不存在时写出默认配置。
///
/// 路径：`config_path` 优先，否则 `base_dir/FILE_NAME`，再否则当前目录下的 `FILE_NAME`。
pub fn load_or_create<T: ConfigSpec>(
    config_path: Option<&Path>,
    base_dir: Option<&Path>,
) -> Result<T, ConfigError> {
    let path = match (config_path, base_dir) {
        (Some(p), _) => p.to_path_buf(),
        (None, Some(base)) => base.join(T::FILE_NAME),
        (None, None) => PathBuf::from(T::FILE_NAME),
    };

    let Some(user) = read_user_yaml(&path)? else {
        info!(target: "startup", path = %path.display(), "配置文件不存在，已生成默认配置");
        let config = T::default();
        save_with_comments(&config, &path)?;
        return Ok(config);
    };

    let missing = missing_fields::<T>(&user);
    let mut merged = serde_yaml::to_value(T::default()).map_err(ConfigError::invalid)?;
    overlay(&mut merged, user);
    let config: T = serde_yaml::from_value(merged).map_err(ConfigError::invalid)?;

    if !missing.is_empty() {
        info!(target: "startup", path = %path.display(), ?missing, "配置文件缺少字段，已补全");
        save_with_comments(&config, &path)?;
    }
    Ok(config)
}

/// `Ok(None)` 表示文件不存在；空文件视为空映射。
fn read_user_yaml(path: &Path) -> Result<Option<Value>, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ConfigError::io(path)(err)),
    };
    if raw.trim().is_empty() {
        return Ok(Some(Value::Mapping(Mapping::new())));
    }
    serde_yaml::from_str(&raw)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

pub fn save_with_comments<T: ConfigSpec>(config: &T, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(ConfigError::io(parent))?;
    }
    let text = render_with_comments(config)?;
    fs::write(path, text).map_err(ConfigError::io(path))
}

/// 每个字段一行 `key: value`，上方是 `# 注释`。
pub fn render_with_comments<T: ConfigSpec>(config: &T) -> Result<String, ConfigError> {
    let Value::Mapping(values) = serde_yaml::to_value(config).map_err(ConfigError::invalid)? else {
        return Err(ConfigError::Validation(
            "config must serialize to a mapping".to_string(),
        ));
    };

    let mut out = String::new();
    for field in T::fields() {
        for line in field.description.lines().filter(|l| !l.trim().is_empty()) {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
        let key = Value::String(field.name.to_string());
        let value = values.get(&key).cloned().unwrap_or(Value::Null);
        let entry = serde_yaml::to_string(&Mapping::from_iter([(key, value)]))
            .map_err(ConfigError::invalid)?;
        out.push_str(entry.trim_end());
        out.push('\n');
    }
    Ok(out)
}

fn missing_fields<T: ConfigSpec>(user: &Value) -> Vec<&'static str> {
    let present = |name: &str| match user {
        Value::Mapping(map) => map.contains_key(name),
        _ => false,
    };
    T::fields()
        .iter()
        .map(|f| f.name)
        .filter(|name| !present(name))
        .collect()
}

/// 用户值覆盖默认值；映射逐键递归，`null` 保留默认值。
fn overlay(base: &mut Value, user: Value) {
    match (base, user) {
        (_, Value::Null) => {}
        (Value::Mapping(base), Value::Mapping(user)) => {
            for (key, value) in user {
                match base.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
