//! 客户端持久化存储
//! 键值存储，条目可带过期时间；过期条目读取时视为不存在

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::StorageConfig;
use crate::error::{AppError, Result};

/// 存储条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEntry {
    pub value: String,
    /// 过期时间（None 表示永不过期）
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// 键值存储接口
pub trait KeyValueStore: Send + Sync {
    /// 读取键值，过期或不存在返回 None
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// 写入键值
    fn set(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<()>;

    /// 删除键值（键不存在不视为错误）
    fn remove(&self, key: &str) -> Result<()>;
}

/// 根据配置创建存储后端
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.backend.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "file" => Ok(Arc::new(FileStore::open(&config.path)?)),
        other => Err(AppError::Config(format!("Unknown storage backend: {}", other))),
    }
}

/// 内存存储（进程内有效）
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(Utc::now()) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// 文件存储：整个键值表以 JSON 保存在单个文件中
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl FileStore {
    /// 打开文件存储；文件不存在视为空存储，文件损坏记录告警后视为空存储
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<HashMap<String, StoredEntry>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Corrupt store file, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "File store opened");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 先写临时文件再重命名覆盖
    fn persist(&self, entries: &HashMap<String, StoredEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        let content = serde_json::to_vec_pretty(entries)?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock();

        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(Utc::now()) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
            self.persist(&entries)?;
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let mut entries = self.lock();
        entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}
