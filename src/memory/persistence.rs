//! 会话存储持久化
//!
//! 单文件 JSON：`interactions`（身份 -> 交互列表）与 `context`（身份 -> 键值）。
//! 每次写入都是整份文档重写：先写同目录临时文件再 rename，避免半截文件。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::memory::{Interaction, SessionContext};

/// 持久化文档
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub interactions: BTreeMap<String, Vec<Interaction>>,
    #[serde(default)]
    pub context: BTreeMap<String, SessionContext>,
}

/// 文件持久化：load 容错，save 整份重写
#[derive(Debug, Clone)]
pub struct StorePersistence {
    path: PathBuf,
}

impl StorePersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取文档；文件不存在、为空或损坏时返回空文档（损坏时记 warn）
    pub async fn load(&self) -> StoreDocument {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StoreDocument::default(),
            Err(e) => {
                tracing::warn!("Memory file {:?} unreadable ({}), reinitializing", self.path, e);
                return StoreDocument::default();
            }
        };
        if data.trim().is_empty() {
            tracing::warn!("Memory file {:?} is empty, reinitializing", self.path);
            return StoreDocument::default();
        }
        match serde_json::from_str(&data) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("Memory file {:?} is corrupted ({}), reinitializing", self.path, e);
                StoreDocument::default()
            }
        }
    }

    /// 写入整份文档；父目录不存在时自动创建
    pub async fn save(&self, doc: &StoreDocument) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let p = StorePersistence::new(dir.path().join("none.json"));
        assert_eq!(p.load().await, StoreDocument::default());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "{ not json").unwrap();
        let p = StorePersistence::new(&path);
        assert_eq!(p.load().await, StoreDocument::default());

        std::fs::write(&path, "   \n").unwrap();
        assert_eq!(p.load().await, StoreDocument::default());
    }

    #[tokio::test]
    async fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/memory.json");
        let p = StorePersistence::new(&path);
        let mut doc = StoreDocument::default();
        doc.interactions
            .insert("U1".into(), vec![Interaction::human("selam")]);
        p.save(&doc).await.unwrap();
        assert_eq!(p.load().await, doc);
    }
}
