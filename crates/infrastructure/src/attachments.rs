//! 本地文件系统的附件存储
//!
//! 存储键是相对于上传根目录的路径。文件不存在视为已删除成功，
//! 让删除流程可以安全重试。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use domain::{RepositoryError, RepositoryResult};

use application::AttachmentStore;

pub struct FsAttachmentStore {
    root: PathBuf,
}

impl FsAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 拒绝越出根目录的存储键。
    fn resolve(&self, storage_key: &str) -> RepositoryResult<PathBuf> {
        let relative = Path::new(storage_key);
        let sane = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !sane || relative.as_os_str().is_empty() {
            return Err(RepositoryError::storage(format!(
                "非法的存储键: {storage_key}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AttachmentStore for FsAttachmentStore {
    async fn remove(&self, storage_key: &str) -> RepositoryResult<()> {
        let path = self.resolve(storage_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RepositoryError::storage(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_store() -> (FsAttachmentStore, PathBuf) {
        let root = std::env::temp_dir().join(format!("attachments-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        (FsAttachmentStore::new(&root), root)
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let (store, root) = temp_store();
        let path = root.join("a.png");
        std::fs::write(&path, b"blob").unwrap();

        store.remove("a.png").await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_ok() {
        let (store, _root) = temp_store();
        store.remove("missing.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_rejects_parent_traversal() {
        let (store, _root) = temp_store();
        assert!(store.remove("../escape.png").await.is_err());
    }
}
