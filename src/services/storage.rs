//! Object storage for uploaded photos and documents.

use crate::db::types::UploadedFile;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub url: String,
    pub key: String,
    pub size: u64,
    pub content_type: String,
}

impl StoredObject {
    pub fn into_uploaded_file(self, original_name: impl Into<String>) -> UploadedFile {
        UploadedFile {
            url: self.url,
            storage_key: self.key,
            original_name: original_name.into(),
            size: self.size,
            content_type: self.content_type,
            uploaded_at: Local::now(),
        }
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        data: &[u8],
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<StoredObject, StorageError>;

    fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// `{prefix}/{yyyymmddHHMMSS}_{tag}_{name}` with the name reduced to safe characters.
pub fn object_key(prefix: &str, tag: &str, name: &str, now: DateTime<Local>) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}/{}_{}_{}",
        prefix.trim_matches('/'),
        now.format("%Y%m%d%H%M%S"),
        tag,
        sanitized
    )
}

/// Filesystem-backed storage.
///
/// Objects live under `root_dir/<key>` with a `<key>.meta.json` sidecar,
/// and are served by whatever sits behind `public_base_url`.
#[derive(Clone, Debug)]
pub struct LocalObjectStorage {
    root_dir: PathBuf,
    public_base_url: String,
    signing_secret: String,
}

impl LocalObjectStorage {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signing_secret: signing_secret.into(),
        }
    }

    /// Map a key to a path inside the root, rejecting anything that escapes it.
    fn resolve_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root_dir.join(relative))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    fn signature(&self, key: &str, expires: i64) -> String {
        format!(
            "{:x}",
            md5::compute(format!("{}:{}:{}", self.signing_secret, key, expires))
        )
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn upload(
        &self,
        data: &[u8],
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<StoredObject, StorageError> {
        let path = self.resolve_path(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        let mut sidecar = metadata.clone();
        sidecar.insert("content_type".to_string(), content_type.to_string());
        let sidecar = serde_json::to_vec_pretty(&sidecar).map_err(std::io::Error::other)?;
        let mut meta_path = path.into_os_string();
        meta_path.push(".meta.json");
        tokio::fs::write(PathBuf::from(meta_path), sidecar).await?;

        Ok(StoredObject {
            url: self.public_url(key),
            key: key.to_string(),
            size: data.len() as u64,
            content_type: content_type.to_string(),
        })
    }

    fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.resolve_path(key)?;
        let expires = Local::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!(
            "{}?expires={}&signature={}",
            self.public_url(key),
            expires,
            self.signature(key, expires)
        ))
    }
}
