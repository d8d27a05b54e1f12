//! Local filesystem artifact store.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use mlstack_core::artifact::{ArtifactKey, ArtifactRef, ArtifactStore, checksum};
use mlstack_core::{Error, ResourceId, Result};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const URI_SCHEME: &str = "file://";

/// Stores artifacts as files under `{root}/{run_id}/{step}/{name}`.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ArtifactKey) -> Result<PathBuf> {
        for part in [&key.step, &key.name] {
            if !is_plain_segment(part) {
                return Err(Error::Validation(format!(
                    "artifact path segment `{part}` is not a plain name"
                )));
            }
        }
        Ok(self
            .root
            .join(key.run_id.to_string())
            .join(&key.step)
            .join(&key.name))
    }

    /// Resolve a `file://` URI, refusing locations outside the root.
    fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let path = uri
            .strip_prefix(URI_SCHEME)
            .map(PathBuf::from)
            .ok_or_else(|| Error::Validation(format!("unsupported artifact URI `{uri}`")))?;
        let inside = path.starts_with(&self.root)
            && path
                .components()
                .all(|c| !matches!(c, Component::ParentDir));
        if !inside {
            return Err(Error::Validation(format!(
                "artifact URI `{uri}` is outside the store root"
            )));
        }
        Ok(path)
    }
}

fn is_plain_segment(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && !part.contains('/')
        && !part.contains('\\')
}

fn not_found(uri: &str) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("artifact `{uri}`"))
        } else {
            Error::from(e)
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    fn flavor(&self) -> &'static str {
        "local"
    }

    async fn put(&self, key: &ArtifactKey, data: Bytes) -> Result<ArtifactRef> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;

        let uri = format!("{URI_SCHEME}{}", path.display());
        debug!(%uri, size = data.len(), "stored artifact");
        Ok(ArtifactRef {
            key: key.clone(),
            uri,
            checksum: checksum(&data),
            size: data.len() as u64,
            created_at: Utc::now(),
        })
    }

    async fn get(&self, uri: &str) -> Result<Bytes> {
        let path = self.resolve(uri)?;
        let data = tokio::fs::read(&path).await.map_err(not_found(uri))?;
        Ok(Bytes::from(data))
    }

    async fn list(&self, run_id: &ResourceId) -> Result<Vec<ArtifactRef>> {
        let run_dir = self.root.join(run_id.to_string());
        let mut refs = Vec::new();
        let mut steps = match tokio::fs::read_dir(&run_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(refs),
            Err(e) => return Err(e.into()),
        };

        while let Some(step) = steps.next_entry().await? {
            if !step.file_type().await?.is_dir() {
                continue;
            }
            let step_name = step.file_name().to_string_lossy().into_owned();
            let mut files = tokio::fs::read_dir(step.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                let data = tokio::fs::read(&path).await?;
                let modified = file.metadata().await?.modified()?;
                refs.push(ArtifactRef {
                    key: ArtifactKey {
                        run_id: *run_id,
                        step: step_name.clone(),
                        name: file.file_name().to_string_lossy().into_owned(),
                    },
                    uri: format!("{URI_SCHEME}{}", path.display()),
                    checksum: checksum(&data),
                    size: data.len() as u64,
                    created_at: modified.into(),
                });
            }
        }

        refs.sort_by(|a, b| (&a.key.step, &a.key.name).cmp(&(&b.key.step, &b.key.name)));
        Ok(refs)
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let path = self.resolve(uri)?;
        tokio::fs::remove_file(&path).await.map_err(not_found(uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(run_id: ResourceId, step: &str, name: &str) -> ArtifactKey {
        ArtifactKey {
            run_id,
            step: step.into(),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let run = ResourceId::new();

        let trainer = store
            .put(&key(run, "trainer", "output"), Bytes::from_static(b"model"))
            .await
            .unwrap();
        store
            .put(&key(run, "evaluator", "output"), Bytes::from_static(b"0.91"))
            .await
            .unwrap();
        assert_eq!(trainer.size, 5);
        assert_eq!(trainer.checksum, checksum(b"model"));

        assert_eq!(store.get(&trainer.uri).await.unwrap(), Bytes::from_static(b"model"));

        let listed = store.list(&run).await.unwrap();
        let steps: Vec<_> = listed.iter().map(|r| r.key.step.as_str()).collect();
        assert_eq!(steps, vec!["evaluator", "trainer"]);

        store.delete(&trainer.uri).await.unwrap();
        assert!(matches!(store.get(&trainer.uri).await, Err(Error::NotFound(_))));
        assert!(store.list(&ResourceId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        let err = store
            .put(&key(ResourceId::new(), "..", "x"), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert!(store.get("file:///etc/passwd").await.is_err());
        assert!(store.get("s3://bucket/key").await.is_err());
    }
}
