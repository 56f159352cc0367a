//! Directory-backed repository source.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use url::Url;

use crate::document::Workflow;

use super::{ItemKind, RepositoryError, RepositoryItem, RepositorySource};

/// A repository rooted at a local directory.
///
/// Workflow files are YAML documents; `resolve` produces `file://` URLs.
#[derive(Clone, Debug)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn join(&self, path: Option<&str>) -> PathBuf {
        match path {
            Some(sub) => self.root.join(sub),
            None => self.root.clone(),
        }
    }
}

#[async_trait]
impl RepositorySource for LocalRepository {
    async fn list(&self, path: Option<&str>) -> Result<Vec<RepositoryItem>, RepositoryError> {
        let dir = self.join(path);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|_| RepositoryError::PathNotFound(dir.display().to_string()))?;

        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|_| RepositoryError::PathNotFound(dir.display().to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            let item_path = match path {
                Some(sub) => format!("{sub}/{name}"),
                None => name.clone(),
            };
            items.push(RepositoryItem {
                name,
                description: None,
                path: item_path,
                category: path.map(str::to_string),
                kind: if is_dir { ItemKind::Folder } else { ItemKind::File },
            });
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn get(&self, path: &str) -> Result<Workflow, RepositoryError> {
        let file = self.root.join(path);
        let raw = tokio::fs::read_to_string(&file)
            .await
            .map_err(|_| RepositoryError::PathNotFound(file.display().to_string()))?;
        Workflow::from_yaml(&raw).map_err(|e| RepositoryError::ParseError(e.to_string()))
    }

    fn resolve(&self, path: Option<&str>, file: &str) -> Result<Url, RepositoryError> {
        let joined = self.join(path).join(file);
        let absolute = absolutize(&joined)
            .map_err(|_| RepositoryError::InvalidUrl(joined.display().to_string()))?;
        Url::from_file_path(&absolute)
            .map_err(|()| RepositoryError::InvalidUrl(absolute.display().to_string()))
    }
}

fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
