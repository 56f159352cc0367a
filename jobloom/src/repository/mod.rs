//! Repository sources: where workflows and template files come from.
//!
//! The engine consumes repositories through the [`RepositorySource`] trait:
//! `list` browses available items, `get` fetches and decodes a workflow,
//! and `resolve` turns a file reference into a URL the template executor
//! can fetch. An HTTP-backed implementation lives with the caller; the
//! crate ships the directory-backed [`LocalRepository`].

pub mod local;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::document::Workflow;

pub use local::LocalRepository;

/// Errors surfaced by repository implementations.
#[derive(Debug, Error, Diagnostic)]
pub enum RepositoryError {
    #[error("repository path not found: {0}")]
    #[diagnostic(code(jobloom::repository::path_not_found))]
    PathNotFound(String),

    #[error("repository request failed with status {0}")]
    #[diagnostic(code(jobloom::repository::http))]
    HttpError(u16),

    #[error("repository unreachable: {0}")]
    #[diagnostic(code(jobloom::repository::network))]
    NetworkError(String),

    #[error("repository content failed to decode: {0}")]
    #[diagnostic(code(jobloom::repository::parse))]
    ParseError(String),

    #[error("could not resolve to a fetchable url: {0}")]
    #[diagnostic(code(jobloom::repository::invalid_url))]
    InvalidUrl(String),
}

/// Whether a repository item is a workflow file or a folder of them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// One entry of a repository listing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Repository sub-path usable with `get` and `resolve`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub kind: ItemKind,
}

/// A source of workflows and template files.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// List the items under a sub-path (the repository root when `None`).
    async fn list(&self, path: Option<&str>) -> Result<Vec<RepositoryItem>, RepositoryError>;

    /// Fetch and decode the workflow at a sub-path.
    async fn get(&self, path: &str) -> Result<Workflow, RepositoryError>;

    /// Resolve a file reference under a sub-path into a fetchable URL.
    fn resolve(&self, path: Option<&str>, file: &str) -> Result<Url, RepositoryError>;
}
