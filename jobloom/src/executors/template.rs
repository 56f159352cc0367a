//! Template render executor.
//!
//! For each (source, output) pair in order: resolve the source to a URL
//! through the repository source, fetch it, render it against the form-data
//! map, and write the output atomically (temp file + rename), creating any
//! missing parent directories. One `templateProgress` event is emitted per
//! written file with the completion fraction over the file list.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use minijinja::Environment;
use tracing::debug;
use url::Url;

use crate::document::{FormMap, Script, TemplateFile};
use crate::events::ResultEvent;
use crate::repository::RepositoryError;

use super::{ExecutorContext, ExecutorError, ScriptExecutor};

#[derive(Clone, Debug, Default)]
pub struct TemplateExecutor {
    client: reqwest::Client,
}

impl TemplateExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScriptExecutor for TemplateExecutor {
    async fn execute(&self, script: &Script, ctx: ExecutorContext) -> Result<(), ExecutorError> {
        let (id, files) = match script {
            Script::Template { id, files } => (id.clone(), files.clone()),
            Script::Bash { .. } => return Err(ExecutorError::UnsupportedScriptType("bash")),
            Script::Javascript { .. } => {
                return Err(ExecutorError::UnsupportedScriptType("javascript"))
            }
        };

        let total = files.len();
        for (index, entry) in files.iter().enumerate() {
            if ctx.cancelled() {
                return Err(ExecutorError::ProcessFailed(
                    "template render terminated by cancellation".into(),
                ));
            }
            let source = self.fetch(&ctx, &entry.file).await?;
            let rendered = render(&entry.file, &source, &ctx.form_data)?;
            let output = resolve_output(&ctx.working_dir, entry);
            write_atomic(&output, &rendered).await?;
            debug!(script = %id, output = %output.display(), "rendered template");

            let completed = (index + 1) as f32 / total as f32;
            let _ = ctx
                .emitter
                .emit(ResultEvent::template(&id, output.display().to_string(), completed));
        }
        Ok(())
    }
}

impl TemplateExecutor {
    async fn fetch(&self, ctx: &ExecutorContext, file: &str) -> Result<String, ExecutorError> {
        let url = match &ctx.repository {
            Some(repository) => repository.resolve(ctx.repository_path.as_deref(), file)?,
            None => {
                let path = absolute_in(&ctx.working_dir, Path::new(file));
                Url::from_file_path(&path)
                    .map_err(|()| ExecutorError::TemplateInvalidUrl(path.display().to_string()))?
            }
        };

        match url.scheme() {
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|()| ExecutorError::TemplateInvalidUrl(url.to_string()))?;
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|_| ExecutorError::TemplateFileNotFound(path.display().to_string()))
            }
            "http" | "https" => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| RepositoryError::NetworkError(e.to_string()))?;
                let status = response.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(ExecutorError::TemplateFileNotFound(url.to_string()));
                }
                if !status.is_success() {
                    return Err(RepositoryError::HttpError(status.as_u16()).into());
                }
                response
                    .text()
                    .await
                    .map_err(|e| RepositoryError::NetworkError(e.to_string()).into())
            }
            other => Err(ExecutorError::TemplateInvalidUrl(format!(
                "unsupported scheme `{other}` in {url}"
            ))),
        }
    }
}

fn render(file: &str, source: &str, form_data: &FormMap) -> Result<String, ExecutorError> {
    let env = Environment::new();
    env.render_str(source, minijinja::Value::from_serialize(form_data))
        .map_err(|e| ExecutorError::TemplateInvalid {
            file: file.to_string(),
            reason: e.to_string(),
        })
}

fn resolve_output(working_dir: &Path, entry: &TemplateFile) -> PathBuf {
    absolute_in(working_dir, Path::new(&entry.output))
}

fn absolute_in(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

async fn write_atomic(output: &Path, contents: &str) -> Result<(), ExecutorError> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ExecutorError::ExecutionFailed(format!("creating {}: {e}", parent.display())))?;
    }
    let temp = output.with_extension("jobloom.tmp");
    tokio::fs::write(&temp, contents)
        .await
        .map_err(|e| ExecutorError::ExecutionFailed(format!("writing {}: {e}", temp.display())))?;
    tokio::fs::rename(&temp, output)
        .await
        .map_err(|e| ExecutorError::ExecutionFailed(format!("renaming into {}: {e}", output.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventEmitter, Signal};
    use crate::repository::LocalRepository;
    use rustc_hash::FxHashMap;
    use std::sync::Arc;
    use tokio::sync::watch;

    struct Fixture {
        _repo_dir: tempfile::TempDir,
        work_dir: tempfile::TempDir,
        ctx: ExecutorContext,
        rx: flume::Receiver<Signal>,
        _cancel: watch::Sender<bool>,
    }

    async fn fixture(form_data: FormMap) -> Fixture {
        let repo_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            repo_dir.path().join("greeting.j2"),
            "Hello {{ name }} from {{ city }}!",
        )
        .await
        .unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let (tx, rx) = flume::unbounded();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = ExecutorContext {
            working_dir: work_dir.path().to_path_buf(),
            environment: FxHashMap::default(),
            form_data,
            repository: Some(Arc::new(LocalRepository::new(repo_dir.path()))),
            repository_path: None,
            emitter: EventEmitter::new(0, tx),
            cancel: cancel_rx,
        };
        Fixture {
            _repo_dir: repo_dir,
            work_dir,
            ctx,
            rx,
            _cancel: cancel_tx,
        }
    }

    fn form(pairs: &[(&str, &str)]) -> FormMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn renders_into_the_working_directory() {
        let fx = fixture(form(&[("name", "Ada"), ("city", "London")])).await;
        let script = Script::Template {
            id: "render".into(),
            files: vec![TemplateFile {
                file: "greeting.j2".into(),
                output: "out/greeting.txt".into(),
            }],
        };
        TemplateExecutor::new().execute(&script, fx.ctx).await.unwrap();

        let written = tokio::fs::read_to_string(fx.work_dir.path().join("out/greeting.txt"))
            .await
            .unwrap();
        assert_eq!(written, "Hello Ada from London!");

        let events: Vec<ResultEvent> = fx
            .rx
            .drain()
            .filter_map(|s| match s {
                Signal::Emitted { event, .. } => Some(event),
                _ => None,
            })
            .collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ResultEvent::Template(progress) => {
                assert_eq!(progress.script_id, "render");
                assert!(progress.path.ends_with("out/greeting.txt"));
                assert_eq!(progress.completed, 1.0);
            }
            other => panic!("expected template progress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn progress_fraction_advances_per_file() {
        let fx = fixture(form(&[("name", "Ada"), ("city", "Paris")])).await;
        let script = Script::Template {
            id: "render".into(),
            files: vec![
                TemplateFile {
                    file: "greeting.j2".into(),
                    output: "a.txt".into(),
                },
                TemplateFile {
                    file: "greeting.j2".into(),
                    output: "b.txt".into(),
                },
            ],
        };
        TemplateExecutor::new().execute(&script, fx.ctx).await.unwrap();

        let fractions: Vec<f32> = fx
            .rx
            .drain()
            .filter_map(|s| match s {
                Signal::Emitted {
                    event: ResultEvent::Template(p),
                    ..
                } => Some(p.completed),
                _ => None,
            })
            .collect();
        assert_eq!(fractions, vec![0.5, 1.0]);
    }

    #[tokio::test]
    async fn missing_source_fails_the_sequence() {
        let fx = fixture(FxHashMap::default()).await;
        let script = Script::Template {
            id: "render".into(),
            files: vec![TemplateFile {
                file: "ghost.j2".into(),
                output: "out.txt".into(),
            }],
        };
        assert!(matches!(
            TemplateExecutor::new().execute(&script, fx.ctx).await,
            Err(ExecutorError::TemplateFileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_template_reports_the_file() {
        let fx = fixture(FxHashMap::default()).await;
        tokio::fs::write(fx._repo_dir.path().join("broken.j2"), "{{ unclosed")
            .await
            .unwrap();
        let script = Script::Template {
            id: "render".into(),
            files: vec![TemplateFile {
                file: "broken.j2".into(),
                output: "out.txt".into(),
            }],
        };
        match TemplateExecutor::new().execute(&script, fx.ctx).await {
            Err(ExecutorError::TemplateInvalid { file, .. }) => assert_eq!(file, "broken.j2"),
            other => panic!("expected TemplateInvalid, got {other:?}"),
        }
    }
}
