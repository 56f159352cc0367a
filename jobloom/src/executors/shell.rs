//! Shell command executor.
//!
//! Runs the command through a login shell with the job environment overlaid
//! on the inherited one. Combined stdout/stderr is read line-buffered; each
//! read becomes one `shellOutput` event. A non-zero exit fails the script
//! with the exit code and the tail of the captured output.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::document::Script;
use crate::events::{EventEmitter, ResultEvent};

use super::{ExecutorContext, ExecutorError, ScriptExecutor};

/// Number of trailing output lines included in a failure message.
const TAIL_LINES: usize = 10;

#[derive(Clone, Copy, Debug, Default)]
pub struct ShellExecutor;

#[async_trait]
impl ScriptExecutor for ShellExecutor {
    async fn execute(&self, script: &Script, ctx: ExecutorContext) -> Result<(), ExecutorError> {
        let (id, command) = match script {
            Script::Bash { id, command } => (id.clone(), command.clone()),
            Script::Template { .. } => return Err(ExecutorError::UnsupportedScriptType("template")),
            Script::Javascript { .. } => {
                return Err(ExecutorError::UnsupportedScriptType("javascript"))
            }
        };
        debug!(script = %id, %command, "spawning shell command");

        let mut child = Command::new("sh")
            .arg("-lc")
            .arg(&command)
            .current_dir(&ctx.working_dir)
            .envs(&ctx.environment)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::ProcessFailed(format!("failed to spawn shell: {e}")))?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let out_lines = tokio::spawn(stream_lines(stdout, id.clone(), ctx.emitter.clone()));
        let err_lines = tokio::spawn(stream_lines(stderr, id.clone(), ctx.emitter.clone()));

        let mut cancel = ctx.cancel.clone();
        let status = tokio::select! {
            _ = async { let _ = cancel.wait_for(|cancelled| *cancelled).await; } => {
                let _ = child.kill().await;
                return Err(ExecutorError::ProcessFailed(format!(
                    "command `{command}` terminated by cancellation"
                )));
            }
            status = child.wait() => status.map_err(|e| {
                ExecutorError::ProcessFailed(format!("failed to await shell: {e}"))
            })?,
        };

        let mut captured = out_lines.await.unwrap_or_default();
        captured.extend(err_lines.await.unwrap_or_default());

        if status.success() {
            Ok(())
        } else {
            let code = status.code().unwrap_or(-1);
            let tail_start = captured.len().saturating_sub(TAIL_LINES);
            Err(ExecutorError::CommandFailed {
                code,
                tail: captured[tail_start..].join("\n"),
            })
        }
    }
}

/// Read a pipe line by line, emitting each read and collecting the capture.
async fn stream_lines(
    pipe: impl AsyncRead + Unpin,
    script_id: String,
    emitter: EventEmitter,
) -> Vec<String> {
    let mut lines = BufReader::new(pipe).lines();
    let mut captured = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        // A closed channel means teardown; keep draining for the capture.
        let _ = emitter.emit(ResultEvent::shell(&script_id, &line));
        captured.push(line);
    }
    captured
}
