//! The outer execution stream.
//!
//! `execute()` hands back an [`ExecutionStream`] yielding `(snapshot, event)`
//! pairs. A single bounded channel funnels every concurrent node's events
//! into this one ordered sequence; back-pressure pauses fast producers when
//! the caller is slow. The stream ends after the last node completes, or
//! with one terminal `Err` item when a script fails. Dropping the stream
//! cancels the execution.

use std::time::Duration;

use futures_util::stream::{BoxStream, StreamExt};

use crate::document::Workflow;
use crate::events::ResultEvent;

use super::EngineError;

/// One item of the outer sequence: the updated snapshot paired with the
/// event that produced it, or the typed error that terminates the run.
pub type StreamItem = Result<(Workflow, ResultEvent), EngineError>;

#[derive(Debug)]
pub struct ExecutionStream {
    rx: flume::Receiver<StreamItem>,
}

impl ExecutionStream {
    pub(crate) fn new(rx: flume::Receiver<StreamItem>) -> Self {
        Self { rx }
    }

    /// Receive the next item; `None` once the execution has finished.
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking receive.
    pub fn try_next(&mut self) -> Option<StreamItem> {
        self.rx.try_recv().ok()
    }

    /// Receive with a deadline; `None` on timeout or end of stream.
    pub async fn next_timeout(&mut self, duration: Duration) -> Option<StreamItem> {
        tokio::time::timeout(duration, self.next()).await.ok().flatten()
    }

    /// Adapt into a `futures` stream.
    pub fn into_async_stream(self) -> BoxStream<'static, StreamItem> {
        self.rx.into_stream().boxed()
    }

    /// Consume the stream to its end, collecting every pair.
    ///
    /// Returns the collected pairs, or the terminal error together with the
    /// pairs delivered before it.
    pub async fn drain(mut self) -> (Vec<(Workflow, ResultEvent)>, Option<EngineError>) {
        let mut pairs = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(pair) => pairs.push(pair),
                Err(error) => return (pairs, Some(error)),
            }
        }
        (pairs, None)
    }
}
