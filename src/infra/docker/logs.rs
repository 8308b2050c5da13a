//! Readiness detection by scanning a container's log output.
//!
//! The scanner owns the log stream inside a spawned task and races a timer.
//! Whichever finishes first decides the outcome; the loser is cancelled, so a
//! timed out (or dropped) wait never leaves a reader attached to the engine.

use crate::error::{RuntimeError, WaitError};
use futures_util::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Reassembles arbitrary output chunks into complete lines.
///
/// A chunk may carry several lines or a fragment of one. A trailing fragment
/// is emitted when the underlying stream ends.
pub struct LogLines<S> {
    inner: S,
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    finished: bool,
}

impl<S> LogLines<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    fn drain_complete_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.ready.push_back(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

impl<S> Stream for LogLines<S>
where
    S: Stream<Item = Result<Vec<u8>, RuntimeError>> + Unpin,
{
    type Item = Result<String, RuntimeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(line) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                    this.drain_complete_lines();
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    this.finished = true;
                    if !this.buffer.is_empty() {
                        let rest = std::mem::take(&mut this.buffer);
                        this.ready.push_back(String::from_utf8_lossy(&rest).into_owned());
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Aborts the scanner if the waiting future goes away first.
struct AbortOnDrop(JoinHandle<ScanOutcome>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum ScanOutcome {
    Reached,
    Ended,
    Failed(RuntimeError),
}

/// Blocks until `pattern` has appeared on `required` distinct lines.
///
/// Returns as soon as the threshold is reached without waiting for the stream
/// to end. A stream that ends short of the threshold is a
/// [`WaitError::StreamEnded`]; running out of time is a [`WaitError::Timeout`]
/// regardless of stream state. Both carry the number of matches observed.
pub async fn wait_for_message<S>(
    stream: S,
    pattern: &str,
    required: usize,
    timeout: Duration,
) -> Result<(), WaitError>
where
    S: Stream<Item = Result<Vec<u8>, RuntimeError>> + Unpin + Send + 'static,
{
    let matches = Arc::new(AtomicUsize::new(0));
    let mut scanner = AbortOnDrop(tokio::spawn(scan(
        LogLines::new(stream),
        pattern.to_string(),
        required,
        matches.clone(),
    )));

    let outcome = tokio::select! {
        joined = &mut scanner.0 => Some(joined),
        _ = tokio::time::sleep(timeout) => None,
    };
    // Dropping the guard aborts the scanner (a no-op if it already finished).
    drop(scanner);
    let observed = matches.load(Ordering::Acquire);

    match outcome {
        Some(Ok(ScanOutcome::Reached)) => {
            tracing::debug!(%pattern, observed, "log message threshold reached");
            Ok(())
        }
        Some(Ok(ScanOutcome::Ended)) if observed >= required => Ok(()),
        Some(Ok(ScanOutcome::Ended)) => Err(WaitError::StreamEnded {
            pattern: pattern.to_string(),
            required,
            observed,
        }),
        Some(Ok(ScanOutcome::Failed(e))) => Err(WaitError::Stream(e)),
        Some(Err(join_err)) => Err(WaitError::Stream(RuntimeError::Other(format!(
            "log scanner task failed: {join_err}"
        )))),
        None => Err(WaitError::Timeout {
            pattern: pattern.to_string(),
            required,
            observed,
            timeout,
        }),
    }
}

async fn scan<S>(
    mut lines: LogLines<S>,
    pattern: String,
    required: usize,
    matches: Arc<AtomicUsize>,
) -> ScanOutcome
where
    S: Stream<Item = Result<Vec<u8>, RuntimeError>> + Unpin,
{
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => return ScanOutcome::Failed(e),
        };
        tracing::trace!(%line, "container log");
        if line.contains(&pattern) {
            let seen = matches.fetch_add(1, Ordering::AcqRel) + 1;
            if seen >= required {
                return ScanOutcome::Reached;
            }
        }
    }
    ScanOutcome::Ended
}
