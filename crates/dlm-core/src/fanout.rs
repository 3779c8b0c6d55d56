// Parallel fan-out over a set of nodes
//
// Every operation is spawned onto the runtime up front, so all per-node calls
// of one step run concurrently. Two ways to observe them:
//
// - `exec_all` waits for every call to settle and reports each outcome.
// - `as_completed` yields outcomes in completion order. Dropping the stream
//   early does NOT cancel the calls still in flight: their tasks are detached
//   and run to completion unobserved. Callers that stop early rely on a later
//   compare-and-delete to clean up whatever a straggler may have granted.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, join_all};
use futures::stream::{FuturesUnordered, Stream};
use futures::FutureExt;
use tokio::task::JoinError;

/// A per-item operation that did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("operation panicked: {0}")]
    Panicked(String),

    #[error("operation was cancelled")]
    Cancelled,
}

impl From<JoinError> for Fault {
    fn from(err: JoinError) -> Self {
        if err.is_cancelled() {
            return Fault::Cancelled;
        }
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Fault::Panicked(message)
    }
}

/// Result of running the operation against one item
pub type Outcome<T> = Result<T, Fault>;

fn spawn_each<I, T, F, Fut>(
    items: impl IntoIterator<Item = I>,
    op: F,
) -> Vec<(I, tokio::task::JoinHandle<T>)>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    items
        .into_iter()
        .map(|item| {
            let handle = tokio::spawn(op(item.clone()));
            (item, handle)
        })
        .collect()
}

/// Run `op` against every item concurrently and wait for all of them.
///
/// Results come back in input order. A fault in one item never cancels or
/// masks the others.
pub async fn exec_all<I, T, F, Fut>(items: impl IntoIterator<Item = I>, op: F) -> Vec<(I, Outcome<T>)>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (items, handles): (Vec<I>, Vec<_>) = spawn_each(items, op).into_iter().unzip();
    let results = join_all(handles).await;

    items
        .into_iter()
        .zip(results)
        .map(|(item, result)| (item, result.map_err(Fault::from)))
        .collect()
}

/// Like [`exec_all`], but returns the first fault (in input order) once every
/// item has settled.
pub async fn exec_all_strict<I, T, F, Fut>(
    items: impl IntoIterator<Item = I>,
    op: F,
) -> Result<Vec<(I, T)>, Fault>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    exec_all(items, op)
        .await
        .into_iter()
        .map(|(item, outcome)| outcome.map(|value| (item, value)))
        .collect()
}

/// Stream of `(item, outcome)` pairs in completion order
pub struct AsCompleted<I, T> {
    pending: FuturesUnordered<BoxFuture<'static, (I, Outcome<T>)>>,
}

impl<I, T> AsCompleted<I, T> {
    /// Number of operations not yet observed
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl<I, T> Stream for AsCompleted<I, T> {
    type Item = (I, Outcome<T>);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.pending).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pending.size_hint()
    }
}

/// Launch `op` against every item at once and yield results as they finish.
pub fn as_completed<I, T, F, Fut>(items: impl IntoIterator<Item = I>, op: F) -> AsCompleted<I, T>
where
    I: Clone + Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let pending = spawn_each(items, op)
        .into_iter()
        .map(|(item, handle)| {
            async move {
                let outcome = handle.await.map_err(Fault::from);
                (item, outcome)
            }
            .boxed()
        })
        .collect();

    AsCompleted { pending }
}
