//! Bounded concurrent executor
//!
//! Runs one async operation per work item with at most `max_concurrency`
//! operations in flight. Results come back in item order, one per item, and a
//! failing item never aborts the rest of the batch.
//!
//! The semaphore is created per call, so its scope is one logical batch.

use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Where item operations run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Scheduling {
    /// On the calling task; suspends only at the operation's own awaits
    #[default]
    Inline,
    /// Each operation on its own tokio task, isolated from the dispatch loop
    Isolated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub max_concurrency: usize,
    pub scheduling: Scheduling,
}

impl ExecutorOptions {
    /// One item at a time, in order, on the calling task
    pub fn sequential() -> Self {
        Self {
            max_concurrency: 1,
            scheduling: Scheduling::Inline,
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            scheduling: Scheduling::Inline,
        }
    }
}

/// Per-item failure
#[derive(Debug, thiserror::Error)]
pub enum TaskError<E> {
    /// The operation returned an error
    #[error("Task failed: {0}")]
    Failed(E),

    /// The operation never finished (it panicked, or its task was cancelled)
    #[error("Task aborted: {0}")]
    Aborted(String),
}

/// Maps every item through `operation` without exceeding the concurrency ceiling
///
/// Items whose count is known up front and fits under the ceiling are all
/// dispatched at once. Otherwise a permit is taken before each operation starts
/// and released when it completes, successful or not.
pub async fn run_bounded<I, F, Fut, T, E>(
    items: I,
    options: ExecutorOptions,
    mut operation: F,
) -> Vec<Result<T, TaskError<E>>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let limit = options.max_concurrency.max(1);
    let items = items.into_iter();
    let known_len = match items.size_hint() {
        (lower, Some(upper)) if lower == upper => Some(upper),
        _ => None,
    };

    if let Some(len) = known_len.filter(|len| *len <= limit) {
        debug!(
            "Dispatching {} items at once (limit {}, {:?})",
            len, limit, options.scheduling
        );
        return match options.scheduling {
            Scheduling::Inline => join_all(items.map(|item| guarded(operation(item)))).await,
            Scheduling::Isolated => {
                let handles = items
                    .map(|item| Ok(tokio::spawn(operation(item))))
                    .collect();
                collect_isolated(handles).await
            }
        };
    }

    debug!(
        "Dispatching items with {} permits ({:?})",
        limit, options.scheduling
    );
    let semaphore = Arc::new(Semaphore::new(limit));

    match options.scheduling {
        Scheduling::Inline => {
            let gated = items.map(|item| {
                let semaphore = Arc::clone(&semaphore);
                let pending = operation(item);
                async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| TaskError::Aborted(e.to_string()))?;
                    guarded(pending).await
                }
            });
            join_all(gated).await
        }
        Scheduling::Isolated => {
            let mut handles = Vec::new();
            for item in items {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        handles.push(Err(TaskError::Aborted(e.to_string())));
                        continue;
                    }
                };
                let pending = operation(item);
                handles.push(Ok(tokio::spawn(async move {
                    let result = pending.await;
                    drop(permit);
                    result
                })));
            }
            collect_isolated(handles).await
        }
    }
}

/// Runs an inline operation, turning a panic into [`TaskError::Aborted`]
async fn guarded<Fut, T, E>(pending: Fut) -> Result<T, TaskError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match AssertUnwindSafe(pending).catch_unwind().await {
        Ok(result) => result.map_err(TaskError::Failed),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Inline task panicked: {}", message);
            Err(TaskError::Aborted(message))
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn collect_isolated<T, E>(
    handles: Vec<Result<JoinHandle<Result<T, E>>, TaskError<E>>>,
) -> Vec<Result<T, TaskError<E>>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let result = match handle {
            Ok(handle) => match handle.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(join_error) => {
                    error!("Isolated task did not complete: {}", join_error);
                    Err(TaskError::Aborted(join_error.to_string()))
                }
            },
            Err(e) => Err(e),
        };
        results.push(result);
    }
    results
}
