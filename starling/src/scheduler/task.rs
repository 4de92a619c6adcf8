use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use starling_api::errors::TaskError;
use starling_api::types::BoxedFuture;

/// Identifier handed out by the scheduler for every scheduled unit.
pub type TaskId = u64;

type TaskFn<T> = Box<dyn FnOnce() -> BoxedFuture<'static, Result<T, TaskError>> + Send>;

/// A unit of work waiting for admission.
///
/// Created by `schedule_task` and consumed when the scheduler admits it.
pub struct DeferredTask<T> {
    id: TaskId,
    run: TaskFn<T>,
}

impl<T: Send + 'static> DeferredTask<T> {
    /// Wraps `execute(input)` into a deferred unit.
    ///
    /// Errors returned by the unit are flattened into [`TaskError::Execution`]
    /// and panics into [`TaskError::Panicked`].
    pub fn new<I, F, Fut, E>(id: TaskId, execute: F, input: I) -> Self
    where
        I: Send + 'static,
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let run: TaskFn<T> = Box::new(move || {
            Box::pin(async move {
                let unit = async move { execute(input).await };
                match AssertUnwindSafe(unit).catch_unwind().await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(TaskError::Execution(err.to_string())),
                    Err(panic) => Err(TaskError::Panicked(panic_message(panic))),
                }
            })
        });
        Self { id, run }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Starts the unit, yielding a future that never panics.
    pub(crate) fn execute(self) -> BoxedFuture<'static, Result<T, TaskError>> {
        (self.run)()
    }
}

impl<T> fmt::Debug for DeferredTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredTask")
            .field("id", &self.id)
            .field("run", &"<task-fn>")
            .finish()
    }
}

/// Result of one unit, surfaced to completion listeners.
///
/// Exactly one of result or error is present, so it is modelled as a `Result`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome<T> {
    pub task_id: TaskId,
    pub result: Result<T, TaskError>,
}

impl<T> TaskOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.result.as_ref().err()
    }
}

/// Best effort extraction of a panic payload's message.
pub fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_success() {
        let task = DeferredTask::new(1, |x: u32| async move { Ok::<_, String>(x * 2) }, 21);
        assert_eq!(task.id(), 1);
        assert_eq!(task.execute().await, Ok(42));
    }

    #[tokio::test]
    async fn test_execute_error_is_wrapped() {
        let task = DeferredTask::<u32>::new(2, |_: ()| async { Err::<u32, _>("bad input") }, ());
        assert_eq!(task.execute().await, Err(TaskError::Execution("bad input".into())));
    }

    #[tokio::test]
    async fn test_execute_panic_is_caught() {
        let task = DeferredTask::<u32>::new(
            3,
            |_: ()| async {
                if true {
                    panic!("exploded");
                }
                Ok::<u32, String>(0)
            },
            (),
        );
        assert_eq!(task.execute().await, Err(TaskError::Panicked("exploded".into())));
    }
}
