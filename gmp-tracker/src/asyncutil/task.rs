use std::future::Future;
use std::pin::Pin;

use error_stack::{Context, Report, Result, ResultExt};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An awaitable action that can be cancelled through the token it receives when started.
pub struct CancellableTask<T> {
    run: Box<dyn FnOnce(CancellationToken) -> PinnedFuture<T> + Send>,
}

impl<T> CancellableTask<T> {
    pub fn create<Fut>(task: impl FnOnce(CancellationToken) -> Fut + Send + 'static) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            run: Box::new(move |token| Box::pin(task(token))),
        }
    }

    pub async fn run(self, token: CancellationToken) -> T {
        (self.run)(token).await
    }
}

#[derive(Error, Debug)]
#[error("task {0} failed")]
pub struct TaskError(String);

/// Named tasks that run concurrently until every one of them has ended or the group is
/// cancelled.
pub struct TaskGroup<E>
where
    E: From<TaskError> + Context,
{
    name: String,
    tasks: Vec<(String, CancellableTask<Result<(), E>>)>,
}

impl<E> TaskGroup<E>
where
    E: From<TaskError> + Context,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: vec![],
        }
    }

    /// The added tasks won't be started until [TaskGroup::run] is called
    pub fn add_task(
        mut self,
        name: impl Into<String>,
        task: CancellableTask<Result<(), E>>,
    ) -> Self {
        self.tasks.push((name.into(), task));
        self
    }

    /// Runs all tasks concurrently and returns once all of them have ended. A failing or
    /// panicking task does not stop the others; all errors are collected into one report.
    pub async fn run(self, token: CancellationToken) -> Result<(), E> {
        let total = self.tasks.len();
        let mut running = JoinSet::new();

        for (name, task) in self.tasks {
            let token = token.child_token();
            running.spawn(async move {
                let result = task.run(token).await;
                (name, result)
            });
        }

        let mut final_result: Result<(), E> = Ok(());
        while let Some(joined) = running.join_next().await {
            info!(
                group = %self.name,
                "sub-task ended ({}/{})",
                total.saturating_sub(running.len()),
                total
            );

            let err = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((name, Err(err))) => err.change_context(E::from(TaskError(name))),
                Err(join_err) => {
                    Report::new(join_err).change_context(E::from(TaskError(self.name.clone())))
                }
            };

            final_result = match final_result {
                Ok(()) => Err(err),
                Err(mut report) => {
                    report.extend_one(err);
                    Err(report)
                }
            };
        }

        final_result
    }
}

#[cfg(test)]
mod tests {
    use assert_ok::assert_ok;
    use error_stack::report;
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[tokio::test]
    async fn running_no_tasks_returns_no_error() {
        let group: TaskGroup<TaskError> = TaskGroup::new("test");
        assert_ok!(group.run(CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn cancellation_reaches_every_task() {
        let waiting_task = |token: CancellationToken| async move {
            token.cancelled().await;
            Ok(())
        };
        let token = CancellationToken::new();
        token.cancel();

        let group: TaskGroup<TaskError> = TaskGroup::new("test")
            .add_task("first", CancellableTask::create(waiting_task))
            .add_task("second", CancellableTask::create(waiting_task))
            .add_task("third", CancellableTask::create(|_| async { Ok(()) }));

        assert_ok!(group.run(token).await);
    }

    #[tokio::test]
    async fn collect_all_errors_on_completion() {
        let group = TaskGroup::new("test")
            .add_task(
                "first",
                CancellableTask::create(|_| async { Err(report!(TaskError("a".into()))) }),
            )
            .add_task("second", CancellableTask::create(|_| async { Ok(()) }))
            .add_task(
                "third",
                CancellableTask::create(|_| async { Err(report!(TaskError("b".into()))) }),
            );

        let err = group.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.current_frames().len(), 2);
    }

    #[tokio::test]
    async fn panicking_task_is_reported_as_error() {
        let group: TaskGroup<TaskError> = TaskGroup::new("test")
            .add_task("ok", CancellableTask::create(|_| async { Ok(()) }))
            .add_task("panic", CancellableTask::create(|_| async { panic!("panic") }));

        let err = group.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.current_frames().len(), 1);
    }
}
