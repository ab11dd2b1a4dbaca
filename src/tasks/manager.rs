//! Task lifecycle operations on top of a [`TaskStore`].

use super::{
    TaskError,
    model::{Task, TaskStatus},
    store::TaskStore,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Message recorded on tasks failed by the stale sweep.
pub const STALE_TASK_MESSAGE: &str = "processing timed out";

/// Owns every task state transition.
#[derive(Clone)]
pub struct TaskManager {
    store: Arc<dyn TaskStore>,
}

impl TaskManager {
    /// Wrap a task store.
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Create a `processing` task, or reset the existing one for the same file and user.
    pub async fn register_upload(
        &self,
        file_name: &str,
        file_path: &str,
        user_email: &str,
    ) -> Result<Task, TaskError> {
        let task = self
            .store
            .upsert_processing(file_name, file_path, user_email, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(
            task_id = task.task_id,
            file_path,
            user_email,
            "Task registered"
        );
        Ok(task)
    }

    /// Claim a task for execution and stamp `started_at`.
    ///
    /// A redelivered task that already finished is reset to `processing` first so the run can
    /// record a fresh outcome. Tasks failed by the stale sweep stay failed until re-uploaded.
    pub async fn begin_run(&self, task_id: i64) -> Result<Task, TaskError> {
        let task = self.get(task_id).await?;
        if task.status == TaskStatus::Failed
            && task.error_message.as_deref() == Some(STALE_TASK_MESSAGE)
        {
            return Err(TaskError::InvalidTransition {
                task_id,
                from: task.status,
                to: TaskStatus::Processing,
            });
        }
        if task.status.is_terminal() {
            tracing::info!(task_id, from = %task.status, "Reopening finished task");
            self.store
                .upsert_processing(
                    &task.file_name,
                    &task.file_path,
                    &task.user_email,
                    OffsetDateTime::now_utc(),
                )
                .await?;
        }
        match self.store.start(task_id, OffsetDateTime::now_utc()).await? {
            Some(task) => Ok(task),
            None => Err(self.rejected(task_id, TaskStatus::Processing).await?),
        }
    }

    /// Mark a task `completed` with JSON diagnostics.
    pub async fn complete(&self, task_id: i64, info: &Value) -> Result<(), TaskError> {
        self.transition(task_id, TaskStatus::Completed, None, Some(info.to_string()))
            .await?;
        tracing::info!(task_id, "Task completed");
        Ok(())
    }

    /// Mark a task `failed` with an error description.
    pub async fn fail(&self, task_id: i64, message: &str) -> Result<(), TaskError> {
        self.transition(task_id, TaskStatus::Failed, Some(message.to_string()), None)
            .await?;
        tracing::warn!(task_id, error = message, "Task failed");
        Ok(())
    }

    /// Fetch a task, failing with [`TaskError::NotFound`] when absent.
    pub async fn get(&self, task_id: i64) -> Result<Task, TaskError> {
        self.store
            .get(task_id)
            .await?
            .ok_or(TaskError::NotFound(task_id))
    }

    /// Every task of `user_email`, newest first.
    pub async fn list_for_user(&self, user_email: &str) -> Result<Vec<Task>, TaskError> {
        self.store.list_for_user(user_email).await
    }

    /// Fail every `processing` task whose current run started more than `max_age` ago.
    ///
    /// Tasks still waiting in a queue have no `started_at` and are left alone. Returns the
    /// identifiers that were failed; tasks finishing concurrently are skipped.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<Vec<i64>, TaskError> {
        let cutoff = OffsetDateTime::now_utc() - max_age;
        let mut swept = Vec::new();
        for task in self.store.list_processing().await? {
            let Some(started_at) = task.started_at else {
                continue;
            };
            if started_at >= cutoff {
                continue;
            }
            let changed = self
                .store
                .finish(
                    task.task_id,
                    TaskStatus::Failed,
                    Some(STALE_TASK_MESSAGE.to_string()),
                    None,
                    OffsetDateTime::now_utc(),
                )
                .await?;
            if changed {
                swept.push(task.task_id);
            }
        }
        if !swept.is_empty() {
            tracing::warn!(count = swept.len(), tasks = ?swept, "Failed stale tasks");
        }
        Ok(swept)
    }

    async fn transition(
        &self,
        task_id: i64,
        to: TaskStatus,
        error_message: Option<String>,
        additional_info: Option<String>,
    ) -> Result<(), TaskError> {
        let changed = self
            .store
            .finish(
                task_id,
                to,
                error_message,
                additional_info,
                OffsetDateTime::now_utc(),
            )
            .await?;
        if changed {
            return Ok(());
        }
        Err(self.rejected(task_id, to).await?)
    }

    /// Explain why a guarded write to `task_id` changed nothing.
    async fn rejected(&self, task_id: i64, to: TaskStatus) -> Result<TaskError, TaskError> {
        Ok(match self.store.get(task_id).await? {
            None => TaskError::NotFound(task_id),
            Some(task) => TaskError::InvalidTransition {
                task_id,
                from: task.status,
                to,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::store::SqliteTaskStore;
    use serde_json::json;

    fn manager() -> (TaskManager, Arc<SqliteTaskStore>) {
        let store = Arc::new(SqliteTaskStore::in_memory().expect("store"));
        (TaskManager::new(store.clone()), store)
    }

    #[tokio::test]
    async fn completes_with_diagnostics() {
        let (manager, _) = manager();
        let task = manager
            .register_upload("a.txt", "ada/a.txt", "ada@example.com")
            .await
            .unwrap();
        manager
            .complete(task.task_id, &json!({ "chunk_count": 2 }))
            .await
            .unwrap();

        let stored = manager.get(task.task_id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        let info: Value = serde_json::from_str(stored.additional_info.as_deref().unwrap()).unwrap();
        assert_eq!(info["chunk_count"], 2);
    }

    #[tokio::test]
    async fn terminal_tasks_reject_further_transitions() {
        let (manager, _) = manager();
        let task = manager
            .register_upload("a.txt", "ada/a.txt", "ada@example.com")
            .await
            .unwrap();
        manager.fail(task.task_id, "bad input").await.unwrap();

        let error = manager
            .complete(task.task_id, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            TaskError::InvalidTransition {
                from: TaskStatus::Failed,
                to: TaskStatus::Completed,
                ..
            }
        ));
        let stored = manager.get(task.task_id).await.unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("bad input"));
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let (manager, _) = manager();
        assert!(matches!(manager.get(42).await, Err(TaskError::NotFound(42))));
        assert!(matches!(
            manager.fail(42, "x").await,
            Err(TaskError::NotFound(42))
        ));
    }

    #[tokio::test]
    async fn reupload_reuses_the_task_id_and_clears_failure() {
        let (manager, _) = manager();
        let first = manager
            .register_upload("a.txt", "ada/a.txt", "ada@example.com")
            .await
            .unwrap();
        manager.fail(first.task_id, "boom").await.unwrap();

        let second = manager
            .register_upload("a.txt", "ada/a.txt", "ada@example.com")
            .await
            .unwrap();
        assert_eq!(second.task_id, first.task_id);
        assert_eq!(second.status, TaskStatus::Processing);
        assert!(second.error_message.is_none());
    }

    #[tokio::test]
    async fn begin_run_reopens_finished_tasks() {
        let (manager, _) = manager();
        let task = manager
            .register_upload("a.txt", "ada/a.txt", "ada@example.com")
            .await
            .unwrap();
        let running = manager.begin_run(task.task_id).await.unwrap();
        assert_eq!(running.status, TaskStatus::Processing);

        manager
            .complete(task.task_id, &json!({ "chunk_count": 1 }))
            .await
            .unwrap();
        let reopened = manager.begin_run(task.task_id).await.unwrap();
        assert_eq!(reopened.task_id, task.task_id);
        assert_eq!(reopened.status, TaskStatus::Processing);
        assert!(reopened.additional_info.is_none());
        assert!(reopened.completed_at.is_none());
    }

    #[tokio::test]
    async fn begin_run_stamps_started_at() {
        let (manager, _) = manager();
        let task = manager
            .register_upload("a.txt", "ada/a.txt", "ada@example.com")
            .await
            .unwrap();
        assert!(task.started_at.is_none());

        let running = manager.begin_run(task.task_id).await.unwrap();
        assert!(running.started_at.is_some());
        assert!(matches!(
            manager.begin_run(404).await,
            Err(TaskError::NotFound(404))
        ));
    }

    #[tokio::test]
    async fn sweep_fails_only_long_running_tasks() {
        let (manager, store) = manager();
        let an_hour_ago = OffsetDateTime::now_utc() - Duration::from_secs(3600);
        let stuck = store
            .upsert_processing("stuck.txt", "ada/stuck.txt", "ada@example.com", an_hour_ago)
            .await
            .unwrap();
        store.start(stuck.task_id, an_hour_ago).await.unwrap();
        let queued = store
            .upsert_processing("queued.txt", "ada/queued.txt", "ada@example.com", an_hour_ago)
            .await
            .unwrap();
        let fresh = manager
            .register_upload("new.txt", "ada/new.txt", "ada@example.com")
            .await
            .unwrap();
        manager.begin_run(fresh.task_id).await.unwrap();

        let swept = manager.sweep_stale(Duration::from_secs(600)).await.unwrap();

        assert_eq!(swept, vec![stuck.task_id]);
        let stuck = manager.get(stuck.task_id).await.unwrap();
        assert_eq!(stuck.status, TaskStatus::Failed);
        assert_eq!(stuck.error_message.as_deref(), Some(STALE_TASK_MESSAGE));
        for id in [queued.task_id, fresh.task_id] {
            assert_eq!(manager.get(id).await.unwrap().status, TaskStatus::Processing);
        }
    }

    #[tokio::test]
    async fn swept_tasks_are_not_reopened_by_redelivery() {
        let (manager, store) = manager();
        let an_hour_ago = OffsetDateTime::now_utc() - Duration::from_secs(3600);
        let task = store
            .upsert_processing("a.txt", "ada/a.txt", "ada@example.com", an_hour_ago)
            .await
            .unwrap();
        store.start(task.task_id, an_hour_ago).await.unwrap();
        manager.sweep_stale(Duration::from_secs(60)).await.unwrap();

        let error = manager.begin_run(task.task_id).await.unwrap_err();
        assert!(matches!(
            error,
            TaskError::InvalidTransition {
                from: TaskStatus::Failed,
                to: TaskStatus::Processing,
                ..
            }
        ));
        assert_eq!(
            manager.get(task.task_id).await.unwrap().status,
            TaskStatus::Failed
        );

        let reuploaded = manager
            .register_upload("a.txt", "ada/a.txt", "ada@example.com")
            .await
            .unwrap();
        assert_eq!(reuploaded.status, TaskStatus::Processing);
        assert!(manager.begin_run(task.task_id).await.is_ok());
    }
}
