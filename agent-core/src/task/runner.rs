use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::context::TaskEnv;
use super::job::Task;
use super::lock::ResourceLocks;
use super::types::{TaskMeta, TaskStatus, TaskType};
use crate::{AgentError, Result};

/// 正在运行的任务摘要
#[derive(Debug, Clone)]
pub struct ActiveTask {
    pub name: String,
    pub task_type: TaskType,
    pub lock_key: Option<String>,
    pub dispatched_at: DateTime<Utc>,
}

/// 后台任务结束后的结果
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// 已派发任务的句柄
///
/// 调用方可以丢弃句柄，任务仍会在后台执行完成。
#[derive(Debug)]
pub struct TaskHandle {
    task_id: String,
    join: JoinHandle<TaskOutcome>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// 等待任务结束（包括完成回调）
    pub async fn wait(self) -> Result<TaskOutcome> {
        Ok(self.join.await?)
    }
}

/// 任务执行器
///
/// 负责创建任务、在后台派发执行，以及维护活动任务表。
#[derive(Clone)]
pub struct TaskRunner {
    env: TaskEnv,
    locks: ResourceLocks,
    active: Arc<DashMap<String, ActiveTask>>,
}

impl TaskRunner {
    pub fn new(env: TaskEnv) -> Self {
        Self {
            env,
            locks: ResourceLocks::new(),
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn env(&self) -> &TaskEnv {
        &self.env
    }

    pub fn locks(&self) -> &ResourceLocks {
        &self.locks
    }

    pub fn new_task(&self, meta: TaskMeta) -> Task {
        Task::new(meta, self.env.clone())
    }

    /// 在后台执行任务，立即返回句柄
    ///
    /// 初始任务记录写入失败时返回 `DispatchFailed`，任务不会启动。
    /// 提供 `lock_key` 时，任务执行期间持有该资源锁；`on_complete` 在锁释放前调用。
    pub async fn dispatch<F, Fut>(
        &self,
        mut task: Task,
        lock_key: Option<String>,
        on_complete: F,
    ) -> Result<TaskHandle>
    where
        F: FnOnce(Result<()>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if task.is_embedded() {
            return Err(AgentError::dispatch(format!(
                "嵌入任务 [{}] 只能在父任务中直接执行",
                task.meta().name
            )));
        }
        task.save()
            .await
            .map_err(|e| AgentError::dispatch(format!("保存任务记录失败: {e}")))?;

        let task_id = task.id().to_string();
        self.active.insert(
            task_id.clone(),
            ActiveTask {
                name: task.meta().name.clone(),
                task_type: task.meta().task_type,
                lock_key: lock_key.clone(),
                dispatched_at: Utc::now(),
            },
        );
        info!("派发后台任务 [{}] {}", task.meta().name, task_id);

        let locks = self.locks.clone();
        let active = self.active.clone();
        let join = tokio::spawn(async move {
            let guard = match &lock_key {
                Some(key) => Some(locks.acquire(key).await),
                None => None,
            };

            let result = task.execute().await;
            let outcome = TaskOutcome {
                task_id: task.id().to_string(),
                status: task.status(),
                error: task.error_message().map(str::to_string),
            };
            on_complete(result).await;

            drop(guard);
            active.remove(&outcome.task_id);
            debug!("后台任务 [{}] 已结束: {}", outcome.task_id, outcome.status);
            outcome
        });

        Ok(TaskHandle { task_id, join })
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.active.contains_key(task_id)
    }

    pub fn active_tasks(&self) -> Vec<(String, ActiveTask)> {
        self.active
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
