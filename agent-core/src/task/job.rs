use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::context::{TaskContext, TaskEnv};
use super::subtask::{Operation, SubTask};
use super::types::{RetryPolicy, TaskMeta, TaskStatus};
use crate::audit::AuditEvent;
use crate::store::TaskRecord;
use crate::{AgentError, Result};

/// 一个逻辑上的维护任务，由按顺序执行的子任务组成
pub struct Task {
    id: String,
    parent_id: Option<String>,
    meta: TaskMeta,
    sub_tasks: Vec<SubTask>,
    status: TaskStatus,
    error: Option<String>,
    env: TaskEnv,
    created_at: DateTime<Utc>,
}

impl Task {
    /// 创建顶层任务
    pub fn new(meta: TaskMeta, env: TaskEnv) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            meta,
            sub_tasks: Vec::new(),
            status: TaskStatus::Pending,
            error: None,
            env,
            created_at: Utc::now(),
        }
    }

    /// 创建嵌入到父任务执行路径上的子任务
    ///
    /// 嵌入任务沿用父任务的ID和审计日志，不单独持久化。
    pub fn child_of(parent: &TaskContext, meta: TaskMeta) -> Self {
        Self {
            id: parent.task_id().to_string(),
            parent_id: Some(parent.task_id().to_string()),
            meta,
            sub_tasks: Vec::new(),
            status: TaskStatus::Pending,
            error: None,
            env: parent.env().clone(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn sub_tasks(&self) -> &[SubTask] {
        &self.sub_tasks
    }

    pub fn is_embedded(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn add_sub_task(&mut self, sub_task: SubTask) -> &mut Self {
        self.sub_tasks.push(sub_task);
        self
    }

    pub fn add_sub_task_with_ops(
        &mut self,
        name: impl Into<String>,
        operation: Operation,
        rollback: Option<Operation>,
        policy: RetryPolicy,
    ) -> &mut Self {
        let mut sub_task = SubTask::new(name, policy, operation);
        if let Some(rollback) = rollback {
            sub_task = sub_task.with_rollback(rollback);
        }
        self.add_sub_task(sub_task)
    }

    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            id: self.id.clone(),
            name: self.meta.name.clone(),
            task_type: self.meta.task_type,
            scope: self.meta.scope,
            status: self.status,
            error_message: self.error.clone(),
            correlation_id: self.meta.correlation_id.clone(),
            resource_id: self.meta.resource_id,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    /// 持久化初始记录，失败时返回错误由调用方决定是否派发
    pub async fn save(&self) -> Result<()> {
        if self.is_embedded() {
            return Ok(());
        }
        match &self.env.repo {
            Some(repo) => repo.save_task(&self.to_record()).await,
            None => Ok(()),
        }
    }

    /// 按插入顺序执行全部子任务
    ///
    /// 任一子任务失败即终止，后续子任务不再执行，任务状态为 Failed。
    pub async fn execute(&mut self) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(AgentError::custom(format!(
                "任务 [{}] 已执行过，当前状态: {}",
                self.meta.name, self.status
            )));
        }

        let ctx = TaskContext::new(self.id.clone(), self.meta.name.clone(), self.env.clone());
        self.transition(TaskStatus::Running).await;
        ctx.emit(AuditEvent::TaskStarted {
            name: self.meta.name.clone(),
        });

        for index in 0..self.sub_tasks.len() {
            let sub_task = &mut self.sub_tasks[index];
            debug!("任务 [{}] 执行子任务 [{}]", self.meta.name, sub_task.name());

            if let Err(e) = sub_task.execute(&ctx).await {
                self.error = Some(e.to_string());
                self.transition(TaskStatus::Failed).await;
                ctx.emit(AuditEvent::TaskFinished {
                    name: self.meta.name.clone(),
                    status: self.status,
                    error: self.error.clone(),
                });
                return Err(e);
            }
        }

        self.transition(TaskStatus::Success).await;
        ctx.emit(AuditEvent::TaskFinished {
            name: self.meta.name.clone(),
            status: self.status,
            error: None,
        });
        Ok(())
    }

    async fn transition(&mut self, next: TaskStatus) {
        if !self.status.can_transition_to(next) {
            warn!(
                "任务 [{}] 忽略非法状态变更: {} -> {}",
                self.meta.name, self.status, next
            );
            return;
        }
        self.status = next;

        if self.is_embedded() {
            return;
        }
        if let Some(repo) = &self.env.repo {
            if let Err(e) = repo
                .update_task(&self.id, next, self.error.as_deref())
                .await
            {
                warn!("更新任务记录失败 [{}]: {}", self.id, e);
            }
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .field("meta", &self.meta)
            .field("status", &self.status)
            .field("sub_tasks", &self.sub_tasks)
            .finish()
    }
}
