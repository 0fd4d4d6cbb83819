use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use tracing::debug;

use super::context::TaskContext;
use super::types::{RetryPolicy, TaskStatus};
use crate::audit::AuditEvent;
use crate::{AgentError, Result};

pub type OperationFuture = BoxFuture<'static, Result<()>>;

/// 子任务的一次执行单元，可被重复调用
pub type Operation = Box<dyn Fn(TaskContext) -> OperationFuture + Send + Sync>;

/// 把普通的异步闭包包装成 [`Operation`]
pub fn operation<F, Fut>(f: F) -> Operation
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |ctx| f(ctx).boxed())
}

/// 可重试、有超时限制的子任务
pub struct SubTask {
    name: String,
    operation: Operation,
    rollback: Option<Operation>,
    policy: RetryPolicy,
    status: TaskStatus,
    attempts: u32,
    last_error: Option<String>,
}

impl SubTask {
    pub fn new(name: impl Into<String>, policy: RetryPolicy, operation: Operation) -> Self {
        Self {
            name: name.into(),
            operation,
            rollback: None,
            policy,
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn with_rollback(mut self, rollback: Operation) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// 实际执行过的尝试次数
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 执行子任务
    ///
    /// 最多尝试 `max_retries + 1` 次，每次受 `timeout` 约束，首次成功即返回。
    /// 全部失败后先尽力执行回滚操作，再返回最后一次的错误。
    pub async fn execute(&mut self, ctx: &TaskContext) -> Result<()> {
        self.status = TaskStatus::Running;
        ctx.emit(AuditEvent::SubTaskStarted {
            name: self.name.clone(),
            max_retries: self.policy.max_retries,
            timeout: self.policy.timeout,
        });

        let total = self.policy.total_attempts();
        let mut last_error = None;

        for attempt in 1..=total {
            self.attempts = attempt;
            let attempt_ctx = ctx.for_attempt(attempt);

            match self.run_bounded(&self.operation, attempt_ctx).await {
                Ok(()) => {
                    self.status = TaskStatus::Success;
                    self.last_error = None;
                    ctx.emit(AuditEvent::SubTaskSucceeded {
                        name: self.name.clone(),
                        attempt,
                    });
                    return Ok(());
                }
                Err(e) => {
                    ctx.emit(AuditEvent::AttemptFailed {
                        name: self.name.clone(),
                        attempt,
                        error: e.to_string(),
                    });
                    let retryable = e.is_retryable();
                    last_error = Some(e);

                    if !retryable {
                        debug!("子任务 [{}] 遇到不可重试的错误，停止重试", self.name);
                        break;
                    }
                    if attempt < total && !self.policy.retry_delay.is_zero() {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        self.status = TaskStatus::Failed;
        let error = last_error
            .unwrap_or_else(|| AgentError::operation(format!("子任务 [{}] 未执行", self.name)));
        self.last_error = Some(error.to_string());

        if let Some(rollback) = &self.rollback {
            match self.run_bounded(rollback, ctx.clone()).await {
                Ok(()) => ctx.emit(AuditEvent::SubTaskRollbackSucceeded {
                    name: self.name.clone(),
                }),
                Err(e) => ctx.emit(AuditEvent::SubTaskRollbackFailed {
                    name: self.name.clone(),
                    error: e.to_string(),
                }),
            }
        }

        ctx.emit(AuditEvent::SubTaskFailed {
            name: self.name.clone(),
            error: error.to_string(),
        });
        Err(error)
    }

    async fn run_bounded(&self, operation: &Operation, ctx: TaskContext) -> Result<()> {
        match tokio::time::timeout(self.policy.timeout, operation(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::timeout(&self.name, self.policy.timeout)),
        }
    }
}

impl std::fmt::Debug for SubTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubTask")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("status", &self.status)
            .field("attempts", &self.attempts)
            .field("has_rollback", &self.rollback.is_some())
            .finish()
    }
}
