use std::sync::Arc;

use crate::audit::{AuditEvent, SharedAuditSink, TracingAuditSink};
use crate::store::TaskRepo;

/// 任务运行所需的共享依赖
#[derive(Clone)]
pub struct TaskEnv {
    pub audit: SharedAuditSink,
    pub repo: Option<Arc<dyn TaskRepo>>,
}

impl TaskEnv {
    pub fn new(audit: SharedAuditSink, repo: Option<Arc<dyn TaskRepo>>) -> Self {
        Self { audit, repo }
    }
}

impl Default for TaskEnv {
    fn default() -> Self {
        Self {
            audit: Arc::new(TracingAuditSink),
            repo: None,
        }
    }
}

/// 传给每个子任务操作的上下文
#[derive(Clone)]
pub struct TaskContext {
    task_id: String,
    task_name: String,
    attempt: u32,
    env: TaskEnv,
}

impl TaskContext {
    pub(crate) fn new(task_id: String, task_name: String, env: TaskEnv) -> Self {
        Self {
            task_id,
            task_name,
            attempt: 0,
            env,
        }
    }

    pub(crate) fn for_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// 当前尝试序号，从 1 开始；0 表示不在子任务尝试中
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn env(&self) -> &TaskEnv {
        &self.env
    }

    pub fn emit(&self, event: AuditEvent) {
        self.env.audit.record(&self.task_id, &event);
    }

    /// 写一行自由格式的任务日志
    pub fn log(&self, line: impl Into<String>) {
        self.emit(AuditEvent::Line(line.into()));
    }
}
