use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::task as task_defaults;
use crate::{AgentError, Result};

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Backup,
    Recover,
    RecoverFromUpload,
}

/// 任务作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskScope {
    Database,
    Website,
    App,
    Directory,
    System,
}

/// 任务/子任务状态
///
/// 只允许 Pending -> Running -> {Success, Failed} 单向推进。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Backup => "backup",
            TaskType::Recover => "recover",
            TaskType::RecoverFromUpload => "recover-upload",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TaskType::Backup => "备份",
            TaskType::Recover => "恢复",
            TaskType::RecoverFromUpload => "上传恢复",
        }
    }
}

impl TaskScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskScope::Database => "database",
            TaskScope::Website => "website",
            TaskScope::App => "app",
            TaskScope::Directory => "directory",
            TaskScope::System => "system",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TaskScope::Database => "数据库",
            TaskScope::Website => "网站",
            TaskScope::App => "应用",
            TaskScope::Directory => "目录",
            TaskScope::System => "系统",
        }
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Running => "Running",
            TaskStatus::Success => "Success",
            TaskStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// 状态机是否允许从当前状态推进到 `next`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Success)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "backup" => Ok(TaskType::Backup),
            "recover" => Ok(TaskType::Recover),
            "recover-upload" => Ok(TaskType::RecoverFromUpload),
            other => Err(AgentError::custom(format!("未知的任务类型: {other}"))),
        }
    }
}

impl FromStr for TaskScope {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "database" => Ok(TaskScope::Database),
            "website" => Ok(TaskScope::Website),
            "app" => Ok(TaskScope::App),
            "directory" => Ok(TaskScope::Directory),
            "system" => Ok(TaskScope::System),
            other => Err(AgentError::custom(format!("未知的任务作用域: {other}"))),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(TaskStatus::Pending),
            "Running" => Ok(TaskStatus::Running),
            "Success" => Ok(TaskStatus::Success),
            "Failed" => Ok(TaskStatus::Failed),
            other => Err(AgentError::custom(format!("未知的任务状态: {other}"))),
        }
    }
}

/// 子任务的重试与超时策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 失败后的最大重试次数，总尝试次数为 max_retries + 1
    pub max_retries: u32,
    /// 单次尝试的超时时间
    pub timeout: Duration,
    /// 两次尝试之间的等待时间
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: task_defaults::DEFAULT_MAX_RETRIES,
            timeout: task_defaults::DEFAULT_SUB_TASK_TIMEOUT,
            retry_delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, timeout: Duration) -> Self {
        Self {
            max_retries,
            timeout,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// 单次尝试的超时至少为 `min`
    pub fn with_min_timeout(mut self, min: Duration) -> Self {
        self.timeout = self.timeout.max(min);
        self
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// 任务的身份信息
#[derive(Debug, Clone)]
pub struct TaskMeta {
    pub name: String,
    pub task_type: TaskType,
    pub scope: TaskScope,
    /// 外部关联ID（例如前端生成的任务ID）
    pub correlation_id: Option<String>,
    /// 所属资源ID
    pub resource_id: Option<i64>,
}

impl TaskMeta {
    pub fn new(name: impl Into<String>, task_type: TaskType, scope: TaskScope) -> Self {
        Self {
            name: name.into(),
            task_type,
            scope,
            correlation_id: None,
            resource_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_resource_id(mut self, resource_id: i64) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    /// 生成子任务名，例如 "备份数据库 local - app_db"
    pub fn sub_task_name(&self) -> String {
        format!(
            "{}{} {}",
            self.task_type.display_name(),
            self.scope.display_name(),
            self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Success));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));

        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Success));
        assert!(!TaskStatus::Success.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Success));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_status_round_trip_through_storage_string() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Success,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("Cancelled".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_retry_policy_attempts() {
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1)).total_attempts(), 1);
        assert_eq!(RetryPolicy::new(3, Duration::from_secs(1)).total_attempts(), 4);
        assert_eq!(RetryPolicy::default().max_retries, 3);

        let policy = RetryPolicy::new(2, Duration::from_secs(10));
        assert_eq!(
            policy.with_min_timeout(Duration::from_secs(30)).timeout,
            Duration::from_secs(30)
        );
        assert_eq!(
            policy.with_min_timeout(Duration::from_secs(5)).timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_sub_task_name() {
        let meta = TaskMeta::new("local - app_db", TaskType::Backup, TaskScope::Database);
        assert_eq!(meta.sub_task_name(), "备份数据库 local - app_db");
    }
}
