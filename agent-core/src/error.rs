use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("记录不存在: {0}")]
    NotFound(String),

    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("操作执行失败: {0}")]
    OperationFailed(String),

    #[error("回滚失败: {0}")]
    RollbackFailed(String),

    #[error("任务派发失败: {0}")]
    DispatchFailed(String),

    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("配置序列化错误: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("DuckDB数据库错误: {0}")]
    DuckDb(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("配置文件未找到")]
    ConfigNotFound,

    #[error("自定义错误: {0}")]
    Custom(String),
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for AgentError {
    fn from(err: duckdb::Error) -> Self {
        AgentError::DuckDb(err.to_string())
    }
}

impl AgentError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn file_not_found(msg: impl Into<String>) -> Self {
        Self::FileNotFound(msg.into())
    }

    pub fn operation(msg: impl Into<String>) -> Self {
        Self::OperationFailed(msg.into())
    }

    pub fn rollback(msg: impl Into<String>) -> Self {
        Self::RollbackFailed(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::DispatchFailed(msg.into())
    }

    /// 单次尝试超时，归类为操作失败
    pub fn timeout(name: &str, timeout: Duration) -> Self {
        Self::OperationFailed(format!("{name} 执行超时 ({}s)", timeout.as_secs_f64()))
    }

    /// 是否值得由子任务重试
    ///
    /// 资源不存在、源文件缺失这类错误重试也不会改变结果，直接上抛。
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AgentError::NotFound(_)
                | AgentError::FileNotFound(_)
                | AgentError::DispatchFailed(_)
                | AgentError::ConfigNotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::operation("pg_dump 退出码 1").is_retryable());
        assert!(AgentError::timeout("backup", Duration::from_secs(300)).is_retryable());
        assert!(!AgentError::not_found("app_db").is_retryable());
        assert!(!AgentError::file_not_found("/tmp/none.sql.gz").is_retryable());
    }

    #[test]
    fn test_timeout_message_names_duration() {
        let err = AgentError::timeout("恢复数据库", Duration::from_millis(1500));
        assert!(matches!(err, AgentError::OperationFailed(_)));
        assert!(err.to_string().contains("1.5s"));
    }
}
