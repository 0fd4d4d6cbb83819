use crate::constants::{backup, config, database, task};
use crate::error::{AgentError, Result};
use crate::recovery::RecoverySettings;
use crate::service::BackupSettings;
use crate::task::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 代理配置结构
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AgentConfig {
    pub dirs: DirsConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub postgresql: Vec<PostgresqlInstance>,
}

/// 目录配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DirsConfig {
    pub local_backup_dir: String,
    pub tmp_dir: String,
    pub upload_dir: String,
    pub task_log_dir: String,
    pub database_file: String,
}

/// 任务重试配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TaskConfig {
    pub max_retries: u32,
    pub sub_task_timeout_secs: u64,
    pub retry_delay_ms: u64,
}

/// 备份恢复超时配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    pub snapshot_timeout_secs: u64,
    pub restore_timeout_secs: u64,
    pub backup_timeout_secs: u64,
}

/// PostgreSQL 实例连接信息
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PostgresqlInstance {
    pub name: String,
    pub host: String,
    #[serde(default = "default_postgresql_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_postgresql_port() -> u16 {
    database::POSTGRESQL_DEFAULT_PORT
}

fn path_string(path: PathBuf) -> String {
    path.to_string_lossy().to_string()
}

impl Default for DirsConfig {
    fn default() -> Self {
        Self {
            local_backup_dir: path_string(backup::get_default_storage_dir()),
            tmp_dir: path_string(backup::get_default_tmp_dir()),
            upload_dir: path_string(backup::get_default_upload_dir()),
            task_log_dir: path_string(config::get_default_task_log_dir()),
            database_file: path_string(config::get_default_database_file()),
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_retries: task::DEFAULT_MAX_RETRIES,
            sub_task_timeout_secs: task::DEFAULT_SUB_TASK_TIMEOUT.as_secs(),
            retry_delay_ms: 0,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            snapshot_timeout_secs: backup::SNAPSHOT_TIMEOUT.as_secs(),
            restore_timeout_secs: backup::CLIENT_TIMEOUT.as_secs(),
            backup_timeout_secs: backup::CLIENT_TIMEOUT.as_secs(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            dirs: DirsConfig::default(),
            task: TaskConfig::default(),
            recovery: RecoveryConfig::default(),
            postgresql: vec![PostgresqlInstance {
                name: "local".to_string(),
                host: "127.0.0.1".to_string(),
                port: database::POSTGRESQL_DEFAULT_PORT,
                username: "postgres".to_string(),
                password: String::new(),
            }],
        }
    }
}

impl AgentConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：agent.toml -> .agent.toml，都不存在时返回 `ConfigNotFound`
    pub fn find_and_load_config() -> Result<Self> {
        for config_file in &config::CONFIG_FILE_NAMES {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        // 由 init 命令负责生成默认配置
        Err(AgentError::ConfigNotFound)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AgentError::ConfigNotFound,
            _ => AgentError::Io(e),
        })?;
        let config: AgentConfig = toml::from_str(&content)?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = format!(
            "# 主机管理代理配置文件\n# 修改后重新执行命令即可生效\n\n{}",
            toml::to_string_pretty(self)?
        );
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.task.max_retries,
            Duration::from_secs(self.task.sub_task_timeout_secs),
        )
        .with_retry_delay(Duration::from_millis(self.task.retry_delay_ms))
    }

    pub fn recovery_settings(&self) -> RecoverySettings {
        RecoverySettings {
            tmp_dir: PathBuf::from(&self.dirs.tmp_dir),
            snapshot_timeout: Duration::from_secs(self.recovery.snapshot_timeout_secs),
            restore_timeout: Duration::from_secs(self.recovery.restore_timeout_secs),
        }
    }

    /// 校验超时配置并生成服务参数
    ///
    /// 子任务超时必须覆盖快照加两次恢复（主恢复和回滚）的时间。
    pub fn backup_settings(&self) -> Result<BackupSettings> {
        let retry = self.retry_policy();
        let recovery = self.recovery_settings();
        let budget = recovery.attempt_budget();
        if retry.timeout < budget {
            return Err(AgentError::custom(format!(
                "配置错误: task.sub_task_timeout_secs ({}) 不能小于 snapshot_timeout_secs + 2 * restore_timeout_secs ({})",
                retry.timeout.as_secs(),
                budget.as_secs()
            )));
        }

        Ok(BackupSettings {
            local_backup_dir: PathBuf::from(&self.dirs.local_backup_dir),
            upload_dir: PathBuf::from(&self.dirs.upload_dir),
            backup_timeout: Duration::from_secs(self.recovery.backup_timeout_secs),
            retry,
            recovery,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("agent.toml");

        let config = AgentConfig::default();
        config.save_to_file(&path).unwrap();
        let loaded = AgentConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_config_not_found() {
        let dir = tempdir().unwrap();
        let result = AgentConfig::load_from_file(dir.path().join("agent.toml"));
        assert!(matches!(result, Err(AgentError::ConfigNotFound)));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let content = r#"
[dirs]
local_backup_dir = "/opt/agent/backup"
tmp_dir = "/opt/agent/tmp"
upload_dir = "/opt/agent/uploads"
task_log_dir = "/opt/agent/log/task"
database_file = "/opt/agent/db/agent.db"

[task]
max_retries = 1

[[postgresql]]
name = "local"
host = "10.0.0.2"
username = "postgres"
"#;
        let config: AgentConfig = toml::from_str(content).unwrap();

        assert_eq!(config.task.max_retries, 1);
        assert_eq!(config.task.sub_task_timeout_secs, 3600);
        assert_eq!(config.recovery.snapshot_timeout_secs, 300);
        assert_eq!(config.postgresql[0].port, 5432);
        assert_eq!(config.postgresql[0].password, "");

        let settings = config.backup_settings().unwrap();
        assert_eq!(settings.retry.max_retries, 1);
        assert_eq!(settings.recovery.tmp_dir, PathBuf::from("/opt/agent/tmp"));
        assert_eq!(settings.backup_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_sub_task_timeout_must_cover_recovery_protocol() {
        let mut config = AgentConfig::default();
        config.task.sub_task_timeout_secs = 600;
        config.recovery.snapshot_timeout_secs = 300;
        config.recovery.restore_timeout_secs = 300;

        let result = config.backup_settings();
        assert!(matches!(result, Err(AgentError::Custom(ref msg)) if msg.contains("900")));

        config.task.sub_task_timeout_secs = 900;
        let settings = config.backup_settings().unwrap();
        assert_eq!(settings.retry.timeout, settings.recovery.attempt_budget());
    }
}
