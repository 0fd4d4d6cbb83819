// 备份/恢复编排
//
// 编排层把数据库客户端能力、恢复安全协议和任务引擎组合成
// 备份、恢复、上传恢复三个入口，并维护备份记录的生命周期。

mod postgresql;
mod upload;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::backup;
use crate::recovery::{RecoverMode, RecoverySettings};
use crate::task::{RetryPolicy, TaskContext, TaskHandle};

pub use postgresql::PostgresqlBackupService;
pub use upload::{UploadArtifact, stage_upload};

/// 备份请求
#[derive(Debug, Clone, PartialEq)]
pub struct CommonBackup {
    pub db_type: String,
    /// 实例名
    pub name: String,
    /// 数据库名
    pub detail_name: String,
    /// 外部关联的任务ID
    pub task_id: Option<String>,
    pub description: String,
}

/// 恢复请求
#[derive(Debug, Clone, PartialEq)]
pub struct CommonRecover {
    pub db_type: String,
    pub name: String,
    pub detail_name: String,
    /// 恢复源文件
    pub file: PathBuf,
    pub task_id: Option<String>,
    pub mode: RecoverMode,
}

/// 上传恢复请求
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecover {
    pub db_type: String,
    pub name: String,
    pub detail_name: String,
    pub artifact: UploadArtifact,
    pub task_id: Option<String>,
}

/// 执行方式
///
/// `Detached` 在后台派发并立即返回；`Embedded` 在父任务的执行路径上直接运行，
/// 返回真实结果。
#[derive(Clone, Copy)]
pub enum ExecutionMode<'a> {
    Detached,
    Embedded(&'a TaskContext),
}

/// 编排层参数
#[derive(Debug, Clone, PartialEq)]
pub struct BackupSettings {
    pub local_backup_dir: PathBuf,
    pub upload_dir: PathBuf,
    /// 单次客户端备份调用的超时
    pub backup_timeout: Duration,
    pub retry: RetryPolicy,
    pub recovery: RecoverySettings,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            local_backup_dir: backup::get_default_storage_dir(),
            upload_dir: backup::get_default_upload_dir(),
            backup_timeout: backup::CLIENT_TIMEOUT,
            retry: RetryPolicy::default(),
            recovery: RecoverySettings::default(),
        }
    }
}

/// 备份派发结果
#[derive(Debug)]
pub struct BackupReceipt {
    pub record_id: i64,
    pub task_id: String,
    /// 相对于本地备份目录
    pub file_dir: String,
    pub file_name: String,
    /// 嵌入执行时为 None
    pub handle: Option<TaskHandle>,
}

/// 恢复派发结果
#[derive(Debug)]
pub struct RecoverReceipt {
    pub task_id: String,
    pub handle: Option<TaskHandle>,
}

/// 字母数字随机串，仅用于避免文件名冲突
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// 备份文件名：{detail_name}_{yyyyMMddHHmmss}{随机后缀}.sql.gz
pub fn artifact_file_name(detail_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}{}{}",
        detail_name,
        now.format(backup::DATE_TIME_SLIM_LAYOUT),
        random_suffix(backup::RANDOM_SUFFIX_LEN),
        backup::SQL_GZ_EXTENSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_file_name_layout() {
        let now = DateTime::parse_from_rfc3339("2025-07-05T08:25:38Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = artifact_file_name("app_db", now);

        assert!(name.starts_with("app_db_20250705082538"));
        assert!(name.ends_with(".sql.gz"));
        let suffix = &name["app_db_20250705082538".len()..name.len() - ".sql.gz".len()];
        assert_eq!(suffix.len(), 5);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_same_second_names_differ() {
        let now = Utc::now();
        let names: std::collections::HashSet<_> =
            (0..20).map(|_| artifact_file_name("app_db", now)).collect();
        assert_eq!(names.len(), 20);
    }
}
