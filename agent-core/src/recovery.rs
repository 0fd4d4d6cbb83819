// 恢复安全协议
//
// 覆盖式恢复前先对目标库做一次完整快照；恢复失败时用快照回滚一次；
// 无论结果如何，快照文件都会在最后删除。

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::audit::AuditEvent;
use crate::client::{BackupInfo, DatabaseClient, RecoverInfo};
use crate::constants::backup;
use crate::service::random_suffix;
use crate::task::TaskContext;
use crate::{AgentError, Result};

/// 恢复请求的来源
///
/// 从快照回滚时使用 `RollbackAttempt`，不再为回滚本身创建快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoverMode {
    #[default]
    Primary,
    RollbackAttempt,
}

/// 恢复安全协议的参数
#[derive(Debug, Clone, PartialEq)]
pub struct RecoverySettings {
    /// 快照存放目录
    pub tmp_dir: PathBuf,
    pub snapshot_timeout: Duration,
    pub restore_timeout: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            tmp_dir: backup::get_default_tmp_dir(),
            snapshot_timeout: backup::SNAPSHOT_TIMEOUT,
            restore_timeout: backup::CLIENT_TIMEOUT,
        }
    }
}

impl RecoverySettings {
    /// 一次完整协议（快照、恢复、回滚）允许的最长时间
    pub fn attempt_budget(&self) -> Duration {
        self.snapshot_timeout + self.restore_timeout * 2
    }
}

/// 恢复目标
#[derive(Debug, Clone, PartialEq)]
pub struct RecoverTarget {
    pub db_type: String,
    /// 数据库名
    pub detail_name: String,
    pub username: Option<String>,
}

/// 恢复前快照
///
/// 正常路径上由 [`RecoverySnapshot::discard`] 删除；若执行被中途取消，
/// 在 drop 时同步删除。
#[derive(Debug)]
pub struct RecoverySnapshot {
    path: PathBuf,
    detail_name: String,
    taken_at: DateTime<Utc>,
    discarded: bool,
}

impl RecoverySnapshot {
    /// 快照路径：{tmp_dir}/database/{type}/{detail}_{时间}{随机后缀}.sql.gz
    pub fn path_for(tmp_dir: &Path, target: &RecoverTarget, taken_at: DateTime<Utc>) -> PathBuf {
        tmp_dir.join("database").join(&target.db_type).join(format!(
            "{}_{}{}{}",
            target.detail_name,
            taken_at.format(backup::DATE_TIME_SLIM_LAYOUT),
            random_suffix(backup::RANDOM_SUFFIX_LEN),
            backup::SQL_GZ_EXTENSION
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn detail_name(&self) -> &str {
        &self.detail_name
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// 删除快照文件
    pub async fn discard(mut self, ctx: &TaskContext) {
        self.discarded = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("删除恢复快照失败 {}: {}", self.path.display(), e),
        }
        ctx.emit(AuditEvent::SnapshotDiscarded {
            path: self.path.clone(),
        });
    }
}

impl Drop for RecoverySnapshot {
    fn drop(&mut self) {
        if !self.discarded {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// 带快照保护的恢复
///
/// 返回值始终是主恢复操作的结果；回滚是否成功只体现在审计日志中。
pub async fn recover_with_safety(
    client: &dyn DatabaseClient,
    settings: &RecoverySettings,
    target: &RecoverTarget,
    source: &Path,
    mode: RecoverMode,
    ctx: &TaskContext,
) -> Result<()> {
    if mode == RecoverMode::RollbackAttempt {
        return restore(client, settings, target, source).await;
    }
    ensure_exists(source).await?;

    let snapshot = take_snapshot(client, settings, target, ctx).await?;

    let result = restore(client, settings, target, source).await;
    match &result {
        Ok(()) => {
            info!("数据库 {} 从 {} 恢复成功", target.detail_name, source.display());
        }
        Err(e) => {
            warn!(
                "数据库 {} 从 {} 恢复失败，开始回滚: {}",
                target.detail_name,
                source.display(),
                e
            );
            // 回滚本身不再创建快照
            let rollback = restore(client, settings, target, snapshot.path()).await;

            match rollback {
                Ok(()) => ctx.emit(AuditEvent::SnapshotRestored {
                    detail_name: target.detail_name.clone(),
                    path: snapshot.path().to_path_buf(),
                }),
                Err(rollback_err) => {
                    let rollback_err = AgentError::rollback(rollback_err.to_string());
                    ctx.emit(AuditEvent::SnapshotRestoreFailed {
                        detail_name: target.detail_name.clone(),
                        path: snapshot.path().to_path_buf(),
                        error: rollback_err.to_string(),
                    });
                }
            }
        }
    }

    snapshot.discard(ctx).await;
    result
}

async fn take_snapshot(
    client: &dyn DatabaseClient,
    settings: &RecoverySettings,
    target: &RecoverTarget,
    ctx: &TaskContext,
) -> Result<RecoverySnapshot> {
    let taken_at = Utc::now();
    let snapshot = RecoverySnapshot {
        path: RecoverySnapshot::path_for(&settings.tmp_dir, target, taken_at),
        detail_name: target.detail_name.clone(),
        taken_at,
        discarded: false,
    };

    let target_dir = snapshot
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| settings.tmp_dir.clone());
    let file_name = snapshot
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let info = BackupInfo {
        name: target.detail_name.clone(),
        target_dir,
        file_name,
        timeout: settings.snapshot_timeout,
    };

    let outcome = match tokio::time::timeout(settings.snapshot_timeout, client.backup(&info)).await
    {
        Ok(result) => result,
        Err(_) => Err(AgentError::timeout("恢复前快照", settings.snapshot_timeout)),
    };

    // 快照失败时 snapshot 在此处被 drop，残留文件随之删除
    outcome.map_err(|e| {
        AgentError::operation(format!(
            "恢复前备份数据库 {} 失败: {e}",
            target.detail_name
        ))
    })?;

    ctx.emit(AuditEvent::SnapshotTaken {
        detail_name: target.detail_name.clone(),
        path: snapshot.path.clone(),
    });
    Ok(snapshot)
}

async fn ensure_exists(source: &Path) -> Result<()> {
    if tokio::fs::try_exists(source).await.unwrap_or(false) {
        Ok(())
    } else {
        Err(AgentError::file_not_found(source.display().to_string()))
    }
}

async fn restore(
    client: &dyn DatabaseClient,
    settings: &RecoverySettings,
    target: &RecoverTarget,
    source: &Path,
) -> Result<()> {
    ensure_exists(source).await?;
    let info = RecoverInfo {
        name: target.detail_name.clone(),
        source_file: source.to_path_buf(),
        username: target.username.clone(),
        timeout: settings.restore_timeout,
    };

    match tokio::time::timeout(settings.restore_timeout, client.recover(&info)).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::timeout("恢复数据库", settings.restore_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskEnv;
    use crate::testing::{FakeClientState, FakeDatabaseClient, MemoryAuditSink};
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _dir: TempDir,
        settings: RecoverySettings,
        source: PathBuf,
        state: Arc<FakeClientState>,
        audit: Arc<MemoryAuditSink>,
        ctx: TaskContext,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let source = dir.path().join("upload").join("app_db.sql.gz");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"-- dump").unwrap();

        let settings = RecoverySettings {
            tmp_dir: dir.path().join("tmp"),
            snapshot_timeout: Duration::from_secs(2),
            restore_timeout: Duration::from_secs(2),
        };
        let state = Arc::new(FakeClientState::default());
        let audit = Arc::new(MemoryAuditSink::default());
        let ctx = TaskContext::new(
            "recover-1".to_string(),
            "恢复".to_string(),
            TaskEnv::new(audit.clone(), None),
        );

        Fixture {
            _dir: dir,
            settings,
            source,
            state,
            audit,
            ctx,
        }
    }

    fn target() -> RecoverTarget {
        RecoverTarget {
            db_type: "postgresql".to_string(),
            detail_name: "app_db".to_string(),
            username: Some("app".to_string()),
        }
    }

    fn snapshot_files(tmp_dir: &Path) -> usize {
        walkdir::WalkDir::new(tmp_dir)
            .into_iter()
            .flatten()
            .filter(|e| e.path().is_file())
            .count()
    }

    #[tokio::test]
    async fn test_successful_recover_discards_snapshot() {
        let f = fixture();
        let client = FakeDatabaseClient::new(f.state.clone());

        recover_with_safety(&client, &f.settings, &target(), &f.source, RecoverMode::Primary, &f.ctx)
            .await
            .unwrap();

        assert_eq!(f.state.backup_calls(), 1);
        assert_eq!(f.state.recover_sources(), vec![f.source.clone()]);
        assert_eq!(snapshot_files(&f.settings.tmp_dir), 0);

        let events = f.audit.events_for("recover-1");
        assert!(matches!(events.first(), Some(AuditEvent::SnapshotTaken { .. })));
        assert!(matches!(events.last(), Some(AuditEvent::SnapshotDiscarded { .. })));
    }

    #[tokio::test]
    async fn test_failed_recover_rolls_back_once_and_reports_original_error() {
        let f = fixture();
        f.state.fail_primary_restores(u32::MAX);
        let client = FakeDatabaseClient::new(f.state.clone());

        let err = recover_with_safety(
            &client,
            &f.settings,
            &target(),
            &f.source,
            RecoverMode::Primary,
            &f.ctx,
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "操作执行失败: 导入 app_db.sql.gz 失败");
        let sources = f.state.recover_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0], f.source);
        assert!(sources[1].starts_with(&f.settings.tmp_dir));
        assert_eq!(snapshot_files(&f.settings.tmp_dir), 0);

        let events = f.audit.events_for("recover-1");
        assert!(events.iter().any(|e| matches!(e, AuditEvent::SnapshotRestored { .. })));
        assert!(matches!(events.last(), Some(AuditEvent::SnapshotDiscarded { .. })));
    }

    #[tokio::test]
    async fn test_rollback_failure_is_logged_not_reported() {
        let f = fixture();
        f.state.fail_primary_restores(u32::MAX);
        f.state.fail_snapshot_restores(true);
        let client = FakeDatabaseClient::new(f.state.clone());

        let err = recover_with_safety(
            &client,
            &f.settings,
            &target(),
            &f.source,
            RecoverMode::Primary,
            &f.ctx,
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "操作执行失败: 导入 app_db.sql.gz 失败");
        assert_eq!(f.state.recover_sources().len(), 2);
        assert_eq!(snapshot_files(&f.settings.tmp_dir), 0);

        let events = f.audit.events_for("recover-1");
        let failed = events
            .iter()
            .find(|e| matches!(e, AuditEvent::SnapshotRestoreFailed { .. }))
            .expect("rollback failure should be audited");
        assert!(failed.to_string().contains("回滚失败"));
        assert!(!events.iter().any(|e| matches!(e, AuditEvent::SnapshotRestored { .. })));
    }

    #[tokio::test]
    async fn test_snapshot_failure_aborts_before_restore() {
        let f = fixture();
        f.state.fail_backups(true);
        let client = FakeDatabaseClient::new(f.state.clone());

        let err = recover_with_safety(
            &client,
            &f.settings,
            &target(),
            &f.source,
            RecoverMode::Primary,
            &f.ctx,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("恢复前备份数据库 app_db 失败"));
        assert!(f.state.recover_sources().is_empty());
        assert_eq!(snapshot_files(&f.settings.tmp_dir), 0);
    }

    #[tokio::test]
    async fn test_rollback_attempt_takes_no_snapshot() {
        let f = fixture();
        f.state.fail_primary_restores(u32::MAX);
        let client = FakeDatabaseClient::new(f.state.clone());

        let result = recover_with_safety(
            &client,
            &f.settings,
            &target(),
            &f.source,
            RecoverMode::RollbackAttempt,
            &f.ctx,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(f.state.backup_calls(), 0);
        assert_eq!(f.state.recover_sources().len(), 1);
        assert!(f.audit.events_for("recover-1").is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_takes_no_snapshot() {
        let f = fixture();
        let client = FakeDatabaseClient::new(f.state.clone());
        let missing = f.source.with_file_name("missing.sql.gz");

        let result = recover_with_safety(
            &client,
            &f.settings,
            &target(),
            &missing,
            RecoverMode::Primary,
            &f.ctx,
        )
        .await;

        assert!(matches!(result, Err(AgentError::FileNotFound(_))));
        assert_eq!(f.state.backup_calls(), 0);
    }

    #[test]
    fn test_snapshot_path_layout() {
        let taken_at = DateTime::parse_from_rfc3339("2025-07-05T08:25:38Z")
            .unwrap()
            .with_timezone(&Utc);
        let path = RecoverySnapshot::path_for(Path::new("/opt/tmp"), &target(), taken_at);

        assert!(path.starts_with("/opt/tmp/database/postgresql"));
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("app_db_20250705082538"));
        assert!(file_name.ends_with(".sql.gz"));
        assert_eq!(file_name.len(), "app_db_20250705082538".len() + 5 + ".sql.gz".len());
    }
}
