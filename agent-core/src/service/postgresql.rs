use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::upload::stage_upload;
use super::{
    BackupReceipt, BackupSettings, CommonBackup, CommonRecover, ExecutionMode, RecoverReceipt,
    UploadRecover, artifact_file_name,
};
use crate::client::{BackupInfo, ClientLease, SharedClientFactory};
use crate::constants::backup;
use crate::recovery::{RecoverMode, RecoverTarget, recover_with_safety};
use crate::store::{
    BackupRecordStore, BackupStatus, DatabaseInfo, DatabaseRepo, NewBackupRecord, RecordPatch,
};
use crate::task::{ResourceLocks, Task, TaskMeta, TaskRunner, TaskScope, TaskType, operation};
use crate::{AgentError, Result};

/// PostgreSQL 备份/恢复编排
///
/// 所有依赖通过构造函数注入，测试时可替换为内存实现。
#[derive(Clone)]
pub struct PostgresqlBackupService {
    clients: SharedClientFactory,
    records: Arc<dyn BackupRecordStore>,
    databases: Arc<dyn DatabaseRepo>,
    runner: TaskRunner,
    settings: BackupSettings,
}

impl PostgresqlBackupService {
    pub fn new(
        clients: SharedClientFactory,
        records: Arc<dyn BackupRecordStore>,
        databases: Arc<dyn DatabaseRepo>,
        runner: TaskRunner,
        settings: BackupSettings,
    ) -> Self {
        Self {
            clients,
            records,
            databases,
            runner,
            settings,
        }
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    async fn lookup(&self, db_type: &str, name: &str, detail_name: &str) -> Result<DatabaseInfo> {
        self.databases
            .get_database(db_type, name, detail_name)
            .await?
            .ok_or_else(|| {
                AgentError::not_found(format!("数据库 {db_type}/{name}/{detail_name}"))
            })
    }

    fn build_task(&self, meta: TaskMeta, mode: ExecutionMode<'_>) -> Task {
        match mode {
            ExecutionMode::Detached => self.runner.new_task(meta),
            ExecutionMode::Embedded(parent) => Task::child_of(parent, meta),
        }
    }

    /// 备份数据库
    ///
    /// 后台执行时只返回派发阶段的错误，备份结果写入备份记录；
    /// 嵌入执行时返回真实结果。
    pub async fn backup(
        &self,
        req: CommonBackup,
        mode: ExecutionMode<'_>,
    ) -> Result<BackupReceipt> {
        let database = self
            .lookup(&req.db_type, &req.name, &req.detail_name)
            .await?;

        let item_dir = backup::item_dir(&req.db_type, &req.name, &req.detail_name);
        let target_dir = self.settings.local_backup_dir.join(&item_dir);
        let file_name = artifact_file_name(&req.detail_name, Utc::now());

        let meta = TaskMeta::new(
            format!("{} - {}", req.name, req.detail_name),
            TaskType::Backup,
            TaskScope::Database,
        )
        .with_correlation_id(req.task_id.clone())
        .with_resource_id(database.id);
        let mut task = self.build_task(meta, mode);
        let task_id = task.id().to_string();

        let record_id = self
            .records
            .create_record(NewBackupRecord {
                db_type: req.db_type.clone(),
                name: req.name.clone(),
                detail_name: req.detail_name.clone(),
                source_account_ids: backup::LOCAL_SOURCE_ACCOUNT_IDS.to_string(),
                download_account_id: backup::LOCAL_DOWNLOAD_ACCOUNT_ID,
                file_dir: item_dir.clone(),
                file_name: file_name.clone(),
                task_id: task_id.clone(),
                status: BackupStatus::Waiting,
                description: req.description.clone(),
            })
            .await
            .map_err(|e| AgentError::dispatch(format!("创建备份记录失败: {e}")))?;

        let info = BackupInfo {
            name: req.detail_name.clone(),
            target_dir,
            file_name: file_name.clone(),
            timeout: self.settings.backup_timeout,
        };
        let sub_task_name = task.meta().sub_task_name();
        let clients = self.clients.clone();
        let instance = req.name.clone();
        let partial = info.target_path();
        task.add_sub_task_with_ops(
            sub_task_name,
            operation(move |ctx| {
                let clients = clients.clone();
                let instance = instance.clone();
                let info = info.clone();
                async move {
                    let client = ClientLease::acquire(clients.as_ref(), &instance).await?;
                    ctx.log(format!(
                        "备份数据库 {} 到 {}",
                        info.name,
                        info.target_path().display()
                    ));
                    client.backup(&info).await
                }
            }),
            Some(operation(move |_ctx| {
                let partial = partial.clone();
                async move { remove_if_exists(&partial).await }
            })),
            self.settings.retry,
        );

        let mut receipt = BackupReceipt {
            record_id,
            task_id,
            file_dir: item_dir,
            file_name,
            handle: None,
        };

        match mode {
            ExecutionMode::Detached => {
                let records = self.records.clone();
                let lock_key = ResourceLocks::key(&req.db_type, &req.name, &req.detail_name);
                let dispatched = self
                    .runner
                    .dispatch(task, Some(lock_key), move |result| async move {
                        finish_record(records.as_ref(), record_id, &result).await;
                    })
                    .await;

                match dispatched {
                    Ok(handle) => receipt.handle = Some(handle),
                    Err(e) => {
                        finish_record(self.records.as_ref(), record_id, &Err(e.to_string()))
                            .await;
                        return Err(e);
                    }
                }
            }
            ExecutionMode::Embedded(_) => {
                let result = task.execute().await;
                let summary = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
                finish_record(self.records.as_ref(), record_id, &summary).await;
                result?;
            }
        }

        Ok(receipt)
    }

    /// 恢复数据库
    ///
    /// 源文件不存在时同步返回 `FileNotFound`，不创建快照。
    pub async fn recover(
        &self,
        req: CommonRecover,
        mode: ExecutionMode<'_>,
    ) -> Result<RecoverReceipt> {
        self.recover_as(req, mode, TaskType::Recover).await
    }

    async fn recover_as(
        &self,
        req: CommonRecover,
        mode: ExecutionMode<'_>,
        task_type: TaskType,
    ) -> Result<RecoverReceipt> {
        let database = self
            .lookup(&req.db_type, &req.name, &req.detail_name)
            .await?;

        if !tokio::fs::try_exists(&req.file).await.unwrap_or(false) {
            return Err(AgentError::file_not_found(req.file.display().to_string()));
        }

        let meta = TaskMeta::new(req.name.clone(), task_type, TaskScope::Database)
            .with_correlation_id(req.task_id.clone())
            .with_resource_id(database.id);
        let mut task = self.build_task(meta, mode);
        let task_id = task.id().to_string();

        let target = RecoverTarget {
            db_type: req.db_type.clone(),
            detail_name: req.detail_name.clone(),
            username: (!database.username.is_empty()).then(|| database.username.clone()),
        };
        let sub_task_name = format!(
            "{}{} {} - {}",
            TaskType::Recover.display_name(),
            TaskScope::Database.display_name(),
            req.name,
            req.detail_name
        );
        let clients = self.clients.clone();
        let instance = req.name.clone();
        let settings = self.settings.recovery.clone();
        // 子任务超时不能早于协议内部的超时，否则回滚会随尝试一起被取消
        let retry = self
            .settings
            .retry
            .with_min_timeout(settings.attempt_budget());
        let source = req.file.clone();
        let recover_mode = req.mode;
        task.add_sub_task_with_ops(
            sub_task_name,
            operation(move |ctx| {
                let clients = clients.clone();
                let instance = instance.clone();
                let settings = settings.clone();
                let target = target.clone();
                let source = source.clone();
                async move {
                    let client = ClientLease::acquire(clients.as_ref(), &instance).await?;
                    recover_with_safety(&*client, &settings, &target, &source, recover_mode, &ctx)
                        .await
                }
            }),
            None,
            retry,
        );

        match mode {
            ExecutionMode::Detached => {
                let lock_key = ResourceLocks::key(&req.db_type, &req.name, &req.detail_name);
                let detail_name = req.detail_name.clone();
                let handle = self
                    .runner
                    .dispatch(task, Some(lock_key), move |result| async move {
                        match result {
                            Ok(()) => info!("数据库 {} 恢复完成", detail_name),
                            Err(e) => warn!("数据库 {} 恢复失败: {}", detail_name, e),
                        }
                    })
                    .await?;
                Ok(RecoverReceipt {
                    task_id,
                    handle: Some(handle),
                })
            }
            ExecutionMode::Embedded(_) => {
                task.execute().await?;
                Ok(RecoverReceipt {
                    task_id,
                    handle: None,
                })
            }
        }
    }

    /// 保存上传文件后按普通恢复处理，总是在后台执行
    pub async fn recover_by_upload(&self, req: UploadRecover) -> Result<RecoverReceipt> {
        // 先确认目标存在，避免为不存在的数据库落盘上传文件
        self.lookup(&req.db_type, &req.name, &req.detail_name)
            .await?;

        let staging_dir = self.upload_dir(&req.db_type, &req.name, &req.detail_name);
        let file = stage_upload(&staging_dir, req.artifact).await?;

        let receipt = self
            .recover_as(
                CommonRecover {
                    db_type: req.db_type,
                    name: req.name,
                    detail_name: req.detail_name,
                    file,
                    task_id: req.task_id,
                    mode: RecoverMode::Primary,
                },
                ExecutionMode::Detached,
                TaskType::RecoverFromUpload,
            )
            .await?;
        info!("上传文件恢复任务已派发: {}", receipt.task_id);
        Ok(receipt)
    }

    /// 上传文件的暂存目录
    pub fn upload_dir(&self, db_type: &str, name: &str, detail_name: &str) -> PathBuf {
        self.settings
            .upload_dir
            .join(backup::item_dir(db_type, name, detail_name))
    }
}

async fn finish_record(
    records: &dyn BackupRecordStore,
    record_id: i64,
    result: &std::result::Result<(), impl std::fmt::Display>,
) {
    let patch = match result {
        Ok(()) => RecordPatch::new().status(BackupStatus::Success),
        Err(e) => RecordPatch::new()
            .status(BackupStatus::Failed)
            .message(e.to_string()),
    };
    if let Err(e) = records.update_record_by_map(record_id, patch).await {
        error!("更新备份记录 {} 失败: {}", record_id, e);
    }
}

async fn remove_if_exists(path: &std::path::Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!("已删除未完成的备份文件: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
