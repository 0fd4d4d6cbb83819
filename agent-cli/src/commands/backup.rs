use agent_core::{
    AgentError,
    error::Result,
    recovery::RecoverMode,
    service::{CommonBackup, CommonRecover, ExecutionMode, UploadArtifact, UploadRecover},
    store::{BackupRecordStore, BackupStatus},
    task::{TaskHandle, TaskOutcome},
};
use std::path::PathBuf;
use tracing::{error, info, warn};

use super::Target;
use crate::app::CliApp;
use crate::utils::format_size;

/// 备份数据库
pub async fn run_backup(
    app: &CliApp,
    target: Target,
    description: String,
    task_id: Option<String>,
) -> Result<()> {
    info!("备份数据库 {}", target);

    let receipt = app
        .service
        .backup(
            CommonBackup {
                db_type: target.db_type.clone(),
                name: target.instance.clone(),
                detail_name: target.database.clone(),
                task_id,
                description,
            },
            ExecutionMode::Detached,
        )
        .await?;

    info!("   备份记录: #{}", receipt.record_id);
    info!("   任务ID: {}", receipt.task_id);
    info!(
        "   任务日志: {}",
        app.task_log.log_path(&receipt.task_id).display()
    );

    let Some(handle) = receipt.handle else {
        return Ok(());
    };

    wait_for(handle).await?;
    let record = app
        .store
        .get_record(receipt.record_id)
        .await?
        .ok_or_else(|| AgentError::not_found(format!("备份记录 #{}", receipt.record_id)))?;

    match record.status {
        BackupStatus::Success => {
            let path = PathBuf::from(&app.config.dirs.local_backup_dir)
                .join(&record.file_dir)
                .join(&record.file_name);
            let size = tokio::fs::metadata(&path)
                .await
                .map(|m| format_size(m.len()))
                .unwrap_or_else(|_| "未知".to_string());
            info!("备份完成: {} ({})", path.display(), size);
            Ok(())
        }
        BackupStatus::Failed => {
            error!("备份失败: {}", record.message);
            Err(AgentError::operation(record.message))
        }
        BackupStatus::Waiting => {
            warn!("任务已结束但备份记录仍为 Waiting，请检查任务日志");
            Ok(())
        }
    }
}

/// 从备份文件恢复数据库
pub async fn run_recover(
    app: &CliApp,
    target: Target,
    file: PathBuf,
    task_id: Option<String>,
) -> Result<()> {
    info!("从 {} 恢复数据库 {}", file.display(), target);
    warn!("恢复会覆盖数据库当前数据，恢复前会自动创建快照，失败时自动回滚");

    let receipt = app
        .service
        .recover(
            CommonRecover {
                db_type: target.db_type,
                name: target.instance,
                detail_name: target.database,
                file,
                task_id,
                mode: RecoverMode::Primary,
            },
            ExecutionMode::Detached,
        )
        .await?;

    report_recover(app, &receipt.task_id, receipt.handle).await
}

/// 保存上传文件后恢复
pub async fn run_recover_upload(
    app: &CliApp,
    target: Target,
    file: PathBuf,
    task_id: Option<String>,
) -> Result<()> {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| AgentError::file_not_found(file.display().to_string()))?;
    let content = tokio::fs::read(&file).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AgentError::file_not_found(file.display().to_string()),
        _ => AgentError::Io(e),
    })?;
    info!("上传 {} 并恢复数据库 {}", file_name, target);

    let receipt = app
        .service
        .recover_by_upload(UploadRecover {
            db_type: target.db_type,
            name: target.instance,
            detail_name: target.database,
            artifact: UploadArtifact::Bytes { file_name, content },
            task_id,
        })
        .await?;

    report_recover(app, &receipt.task_id, receipt.handle).await
}

async fn report_recover(
    app: &CliApp,
    task_id: &str,
    handle: Option<TaskHandle>,
) -> Result<()> {
    info!("   任务ID: {}", task_id);
    info!("   任务日志: {}", app.task_log.log_path(task_id).display());

    // 命令行进程退出会中断后台任务，这里等待任务结束
    let Some(handle) = handle else {
        return Ok(());
    };

    let outcome = wait_for(handle).await?;
    if outcome.is_success() {
        info!("恢复完成");
        Ok(())
    } else {
        let message = outcome.error.unwrap_or_else(|| "未知错误".to_string());
        error!("恢复失败: {}", message);
        info!("快照回滚结果见任务日志");
        Err(AgentError::operation(message))
    }
}

async fn wait_for(handle: TaskHandle) -> Result<TaskOutcome> {
    info!("等待任务完成...");
    let outcome = handle.wait().await?;
    info!("任务 {} 已结束，状态: {}", outcome.task_id, outcome.status);
    Ok(outcome)
}
