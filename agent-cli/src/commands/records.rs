use agent_core::{
    error::Result,
    store::{BackupRecordStore, TaskRepo},
};
use tracing::info;

use super::Target;
use crate::app::CliApp;

/// 列出备份记录
pub async fn run_list_records(app: &CliApp, target: Target, json: bool) -> Result<()> {
    let records = app
        .store
        .list_records(&target.db_type, &target.instance, &target.database)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        info!("数据库 {} 暂无备份记录", target);
        info!("使用以下命令创建备份:");
        info!("   agent-cli backup {}", target.database);
        return Ok(());
    }

    info!("备份记录 - {}", target);
    info!(
        "{:<6} {:<20} {:<8} {:<40} {}",
        "ID", "创建时间", "状态", "文件名", "信息"
    );
    info!("{}", "-".repeat(100));
    for record in &records {
        info!(
            "{:<6} {:<20} {:<8} {:<40} {}",
            record.id,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.status,
            record.file_name,
            record.message
        );
    }
    info!("共 {} 条记录", records.len());
    Ok(())
}

/// 列出最近的任务
pub async fn run_list_tasks(app: &CliApp, limit: usize, json: bool) -> Result<()> {
    let tasks = app.store.list_tasks(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        info!("暂无任务记录");
        return Ok(());
    }

    info!(
        "{:<36} {:<16} {:<10} {:<20} {}",
        "任务ID", "类型", "状态", "更新时间", "名称"
    );
    info!("{}", "-".repeat(100));
    for task in &tasks {
        info!(
            "{:<36} {:<16} {:<10} {:<20} {}",
            task.id,
            task.task_type.as_str(),
            task.status,
            task.updated_at.format("%Y-%m-%d %H:%M:%S"),
            task.name
        );
        if let Some(error) = &task.error_message {
            info!("    错误: {}", error);
        }
    }
    Ok(())
}
