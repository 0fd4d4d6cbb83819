use agent_core::{
    AgentError,
    constants::database::POSTGRESQL,
    error::Result,
    store::{DatabaseRepo, NewDatabase},
};
use tracing::info;

use crate::app::CliApp;

/// 登记受管数据库
pub async fn add_database(
    app: &CliApp,
    instance: String,
    name: String,
    username: String,
) -> Result<()> {
    if !app.config.postgresql.iter().any(|p| p.name == instance) {
        return Err(AgentError::not_found(format!(
            "配置文件中没有名为 {instance} 的 PostgreSQL 实例"
        )));
    }

    if app
        .store
        .get_database(POSTGRESQL, &instance, &name)
        .await?
        .is_some()
    {
        info!("数据库 {}/{} 已登记", instance, name);
        return Ok(());
    }

    let id = app
        .store
        .create_database(NewDatabase {
            db_type: POSTGRESQL.to_string(),
            instance_name: instance.clone(),
            name: name.clone(),
            username,
        })
        .await?;
    info!("已登记数据库 {}/{} (#{})", instance, name, id);
    Ok(())
}

/// 列出受管数据库
pub async fn list_databases(app: &CliApp) -> Result<()> {
    let databases = app.store.list_databases().await?;
    if databases.is_empty() {
        info!("暂无受管数据库，使用 'agent-cli database add <数据库名>' 登记");
        return Ok(());
    }

    info!(
        "{:<6} {:<12} {:<12} {:<24} {}",
        "ID", "类型", "实例", "数据库", "用户"
    );
    info!("{}", "-".repeat(72));
    for db in &databases {
        info!(
            "{:<6} {:<12} {:<12} {:<24} {}",
            db.id, db.db_type, db.instance_name, db.name, db.username
        );
    }
    Ok(())
}
