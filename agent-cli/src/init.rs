use agent_core::{config::AgentConfig, error::Result, store::DuckDbStore};
use std::path::Path;
use tracing::{info, warn};

/// 运行独立的初始化流程
pub async fn run_init(config_path: &Path, force: bool) -> Result<()> {
    info!("主机管理代理初始化");
    info!("====================");

    if !force && config_path.exists() {
        warn!("检测到已存在的配置文件: {}", config_path.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        return Ok(());
    }

    info!("步骤 1: 创建配置文件和目录结构");
    let config = AgentConfig::default();
    config.save_to_file(config_path)?;
    info!("   已创建配置文件: {}", config_path.display());

    for dir in [
        &config.dirs.local_backup_dir,
        &config.dirs.tmp_dir,
        &config.dirs.upload_dir,
        &config.dirs.task_log_dir,
    ] {
        tokio::fs::create_dir_all(dir).await?;
        info!("   - {}", dir);
    }

    info!("步骤 2: 初始化数据库");
    DuckDbStore::connect(&config.dirs.database_file).await?;
    info!("   已创建DuckDB数据库: {}", config.dirs.database_file);

    info!("初始化完成，请在配置文件中填写 PostgreSQL 连接信息，");
    info!("然后使用 'agent-cli database add <数据库名>' 登记需要备份的数据库");
    Ok(())
}
