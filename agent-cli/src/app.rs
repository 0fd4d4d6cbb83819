use agent_core::{
    AgentError,
    audit::{FanoutAuditSink, FileAuditSink, TracingAuditSink},
    client::PgCommandClientFactory,
    config::AgentConfig,
    error::Result,
    service::PostgresqlBackupService,
    store::{DuckDbStore, TaskRepo},
    task::{TaskEnv, TaskRunner},
};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::cli::{Commands, DatabaseCommand};
use crate::commands;

#[derive(Clone)]
pub struct CliApp {
    pub config: AgentConfig,
    pub store: DuckDbStore,
    pub task_log: FileAuditSink,
    pub service: PostgresqlBackupService,
}

impl CliApp {
    /// 按命令行参数加载配置并初始化
    ///
    /// 未指定配置文件时按默认文件名查找。
    pub async fn new_with_config(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => AgentConfig::load_from_file(path)
                .with_context(|| format!("加载配置文件 {} 失败", path.display()))?,
            None => AgentConfig::find_and_load_config().context("查找配置文件失败")?,
        };
        let database_file = config.dirs.database_file.clone();
        Self::from_config(config)
            .await
            .with_context(|| format!("打开数据库 {database_file} 失败"))
    }

    /// 错误链中是否包含配置文件缺失
    pub fn is_config_not_found(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<AgentError>(),
                Some(AgentError::ConfigNotFound)
            )
        })
    }

    pub async fn from_config(config: AgentConfig) -> Result<Self> {
        let store = DuckDbStore::connect(&config.dirs.database_file).await?;
        debug!("已打开数据库: {}", config.dirs.database_file);

        // 任务日志同时写入 tracing 和按任务ID划分的日志文件
        let task_log = FileAuditSink::new(&config.dirs.task_log_dir);
        let audit = FanoutAuditSink::default()
            .with(Arc::new(TracingAuditSink))
            .with(Arc::new(task_log.clone()));
        let runner = TaskRunner::new(TaskEnv::new(
            Arc::new(audit),
            Some(Arc::new(store.clone()) as Arc<dyn TaskRepo>),
        ));

        let service = PostgresqlBackupService::new(
            Arc::new(PgCommandClientFactory::new(config.postgresql.clone())),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            runner,
            config.backup_settings()?,
        );

        Ok(Self {
            config,
            store,
            task_log,
            service,
        })
    }

    /// 运行应用命令
    pub async fn run_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { .. } => Ok(()), // 已经在 main.rs 中处理
            Commands::Backup {
                database,
                instance,
                db_type,
                description,
                task_id,
            } => {
                commands::run_backup(
                    self,
                    commands::Target::new(db_type, instance, database),
                    description,
                    task_id,
                )
                .await
            }
            Commands::Recover {
                database,
                file,
                instance,
                db_type,
                task_id,
            } => {
                commands::run_recover(
                    self,
                    commands::Target::new(db_type, instance, database),
                    file,
                    task_id,
                )
                .await
            }
            Commands::RecoverUpload {
                database,
                file,
                instance,
                db_type,
                task_id,
            } => {
                commands::run_recover_upload(
                    self,
                    commands::Target::new(db_type, instance, database),
                    file,
                    task_id,
                )
                .await
            }
            Commands::Records {
                database,
                instance,
                db_type,
                json,
            } => {
                commands::run_list_records(
                    self,
                    commands::Target::new(db_type, instance, database),
                    json,
                )
                .await
            }
            Commands::Tasks { limit, json } => commands::run_list_tasks(self, limit, json).await,
            Commands::Database(cmd) => self.run_database_command(cmd).await,
        }
    }

    async fn run_database_command(&self, cmd: DatabaseCommand) -> Result<()> {
        match cmd {
            DatabaseCommand::Add {
                instance,
                name,
                username,
            } => commands::add_database(self, instance, name, username).await,
            DatabaseCommand::List => commands::list_databases(self).await,
        }
    }
}
