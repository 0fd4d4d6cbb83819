use crate::project_info::metadata;
use agent_core::constants::{config, database};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 受管数据库相关命令
#[derive(Subcommand, Debug)]
pub enum DatabaseCommand {
    /// 登记一个受管数据库
    Add {
        /// 实例名，对应配置文件中的 [[postgresql]] name
        #[arg(long, default_value = "local")]
        instance: String,
        /// 数据库名
        name: String,
        /// 恢复时使用的数据库用户（可选）
        #[arg(long, default_value = "")]
        username: String,
    },
    /// 列出受管数据库
    List,
}

/// Panel Agent CLI - 数据库备份恢复工具
#[derive(Parser)]
#[command(name = "agent-cli")]
#[command(about = metadata::PROJECT_DESCRIPTION)]
#[command(version = metadata::CLI_VERSION)]
#[command(long_about = metadata::display::DESCRIPTION_LONG)]
#[command(author = metadata::PROJECT_AUTHORS)]
pub struct Cli {
    /// 配置文件路径（默认按 agent.toml、.agent.toml 顺序查找）
    #[arg(short, long, env = "AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// 实际使用的配置文件路径
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 首次使用时创建配置文件、目录和数据库
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 备份数据库
    Backup {
        /// 数据库名
        database: String,
        #[arg(long, default_value = "local")]
        instance: String,
        #[arg(long, default_value = database::POSTGRESQL)]
        db_type: String,
        /// 备份说明
        #[arg(long, default_value = "")]
        description: String,
        /// 外部关联的任务ID
        #[arg(long)]
        task_id: Option<String>,
    },
    /// 从备份文件恢复数据库（恢复前自动快照，失败时回滚）
    Recover {
        /// 数据库名
        database: String,
        /// 备份文件路径（.sql 或 .sql.gz）
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "local")]
        instance: String,
        #[arg(long, default_value = database::POSTGRESQL)]
        db_type: String,
        #[arg(long)]
        task_id: Option<String>,
    },
    /// 把上传的文件（.sql / .sql.gz / .tar.gz）放入上传目录后恢复
    RecoverUpload {
        /// 数据库名
        database: String,
        /// 上传文件路径
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "local")]
        instance: String,
        #[arg(long, default_value = database::POSTGRESQL)]
        db_type: String,
        #[arg(long)]
        task_id: Option<String>,
    },
    /// 列出数据库的备份记录
    Records {
        /// 数据库名
        database: String,
        #[arg(long, default_value = "local")]
        instance: String,
        #[arg(long, default_value = database::POSTGRESQL)]
        db_type: String,
        /// 以 JSON 格式输出
        #[arg(long)]
        json: bool,
    },
    /// 列出最近的任务
    Tasks {
        /// 显示条数
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// 受管数据库管理
    #[command(subcommand)]
    Database(DatabaseCommand),
}
