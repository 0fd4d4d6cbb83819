/// 任务引擎默认值
pub mod task {
    use std::time::Duration;

    /// 子任务默认最大重试次数
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// 子任务单次尝试的默认超时（1小时）
    pub const DEFAULT_SUB_TASK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

    /// 任务日志目录名
    pub const TASK_LOG_DIR_NAME: &str = "task";
}

/// 备份/恢复相关常量
pub mod backup {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    /// 数据库客户端单次备份/恢复调用的超时
    pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(300);

    /// 恢复前快照的超时
    pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(300);

    /// 备份文件名中的时间格式，例如 20250705082538
    pub const DATE_TIME_SLIM_LAYOUT: &str = "%Y%m%d%H%M%S";

    /// 备份文件随机后缀长度
    pub const RANDOM_SUFFIX_LEN: usize = 5;

    /// PostgreSQL 备份文件扩展名
    pub const SQL_GZ_EXTENSION: &str = ".sql.gz";

    /// 备份记录中固定的存储账号
    pub const LOCAL_SOURCE_ACCOUNT_IDS: &str = "1";
    pub const LOCAL_DOWNLOAD_ACCOUNT_ID: i64 = 1;

    /// 数据目录名
    pub const DATA_DIR_NAME: &str = "data";

    pub fn get_default_data_dir() -> PathBuf {
        Path::new(".").join(DATA_DIR_NAME)
    }

    pub fn get_default_storage_dir() -> PathBuf {
        get_default_data_dir().join("backup")
    }

    pub fn get_default_tmp_dir() -> PathBuf {
        get_default_data_dir().join("tmp")
    }

    pub fn get_default_upload_dir() -> PathBuf {
        get_default_data_dir().join("uploads")
    }

    /// 备份文件的相对目录：database/{type}/{name}/{detail_name}
    pub fn item_dir(db_type: &str, name: &str, detail_name: &str) -> String {
        format!("database/{db_type}/{name}/{detail_name}")
    }
}

/// 配置文件相关常量
pub mod config {
    use std::path::PathBuf;

    /// 按优先级查找的配置文件名
    pub const CONFIG_FILE_NAMES: [&str; 2] = ["agent.toml", ".agent.toml"];

    /// 默认生成的配置文件名
    pub const DEFAULT_CONFIG_FILE: &str = "agent.toml";

    pub fn get_default_database_file() -> PathBuf {
        super::backup::get_default_data_dir()
            .join("db")
            .join("agent.db")
    }

    pub fn get_default_task_log_dir() -> PathBuf {
        super::backup::get_default_data_dir()
            .join("log")
            .join(super::task::TASK_LOG_DIR_NAME)
    }
}

/// 数据库类型
pub mod database {
    pub const POSTGRESQL: &str = "postgresql";

    /// PostgreSQL 默认端口
    pub const POSTGRESQL_DEFAULT_PORT: u16 = 5432;
}
