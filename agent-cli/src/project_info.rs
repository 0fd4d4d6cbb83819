/// 项目元数据（从 Cargo.toml 同步）
pub mod metadata {
    pub const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");

    pub const PROJECT_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

    pub const PROJECT_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

    pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// 用户友好的显示信息
    pub mod display {
        pub const CLI_FULL_NAME: &str = "Panel Agent CLI";

        pub const DESCRIPTION_LONG: &str = "主机管理代理的命令行入口：按任务方式执行 PostgreSQL 数据库备份与恢复，恢复前自动创建快照并在失败时回滚";
    }
}
