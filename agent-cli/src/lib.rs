// 私有模块声明
mod app;
mod cli;
mod commands;
mod init;
pub mod project_info;
mod utils;

pub use app::CliApp;
pub use cli::{Cli, Commands, DatabaseCommand};
pub use init::run_init;
pub use utils::setup_logging;
