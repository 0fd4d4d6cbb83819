use agent_cli::{Cli, CliApp, Commands, run_init, setup_logging};
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录
    setup_logging(cli.verbose);

    // `init` 命令是特例，它不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        if let Err(e) = run_init(&cli.config_path(), force).await {
            error!("初始化失败: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let app = match CliApp::new_with_config(cli.config.as_deref()).await {
        Ok(app) => app,
        Err(e) => {
            if CliApp::is_config_not_found(&e) {
                error!("配置文件 '{}' 未找到。", cli.config_path().display());
                error!("请先运行 'agent-cli init' 命令来创建配置文件。");
            } else {
                error!("应用初始化失败: {:#}", e);
            }
            std::process::exit(1);
        }
    };

    // 运行命令
    if let Err(e) = app.run_command(cli.command).await {
        error!("操作失败: {}", e);
        std::process::exit(1);
    }
}
