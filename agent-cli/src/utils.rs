/// # 日志系统使用说明
///
/// 库代码只使用 `tracing` 宏，应用入口在 `main.rs` 中调用 `setup_logging()`。
/// 任务审计日志另外按任务ID写入 `dirs.task_log_dir` 下的独立文件。
///
/// ## 日志配置选项
///
/// - `-v, --verbose`：启用详细日志模式（DEBUG 级别）
/// - `RUST_LOG`：标准的 Rust 日志级别控制
/// - `AGENT_LOG_FILE`：日志文件路径，设置后日志输出到文件而非终端
///
/// ```bash
/// # 详细日志输出到终端
/// agent-cli -v backup app_db
///
/// # 日志输出到文件
/// AGENT_LOG_FILE=agent.log agent-cli backup app_db
///
/// # 只看任务引擎的调试日志
/// RUST_LOG=agent_core::task=debug agent-cli recover app_db --file app_db.sql.gz
/// ```
pub fn setup_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_file) = std::env::var("AGENT_LOG_FILE") {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
        {
            Ok(file) => {
                // 输出到文件 - 使用详细格式便于调试
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(file)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .init();
                return;
            }
            Err(e) => eprintln!("无法打开日志文件 {log_file}: {e}，改为输出到终端"),
        }
    }

    // 输出到终端 - 使用简洁格式
    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(false)
        .with_line_number(false)
        .without_time()
        .compact()
        .init();
}

/// 文件大小的可读格式
pub fn format_size(size: u64) -> String {
    if size > 1024 * 1024 * 1024 {
        format!("{:.1}GB", size as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if size > 1024 * 1024 {
        format!("{:.1}MB", size as f64 / (1024.0 * 1024.0))
    } else if size > 1024 {
        format!("{:.1}KB", size as f64 / 1024.0)
    } else {
        format!("{size}B")
    }
}
