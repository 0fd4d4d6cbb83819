use crate::Result;
use duckdb::{Connection, Result as DuckResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

const MAX_RETRIES: usize = 3;

/// DuckDB 连接管理器
///
/// - 文件数据库：每个操作创建新连接
/// - 内存数据库：使用单一连接+Mutex，确保数据一致性
/// - 写冲突时按退避时间重试
#[derive(Clone)]
pub struct ConnectionManager {
    config: Arc<ConnectionConfig>,
}

#[derive(Debug)]
struct ConnectionConfig {
    /// 数据库路径（None表示内存数据库）
    db_path: Option<PathBuf>,
    /// 内存数据库的共享连接
    memory_connection: Option<Arc<Mutex<Connection>>>,
}

impl ConnectionManager {
    /// 打开文件数据库
    pub async fn new<P: AsRef<std::path::Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let _test_conn = Connection::open(&db_path)?;
        debug!("数据库文件连接测试成功: {:?}", db_path);

        let manager = Self {
            config: Arc::new(ConnectionConfig {
                db_path: Some(db_path),
                memory_connection: None,
            }),
        };
        manager.initialize_schema().await?;

        Ok(manager)
    }

    /// 打开内存数据库（主要用于测试）
    pub async fn new_memory() -> Result<Self> {
        let connection = Arc::new(Mutex::new(Connection::open_in_memory()?));
        debug!("内存数据库连接创建成功");

        let manager = Self {
            config: Arc::new(ConnectionConfig {
                db_path: None,
                memory_connection: Some(connection),
            }),
        };
        manager.initialize_schema().await?;

        Ok(manager)
    }

    pub fn is_memory(&self) -> bool {
        self.config.memory_connection.is_some()
    }

    async fn create_connection(&self) -> Result<Connection> {
        if let Some(ref path) = self.config.db_path {
            Ok(Connection::open(path)?)
        } else if let Some(ref memory_conn) = self.config.memory_connection {
            let conn = memory_conn.lock().await;
            Ok(conn.try_clone()?)
        } else {
            Err(crate::AgentError::Custom("数据库配置无效".to_string()))
        }
    }

    /// 读操作
    pub async fn read_with_retry<F, R>(&self, operation: F) -> Result<R>
    where
        F: Fn(&Connection) -> DuckResult<R> + Send + Sync,
        R: Send,
    {
        let mut retry_count = 0;

        loop {
            let conn = self.create_connection().await?;

            match operation(&conn) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let error_msg = e.to_string();

                    if Self::is_retryable_error(&error_msg) && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        let delay = Duration::from_millis(100 * retry_count as u64);
                        warn!(
                            "读操作失败，{}ms后重试 ({}/{}): {}",
                            delay.as_millis(),
                            retry_count,
                            MAX_RETRIES,
                            error_msg
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    error!("读操作失败: {}", error_msg);
                    return Err(e.into());
                }
            }
        }
    }

    /// 串行写操作（避免write-write conflict）
    pub async fn write_with_retry<F, R>(&self, operation: F) -> Result<R>
    where
        F: Fn(&Connection) -> DuckResult<R> + Send + Sync,
        R: Send,
    {
        let mut retry_count = 0;

        loop {
            let outcome = if let Some(ref memory_conn) = self.config.memory_connection {
                let conn = memory_conn.lock().await;
                operation(&conn)
            } else {
                let conn = self.create_connection().await?;
                operation(&conn)
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let error_msg = e.to_string();

                    if Self::is_retryable_error(&error_msg) && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        let delay = Duration::from_millis(100 * (1 << retry_count));
                        warn!(
                            "写操作冲突，{}ms后重试 ({}/{}): {}",
                            delay.as_millis(),
                            retry_count,
                            MAX_RETRIES,
                            error_msg
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    error!("写操作失败: {}", error_msg);
                    return Err(e.into());
                }
            }
        }
    }

    /// 检查错误是否可重试
    fn is_retryable_error(error_msg: &str) -> bool {
        error_msg.contains("write-write conflict")
            || error_msg.contains("database is locked")
            || error_msg.contains("database is busy")
    }

    /// 初始化数据库表结构
    pub async fn initialize_schema(&self) -> Result<()> {
        debug!("正在初始化数据库表结构...");

        let schema_sql = include_str!("../../migrations/init_duckdb.sql");
        let statements = split_sql_statements(schema_sql);

        self.write_with_retry(|conn| {
            for statement in &statements {
                if let Err(e) = conn.execute(statement, []) {
                    error!("SQL语句执行失败: {}, 语句: {}", e, statement);
                    return Err(e);
                }
            }
            Ok(())
        })
        .await?;

        debug!("数据库表结构初始化完成");
        Ok(())
    }
}

/// 按分号切分 SQL，跳过只包含注释的片段
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;

    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                current.push(ch);
            }
            ';' if !in_string => {
                statements.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    statements.push(current);

    statements
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| {
            !s.is_empty()
                && !s
                    .lines()
                    .map(str::trim)
                    .all(|line| line.is_empty() || line.starts_with("--"))
        })
        .collect()
}
