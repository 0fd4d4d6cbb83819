// 数据库客户端能力
//
// 任务引擎只依赖 "备份出一个文件" 和 "从文件恢复" 两个能力，
// 具体数据库引擎由实现方负责。

mod postgresql;

use async_trait::async_trait;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::Result;

pub use postgresql::{PgCommandClient, PgCommandClientFactory};

/// 备份参数
#[derive(Debug, Clone, PartialEq)]
pub struct BackupInfo {
    /// 数据库名
    pub name: String,
    pub target_dir: PathBuf,
    pub file_name: String,
    pub timeout: Duration,
}

impl BackupInfo {
    pub fn target_path(&self) -> PathBuf {
        self.target_dir.join(&self.file_name)
    }
}

/// 恢复参数
#[derive(Debug, Clone, PartialEq)]
pub struct RecoverInfo {
    /// 数据库名
    pub name: String,
    pub source_file: PathBuf,
    /// 以该用户身份导入，None 时使用连接用户
    pub username: Option<String>,
    pub timeout: Duration,
}

/// 单个数据库实例的客户端
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn backup(&self, info: &BackupInfo) -> Result<()>;

    async fn recover(&self, info: &RecoverInfo) -> Result<()>;

    /// 释放连接，由 [`ClientLease`] 保证只调用一次
    fn close(&self);
}

/// 按实例名创建客户端
#[async_trait]
pub trait DatabaseClientFactory: Send + Sync {
    async fn connect(&self, instance: &str) -> Result<Box<dyn DatabaseClient>>;
}

pub type SharedClientFactory = Arc<dyn DatabaseClientFactory>;

/// 作用域内持有的客户端，离开作用域时关闭连接
///
/// 超时导致 future 被丢弃时同样会关闭。
pub struct ClientLease {
    instance: String,
    client: Box<dyn DatabaseClient>,
}

impl ClientLease {
    pub async fn acquire(factory: &dyn DatabaseClientFactory, instance: &str) -> Result<Self> {
        let client = factory.connect(instance).await?;
        debug!("已连接数据库实例: {}", instance);
        Ok(Self {
            instance: instance.to_string(),
            client,
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }
}

impl Deref for ClientLease {
    type Target = dyn DatabaseClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        self.client.close();
        debug!("已释放数据库实例连接: {}", self.instance);
    }
}
