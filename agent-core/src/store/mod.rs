// 记录存储
//
// 编排层只依赖下面三个接口，默认实现基于 DuckDB。

mod duckdb_store;
mod manager;
mod models;

use async_trait::async_trait;

use crate::Result;
use crate::task::TaskStatus;

pub use duckdb_store::DuckDbStore;
pub use manager::ConnectionManager;
pub use models::{
    BackupRecord, BackupStatus, DatabaseInfo, NewBackupRecord, NewDatabase, RecordField,
    RecordPatch, TaskRecord,
};

/// 备份记录存储
#[async_trait]
pub trait BackupRecordStore: Send + Sync {
    async fn create_record(&self, record: NewBackupRecord) -> Result<i64>;

    /// 按字段名部分更新，记录不存在时返回 `NotFound`
    async fn update_record_by_map(&self, id: i64, patch: RecordPatch) -> Result<()>;

    async fn get_record(&self, id: i64) -> Result<Option<BackupRecord>>;

    async fn list_records(
        &self,
        db_type: &str,
        name: &str,
        detail_name: &str,
    ) -> Result<Vec<BackupRecord>>;
}

/// 受管数据库查询
#[async_trait]
pub trait DatabaseRepo: Send + Sync {
    /// 按数据库类型、实例名和数据库名查找
    async fn get_database(
        &self,
        db_type: &str,
        instance_name: &str,
        name: &str,
    ) -> Result<Option<DatabaseInfo>>;

    async fn create_database(&self, database: NewDatabase) -> Result<i64>;

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>>;
}

/// 任务执行记录存储
#[async_trait]
pub trait TaskRepo: Send + Sync {
    async fn save_task(&self, record: &TaskRecord) -> Result<()>;

    async fn update_task(&self, id: &str, status: TaskStatus, error: Option<&str>) -> Result<()>;

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>>;

    async fn list_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>>;
}
