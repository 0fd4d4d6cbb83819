use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{Row, ToSql, params};
use std::path::Path;

use super::manager::ConnectionManager;
use super::models::{
    BackupRecord, DatabaseInfo, NewBackupRecord, NewDatabase, RecordPatch, TaskRecord,
};
use super::{BackupRecordStore, DatabaseRepo, TaskRepo};
use crate::task::TaskStatus;
use crate::{AgentError, Result};

const BACKUP_RECORD_COLUMNS: &str = "id, db_type, name, detail_name, source_account_ids, \
     download_account_id, file_dir, file_name, task_id, status, description, message, \
     created_at, updated_at";

const TASK_COLUMNS: &str = "id, name, task_type, scope, status, error_message, correlation_id, \
     resource_id, created_at, updated_at";

/// 基于 DuckDB 的记录存储
#[derive(Clone)]
pub struct DuckDbStore {
    manager: ConnectionManager,
}

/// 备份记录原始行，状态等枚举在行外解析
struct BackupRecordRow {
    id: i64,
    db_type: String,
    name: String,
    detail_name: String,
    source_account_ids: String,
    download_account_id: i64,
    file_dir: String,
    file_name: String,
    task_id: String,
    status: String,
    description: String,
    message: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

struct TaskRow {
    id: String,
    name: String,
    task_type: String,
    scope: String,
    status: String,
    error_message: Option<String>,
    correlation_id: Option<String>,
    resource_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BackupRecordRow {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            db_type: row.get(1)?,
            name: row.get(2)?,
            detail_name: row.get(3)?,
            source_account_ids: row.get(4)?,
            download_account_id: row.get(5)?,
            file_dir: row.get(6)?,
            file_name: row.get(7)?,
            task_id: row.get(8)?,
            status: row.get(9)?,
            description: row.get(10)?,
            message: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<BackupRecord> {
        Ok(BackupRecord {
            id: self.id,
            db_type: self.db_type,
            name: self.name,
            detail_name: self.detail_name,
            source_account_ids: self.source_account_ids,
            download_account_id: self.download_account_id,
            file_dir: self.file_dir,
            file_name: self.file_name,
            task_id: self.task_id,
            status: self.status.parse()?,
            description: self.description,
            message: self.message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            task_type: row.get(2)?,
            scope: row.get(3)?,
            status: row.get(4)?,
            error_message: row.get(5)?,
            correlation_id: row.get(6)?,
            resource_id: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord> {
        Ok(TaskRecord {
            id: self.id,
            name: self.name,
            task_type: self.task_type.parse()?,
            scope: self.scope.parse()?,
            status: self.status.parse()?,
            error_message: self.error_message,
            correlation_id: self.correlation_id,
            resource_id: self.resource_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl DuckDbStore {
    pub async fn connect<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let manager = ConnectionManager::new(db_path).await?;
        Ok(Self { manager })
    }

    /// 内存数据库（主要用于测试）
    pub async fn new_memory() -> Result<Self> {
        let manager = ConnectionManager::new_memory().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl BackupRecordStore for DuckDbStore {
    async fn create_record(&self, record: NewBackupRecord) -> Result<i64> {
        self.manager
            .write_with_retry(|conn| {
                conn.query_row(
                    "INSERT INTO backup_records (db_type, name, detail_name, source_account_ids, \
                     download_account_id, file_dir, file_name, task_id, status, description) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
                    params![
                        record.db_type,
                        record.name,
                        record.detail_name,
                        record.source_account_ids,
                        record.download_account_id,
                        record.file_dir,
                        record.file_name,
                        record.task_id,
                        record.status.as_str(),
                        record.description,
                    ],
                    |row| row.get(0),
                )
            })
            .await
    }

    async fn update_record_by_map(&self, id: i64, patch: RecordPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let assignments: Vec<String> = patch
            .fields()
            .iter()
            .map(|field| format!("{} = ?", field.column()))
            .collect();
        let sql = format!(
            "UPDATE backup_records SET {}, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            assignments.join(", ")
        );

        let updated = self
            .manager
            .write_with_retry(|conn| {
                let values: Vec<&str> = patch.fields().iter().map(|f| f.value()).collect();
                let mut bound: Vec<&dyn ToSql> =
                    values.iter().map(|v| v as &dyn ToSql).collect();
                bound.push(&id);
                conn.execute(&sql, bound.as_slice())
            })
            .await?;

        if updated == 0 {
            return Err(AgentError::not_found(format!("备份记录 {id}")));
        }
        Ok(())
    }

    async fn get_record(&self, id: i64) -> Result<Option<BackupRecord>> {
        let row = self
            .manager
            .read_with_retry(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {BACKUP_RECORD_COLUMNS} FROM backup_records WHERE id = ?"
                ))?;
                let mut rows = stmt.query(params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(BackupRecordRow::from_row(row)?)),
                    None => Ok(None),
                }
            })
            .await?;

        row.map(BackupRecordRow::into_record).transpose()
    }

    async fn list_records(
        &self,
        db_type: &str,
        name: &str,
        detail_name: &str,
    ) -> Result<Vec<BackupRecord>> {
        let rows = self
            .manager
            .read_with_retry(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {BACKUP_RECORD_COLUMNS} FROM backup_records \
                     WHERE db_type = ? AND name = ? AND detail_name = ? \
                     ORDER BY id DESC"
                ))?;
                let iter = stmt.query_map(params![db_type, name, detail_name], |row| {
                    BackupRecordRow::from_row(row)
                })?;
                iter.collect::<duckdb::Result<Vec<_>>>()
            })
            .await?;

        rows.into_iter().map(BackupRecordRow::into_record).collect()
    }
}

#[async_trait]
impl DatabaseRepo for DuckDbStore {
    async fn get_database(
        &self,
        db_type: &str,
        instance_name: &str,
        name: &str,
    ) -> Result<Option<DatabaseInfo>> {
        self.manager
            .read_with_retry(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, db_type, instance_name, name, username, created_at \
                     FROM managed_databases WHERE db_type = ? AND instance_name = ? AND name = ?",
                )?;
                let mut rows = stmt.query(params![db_type, instance_name, name])?;
                match rows.next()? {
                    Some(row) => Ok(Some(DatabaseInfo {
                        id: row.get(0)?,
                        db_type: row.get(1)?,
                        instance_name: row.get(2)?,
                        name: row.get(3)?,
                        username: row.get(4)?,
                        created_at: row.get(5)?,
                    })),
                    None => Ok(None),
                }
            })
            .await
    }

    async fn create_database(&self, database: NewDatabase) -> Result<i64> {
        self.manager
            .write_with_retry(|conn| {
                conn.query_row(
                    "INSERT INTO managed_databases (db_type, instance_name, name, username) \
                     VALUES (?, ?, ?, ?) RETURNING id",
                    params![
                        database.db_type,
                        database.instance_name,
                        database.name,
                        database.username,
                    ],
                    |row| row.get(0),
                )
            })
            .await
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>> {
        self.manager
            .read_with_retry(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, db_type, instance_name, name, username, created_at \
                     FROM managed_databases ORDER BY id",
                )?;
                let iter = stmt.query_map([], |row| {
                    Ok(DatabaseInfo {
                        id: row.get(0)?,
                        db_type: row.get(1)?,
                        instance_name: row.get(2)?,
                        name: row.get(3)?,
                        username: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?;
                iter.collect()
            })
            .await
    }
}

#[async_trait]
impl TaskRepo for DuckDbStore {
    async fn save_task(&self, record: &TaskRecord) -> Result<()> {
        self.manager
            .write_with_retry(|conn| {
                conn.execute(
                    "INSERT INTO tasks (id, name, task_type, scope, status, error_message, \
                     correlation_id, resource_id) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        record.id,
                        record.name,
                        record.task_type.as_str(),
                        record.scope.as_str(),
                        record.status.as_str(),
                        record.error_message,
                        record.correlation_id,
                        record.resource_id,
                    ],
                )
            })
            .await?;
        Ok(())
    }

    async fn update_task(&self, id: &str, status: TaskStatus, error: Option<&str>) -> Result<()> {
        let updated = self
            .manager
            .write_with_retry(|conn| {
                conn.execute(
                    "UPDATE tasks SET status = ?, error_message = ?, \
                     updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                    params![status.as_str(), error, id],
                )
            })
            .await?;

        if updated == 0 {
            return Err(AgentError::not_found(format!("任务 {id}")));
        }
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let row = self
            .manager
            .read_with_retry(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))?;
                let mut rows = stmt.query(params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(TaskRow::from_row(row)?)),
                    None => Ok(None),
                }
            })
            .await?;

        row.map(TaskRow::into_record).transpose()
    }

    async fn list_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        let limit = limit as i64;
        let rows = self
            .manager
            .read_with_retry(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC, id LIMIT ?"
                ))?;
                let iter = stmt.query_map(params![limit], |row| TaskRow::from_row(row))?;
                iter.collect::<duckdb::Result<Vec<_>>>()
            })
            .await?;

        rows.into_iter().map(TaskRow::into_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BackupStatus, RecordField};
    use crate::task::{TaskScope, TaskType};

    fn new_record(file_name: &str) -> NewBackupRecord {
        NewBackupRecord {
            db_type: "postgresql".to_string(),
            name: "local".to_string(),
            detail_name: "app_db".to_string(),
            source_account_ids: "1".to_string(),
            download_account_id: 1,
            file_dir: "database/postgresql/local/app_db".to_string(),
            file_name: file_name.to_string(),
            task_id: "task-1".to_string(),
            status: BackupStatus::Waiting,
            description: "手动备份".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_partially_update_record() {
        let store = DuckDbStore::new_memory().await.unwrap();

        let id = store.create_record(new_record("a.sql.gz")).await.unwrap();
        let record = store.get_record(id).await.unwrap().unwrap();
        assert_eq!(record.status, BackupStatus::Waiting);
        assert_eq!(record.message, "");

        store
            .update_record_by_map(
                id,
                RecordPatch::new()
                    .status(BackupStatus::Failed)
                    .message("pg_dump 退出码 1"),
            )
            .await
            .unwrap();

        let record = store.get_record(id).await.unwrap().unwrap();
        assert_eq!(record.status, BackupStatus::Failed);
        assert_eq!(record.message, "pg_dump 退出码 1");
        // 未提及的字段保持不变
        assert_eq!(record.file_name, "a.sql.gz");
        assert_eq!(record.description, "手动备份");
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let store = DuckDbStore::new_memory().await.unwrap();
        let result = store
            .update_record_by_map(42, RecordPatch::new().set(RecordField::FileName("x".into())))
            .await;
        assert!(matches!(result, Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_records_newest_first() {
        let store = DuckDbStore::new_memory().await.unwrap();
        let first = store.create_record(new_record("1.sql.gz")).await.unwrap();
        let second = store.create_record(new_record("2.sql.gz")).await.unwrap();
        assert_ne!(first, second);

        let records = store
            .list_records("postgresql", "local", "app_db")
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, second);

        let none = store
            .list_records("postgresql", "local", "other")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_database_lookup() {
        let store = DuckDbStore::new_memory().await.unwrap();
        let id = store
            .create_database(NewDatabase {
                db_type: "postgresql".to_string(),
                instance_name: "local".to_string(),
                name: "app_db".to_string(),
                username: "app".to_string(),
            })
            .await
            .unwrap();

        let found = store
            .get_database("postgresql", "local", "app_db")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.username, "app");
        assert!(
            store
                .get_database("postgresql", "local", "missing")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.list_databases().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_task_record_lifecycle() {
        let store = DuckDbStore::new_memory().await.unwrap();
        let now = Utc::now();
        let record = TaskRecord {
            id: "task-1".to_string(),
            name: "local - app_db".to_string(),
            task_type: TaskType::Recover,
            scope: TaskScope::Database,
            status: TaskStatus::Pending,
            error_message: None,
            correlation_id: Some("ui-123".to_string()),
            resource_id: Some(7),
            created_at: now,
            updated_at: now,
        };
        store.save_task(&record).await.unwrap();

        store
            .update_task("task-1", TaskStatus::Failed, Some("恢复失败"))
            .await
            .unwrap();

        let saved = store.get_task("task-1").await.unwrap().unwrap();
        assert_eq!(saved.status, TaskStatus::Failed);
        assert_eq!(saved.error_message.as_deref(), Some("恢复失败"));
        assert_eq!(saved.correlation_id.as_deref(), Some("ui-123"));
        assert_eq!(saved.task_type, TaskType::Recover);
        assert_eq!(saved.resource_id, Some(7));

        assert_eq!(store.list_tasks(10).await.unwrap().len(), 1);
        assert!(matches!(
            store.update_task("missing", TaskStatus::Running, None).await,
            Err(AgentError::NotFound(_))
        ));
    }
}
