use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::task::{TaskScope, TaskStatus, TaskType};
use crate::{AgentError, Result};

/// 备份记录状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackupStatus {
    Waiting,
    Success,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Waiting => "Waiting",
            BackupStatus::Success => "Success",
            BackupStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackupStatus::Waiting)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Waiting" => Ok(BackupStatus::Waiting),
            "Success" => Ok(BackupStatus::Success),
            "Failed" => Ok(BackupStatus::Failed),
            other => Err(AgentError::custom(format!("未知的备份状态: {other}"))),
        }
    }
}

/// 备份记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRecord {
    pub id: i64,
    pub db_type: String,
    pub name: String,
    pub detail_name: String,
    pub source_account_ids: String,
    pub download_account_id: i64,
    pub file_dir: String,
    pub file_name: String,
    pub task_id: String,
    pub status: BackupStatus,
    pub description: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建备份记录
#[derive(Debug, Clone, PartialEq)]
pub struct NewBackupRecord {
    pub db_type: String,
    pub name: String,
    pub detail_name: String,
    pub source_account_ids: String,
    pub download_account_id: i64,
    pub file_dir: String,
    pub file_name: String,
    pub task_id: String,
    pub status: BackupStatus,
    pub description: String,
}

/// 可按字段名部分更新的记录字段
#[derive(Debug, Clone, PartialEq)]
pub enum RecordField {
    Status(BackupStatus),
    Message(String),
    FileDir(String),
    FileName(String),
    Description(String),
}

impl RecordField {
    pub fn column(&self) -> &'static str {
        match self {
            RecordField::Status(_) => "status",
            RecordField::Message(_) => "message",
            RecordField::FileDir(_) => "file_dir",
            RecordField::FileName(_) => "file_name",
            RecordField::Description(_) => "description",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            RecordField::Status(status) => status.as_str(),
            RecordField::Message(v)
            | RecordField::FileDir(v)
            | RecordField::FileName(v)
            | RecordField::Description(v) => v,
        }
    }
}

/// 记录的部分更新
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    fields: Vec<RecordField>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: RecordField) -> Self {
        // 同一字段只保留最后一次赋值
        self.fields.retain(|f| f.column() != field.column());
        self.fields.push(field);
        self
    }

    pub fn status(self, status: BackupStatus) -> Self {
        self.set(RecordField::Status(status))
    }

    pub fn message(self, message: impl Into<String>) -> Self {
        self.set(RecordField::Message(message.into()))
    }

    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// 受管数据库
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseInfo {
    pub id: i64,
    pub db_type: String,
    /// 所属实例名
    pub instance_name: String,
    /// 数据库名
    pub name: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// 新建受管数据库
#[derive(Debug, Clone, PartialEq)]
pub struct NewDatabase {
    pub db_type: String,
    pub instance_name: String,
    pub name: String,
    pub username: String,
}

/// 任务执行记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub scope: TaskScope,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub correlation_id: Option<String>,
    pub resource_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
