// 任务审计日志
//
// 任务引擎在固定的生命周期节点（任务开始/结束、子任务开始/成功/失败、
// 快照创建/恢复/删除）调用审计接口。审计写入失败只记录警告，
// 不参与成功失败的判定。

use chrono::Utc;
use dashmap::DashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::task::TaskStatus;

/// 审计事件
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    TaskStarted {
        name: String,
    },
    TaskFinished {
        name: String,
        status: TaskStatus,
        error: Option<String>,
    },
    SubTaskStarted {
        name: String,
        max_retries: u32,
        timeout: Duration,
    },
    AttemptFailed {
        name: String,
        attempt: u32,
        error: String,
    },
    SubTaskSucceeded {
        name: String,
        attempt: u32,
    },
    SubTaskFailed {
        name: String,
        error: String,
    },
    SubTaskRollbackSucceeded {
        name: String,
    },
    SubTaskRollbackFailed {
        name: String,
        error: String,
    },
    SnapshotTaken {
        detail_name: String,
        path: PathBuf,
    },
    SnapshotRestored {
        detail_name: String,
        path: PathBuf,
    },
    SnapshotRestoreFailed {
        detail_name: String,
        path: PathBuf,
        error: String,
    },
    SnapshotDiscarded {
        path: PathBuf,
    },
    Line(String),
}

impl AuditEvent {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AuditEvent::AttemptFailed { .. }
                | AuditEvent::SubTaskFailed { .. }
                | AuditEvent::SubTaskRollbackFailed { .. }
                | AuditEvent::SnapshotRestoreFailed { .. }
                | AuditEvent::TaskFinished {
                    status: TaskStatus::Failed,
                    ..
                }
        )
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::TaskStarted { name } => write!(f, "开始执行任务 [{name}]"),
            AuditEvent::TaskFinished {
                name,
                status,
                error,
            } => match error {
                Some(err) => write!(f, "任务 [{name}] 结束，状态: {status}，错误: {err}"),
                None => write!(f, "任务 [{name}] 结束，状态: {status}"),
            },
            AuditEvent::SubTaskStarted {
                name,
                max_retries,
                timeout,
            } => write!(
                f,
                "开始执行子任务 [{name}]，最大重试 {max_retries} 次，超时 {}s",
                timeout.as_secs()
            ),
            AuditEvent::AttemptFailed {
                name,
                attempt,
                error,
            } => write!(f, "子任务 [{name}] 第 {attempt} 次执行失败: {error}"),
            AuditEvent::SubTaskSucceeded { name, attempt } => {
                write!(f, "子任务 [{name}] 第 {attempt} 次执行成功")
            }
            AuditEvent::SubTaskFailed { name, error } => {
                write!(f, "子任务 [{name}] 执行失败: {error}")
            }
            AuditEvent::SubTaskRollbackSucceeded { name } => {
                write!(f, "子任务 [{name}] 回滚成功")
            }
            AuditEvent::SubTaskRollbackFailed { name, error } => {
                write!(f, "子任务 [{name}] 回滚失败: {error}")
            }
            AuditEvent::SnapshotTaken { detail_name, path } => {
                write!(f, "已为 {detail_name} 创建恢复前快照: {}", path.display())
            }
            AuditEvent::SnapshotRestored { detail_name, path } => write!(
                f,
                "恢复失败，已从快照 {} 回滚 {detail_name}，回滚成功",
                path.display()
            ),
            AuditEvent::SnapshotRestoreFailed {
                detail_name,
                path,
                error,
            } => write!(
                f,
                "恢复失败，从快照 {} 回滚 {detail_name} 同样失败: {error}",
                path.display()
            ),
            AuditEvent::SnapshotDiscarded { path } => {
                write!(f, "已删除恢复快照: {}", path.display())
            }
            AuditEvent::Line(line) => f.write_str(line),
        }
    }
}

/// 审计日志接口
///
/// 实现方必须自行吞掉写入错误。
pub trait AuditSink: Send + Sync {
    fn record(&self, task_id: &str, event: &AuditEvent);
}

pub type SharedAuditSink = Arc<dyn AuditSink>;

/// 输出到 tracing 的审计日志
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, task_id: &str, event: &AuditEvent) {
        if event.is_failure() {
            error!(task_id, "{}", event);
        } else {
            info!(task_id, "{}", event);
        }
    }
}

/// 按任务ID写入独立日志文件
///
/// 每个任务的文件在第一条事件时打开，任务结束事件后关闭。
/// 每个事件直接 `write` 一行，不经过用户态缓冲，进程退出时不会丢失已记录的内容。
#[derive(Debug, Clone)]
pub struct FileAuditSink {
    log_dir: PathBuf,
    open_files: Arc<DashMap<String, Arc<Mutex<File>>>>,
}

impl FileAuditSink {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            open_files: Arc::new(DashMap::new()),
        }
    }

    pub fn log_path(&self, task_id: &str) -> PathBuf {
        self.log_dir.join(format!("{task_id}.log"))
    }

    /// 当前打开着的任务日志数
    pub fn open_count(&self) -> usize {
        self.open_files.len()
    }

    fn file_for(&self, task_id: &str) -> std::io::Result<Arc<Mutex<File>>> {
        if let Some(file) = self.open_files.get(task_id) {
            return Ok(file.clone());
        }

        std::fs::create_dir_all(&self.log_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(task_id))?;
        let file = self
            .open_files
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(file)))
            .clone();
        Ok(file)
    }

    fn append(&self, task_id: &str, line: &str) -> std::io::Result<()> {
        let file = self.file_for(task_id)?;
        let mut file = file
            .lock()
            .map_err(|_| std::io::Error::other("任务日志文件锁已损坏"))?;
        file.write_all(line.as_bytes())
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, task_id: &str, event: &AuditEvent) {
        let line = format!("{} {}\n", Utc::now().format("%Y/%m/%d %H:%M:%S"), event);

        if let Err(e) = self.append(task_id, &line) {
            warn!(
                "写入任务日志失败 {}: {}",
                self.log_path(task_id).display(),
                e
            );
        }

        if matches!(event, AuditEvent::TaskFinished { .. }) {
            self.open_files.remove(task_id);
        }
    }
}

/// 同时写入多个审计日志
#[derive(Clone, Default)]
pub struct FanoutAuditSink {
    sinks: Vec<SharedAuditSink>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<SharedAuditSink>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: SharedAuditSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, task_id: &str, event: &AuditEvent) {
        for sink in &self.sinks {
            sink.record(task_id, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryAuditSink;
    use tempfile::tempdir;

    #[test]
    fn test_event_display_distinguishes_rollback_outcome() {
        let ok = AuditEvent::SnapshotRestored {
            detail_name: "app_db".to_string(),
            path: PathBuf::from("/tmp/app_db.sql.gz"),
        };
        let failed = AuditEvent::SnapshotRestoreFailed {
            detail_name: "app_db".to_string(),
            path: PathBuf::from("/tmp/app_db.sql.gz"),
            error: "psql 退出码 2".to_string(),
        };

        assert!(ok.to_string().contains("回滚成功"));
        assert!(failed.to_string().contains("同样失败"));
        assert!(!ok.is_failure());
        assert!(failed.is_failure());
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let first = Arc::new(MemoryAuditSink::default());
        let second = Arc::new(MemoryAuditSink::default());
        let fanout = FanoutAuditSink::default()
            .with(first.clone())
            .with(second.clone());

        fanout.record("t1", &AuditEvent::Line("hello".to_string()));

        assert_eq!(first.events_for("t1").len(), 1);
        assert_eq!(second.events_for("t1").len(), 1);
    }

    #[test]
    fn test_file_sink_appends_per_task() {
        let dir = tempdir().unwrap();
        let sink = FileAuditSink::new(dir.path().join("task"));

        sink.record(
            "task-a",
            &AuditEvent::TaskStarted {
                name: "备份".to_string(),
            },
        );
        sink.record("task-a", &AuditEvent::Line("第二行".to_string()));
        sink.record("task-b", &AuditEvent::Line("其他任务".to_string()));

        let content = std::fs::read_to_string(sink.log_path("task-a")).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("开始执行任务 [备份]"));
        assert!(content.contains("第二行"));
        assert!(!content.contains("其他任务"));
    }

    #[test]
    fn test_file_sink_closes_log_when_task_finishes() {
        let dir = tempdir().unwrap();
        let sink = FileAuditSink::new(dir.path().join("task"));
        let shared = sink.clone();

        sink.record(
            "task-a",
            &AuditEvent::TaskStarted {
                name: "恢复".to_string(),
            },
        );
        shared.record("task-a", &AuditEvent::Line("快照已创建".to_string()));
        assert_eq!(sink.open_count(), 1);

        shared.record(
            "task-a",
            &AuditEvent::TaskFinished {
                name: "恢复".to_string(),
                status: TaskStatus::Success,
                error: None,
            },
        );
        assert_eq!(sink.open_count(), 0);

        // 结束后的事件重新打开文件继续追加
        sink.record("task-a", &AuditEvent::Line("补充".to_string()));
        let content = std::fs::read_to_string(sink.log_path("task-a")).unwrap();
        assert_eq!(content.lines().count(), 4);
        assert!(content.lines().nth(2).unwrap().contains("任务 [恢复] 结束"));
    }
}
