// 单元测试共用的内存实现

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audit::{AuditEvent, AuditSink};
use crate::client::{BackupInfo, DatabaseClient, DatabaseClientFactory, RecoverInfo};
use crate::store::{BackupRecord, BackupRecordStore};
use crate::{AgentError, Result};

/// 记录所有审计事件
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<(String, AuditEvent)>>,
}

impl MemoryAuditSink {
    pub fn events_for(&self, task_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, task_id: &str, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap()
            .push((task_id.to_string(), event.clone()));
    }
}

/// 假客户端的共享状态，测试通过它注入失败并检查调用
#[derive(Default)]
pub struct FakeClientState {
    connect_calls: AtomicU32,
    close_calls: AtomicU32,
    backup_calls: AtomicU32,
    fail_backups: AtomicBool,
    primary_failures_left: AtomicU32,
    fail_snapshot_restores: AtomicBool,
    primary_restore_delay: Mutex<Option<Duration>>,
    backup_paths: Mutex<HashSet<PathBuf>>,
    recover_sources: Mutex<Vec<PathBuf>>,
}

impl FakeClientState {
    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn backup_calls(&self) -> u32 {
        self.backup_calls.load(Ordering::SeqCst)
    }

    pub fn recover_sources(&self) -> Vec<PathBuf> {
        self.recover_sources.lock().unwrap().clone()
    }

    /// 备份先写出半个文件再失败
    pub fn fail_backups(&self, fail: bool) {
        self.fail_backups.store(fail, Ordering::SeqCst);
    }

    /// 接下来 n 次非快照来源的恢复失败
    pub fn fail_primary_restores(&self, n: u32) {
        self.primary_failures_left.store(n, Ordering::SeqCst);
    }

    /// 非快照来源的恢复先等待 delay
    pub fn slow_primary_restores(&self, delay: Duration) {
        *self.primary_restore_delay.lock().unwrap() = Some(delay);
    }

    /// 从本客户端备份出的文件恢复时失败
    pub fn fail_snapshot_restores(&self, fail: bool) {
        self.fail_snapshot_restores.store(fail, Ordering::SeqCst);
    }
}

pub struct FakeDatabaseClient {
    state: Arc<FakeClientState>,
}

impl FakeDatabaseClient {
    pub fn new(state: Arc<FakeClientState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl DatabaseClient for FakeDatabaseClient {
    async fn backup(&self, info: &BackupInfo) -> Result<()> {
        self.state.backup_calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(&info.target_dir).await?;
        let path = info.target_path();

        if self.state.fail_backups.load(Ordering::SeqCst) {
            tokio::fs::write(&path, b"-- partial").await?;
            return Err(AgentError::operation(format!("pg_dump {} 失败", info.name)));
        }

        tokio::fs::write(&path, format!("-- dump of {}", info.name)).await?;
        self.state.backup_paths.lock().unwrap().insert(path);
        Ok(())
    }

    async fn recover(&self, info: &RecoverInfo) -> Result<()> {
        self.state
            .recover_sources
            .lock()
            .unwrap()
            .push(info.source_file.clone());

        let from_snapshot = self
            .state
            .backup_paths
            .lock()
            .unwrap()
            .contains(&info.source_file);
        if !from_snapshot {
            let delay = *self.state.primary_restore_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        let fail = if from_snapshot {
            self.state.fail_snapshot_restores.load(Ordering::SeqCst)
        } else {
            self.state
                .primary_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    if left == 0 {
                        None
                    } else if left == u32::MAX {
                        Some(left)
                    } else {
                        Some(left - 1)
                    }
                })
                .is_ok()
        };

        if fail {
            let file_name = info
                .source_file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            return Err(AgentError::operation(format!("导入 {file_name} 失败")));
        }
        Ok(())
    }

    fn close(&self) {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// 每次连接都返回共享同一状态的假客户端
#[derive(Default)]
pub struct FakeClientFactory {
    state: Arc<FakeClientState>,
}

impl FakeClientFactory {
    pub fn state(&self) -> Arc<FakeClientState> {
        self.state.clone()
    }
}

#[async_trait]
impl DatabaseClientFactory for FakeClientFactory {
    async fn connect(&self, _instance: &str) -> Result<Box<dyn DatabaseClient>> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDatabaseClient::new(self.state.clone())))
    }
}

/// 轮询备份记录直到进入终态
pub async fn wait_for_terminal_record(
    store: &dyn BackupRecordStore,
    id: i64,
    timeout: Duration,
) -> BackupRecord {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let record = store
            .get_record(id)
            .await
            .unwrap()
            .expect("record should exist");
        if record.status.is_terminal() {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "record {id} still {} after {:?}",
            record.status,
            timeout
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
