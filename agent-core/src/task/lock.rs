use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// 按资源键划分的互斥锁
///
/// 同一个数据库上的备份/恢复任务在持有锁期间串行执行，不同资源互不影响。
#[derive(Clone, Default)]
pub struct ResourceLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// 资源锁守卫，释放时清理不再使用的锁条目
pub struct ResourceGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 资源锁键，例如 "postgresql/local/app_db"
    pub fn key(db_type: &str, name: &str, detail_name: &str) -> String {
        format!("{db_type}/{name}/{detail_name}")
    }

    pub async fn acquire(&self, key: &str) -> ResourceGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        debug!("等待资源锁: {}", key);
        let guard = mutex.lock_owned().await;
        debug!("已获取资源锁: {}", key);

        ResourceGuard {
            key: key.to_string(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .map(|mutex| {
                let locked = mutex.try_lock().is_err();
                locked
            })
            .unwrap_or(false)
    }

    /// 当前登记的锁数量
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl ResourceGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // 只剩表内引用时说明没有其他等待者
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
        debug!("已释放资源锁: {}", self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = ResourceLocks::new();
        let key = ResourceLocks::key("postgresql", "local", "app_db");

        let guard = locks.acquire(&key).await;
        assert!(locks.is_locked(&key));

        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&key).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!locks.is_locked(&key));
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = ResourceLocks::new();
        let _a = locks.acquire("postgresql/local/a").await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire("postgresql/local/b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
