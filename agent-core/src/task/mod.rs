// 任务执行引擎
//
// - Task: 由有序子任务组成的一个维护作业，状态由子任务推导
// - SubTask: 可重试、有超时限制的执行单元，可附带回滚操作
// - TaskRunner: 后台派发、活动任务表、按资源加锁

mod context;
mod job;
mod lock;
mod runner;
mod subtask;
mod types;

pub use context::{TaskContext, TaskEnv};
pub use job::Task;
pub use lock::{ResourceGuard, ResourceLocks};
pub use runner::{ActiveTask, TaskHandle, TaskOutcome, TaskRunner};
pub use subtask::{Operation, OperationFuture, SubTask, operation};
pub use types::{RetryPolicy, TaskMeta, TaskScope, TaskStatus, TaskType};
