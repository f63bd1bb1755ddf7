//! 绑定到当前线程的资源持有者

use crate::beans::AsAny;
use crate::errors::BoxError;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// 以 key 绑定到线程上的事务资源
///
/// `is_void` 为真的持有者视为不存在，查找时会被顺带移除
pub trait ResourceHolder: AsAny + fmt::Debug {
    fn is_void(&self) -> bool {
        false
    }

    /// 从线程解绑时调用
    fn unbound(&self) {}

    /// 重置事务状态
    fn reset(&self) {}
}

/// 资源持有者共用的状态
#[derive(Debug, Default)]
pub struct ResourceHolderSupport {
    synchronized_with_transaction: AtomicBool,
    rollback_only: AtomicBool,
    reference_count: AtomicUsize,
    void: AtomicBool,
}

impl ResourceHolderSupport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_synchronized_with_transaction(&self, synchronized: bool) {
        self.synchronized_with_transaction
            .store(synchronized, Ordering::SeqCst);
    }

    pub fn is_synchronized_with_transaction(&self) -> bool {
        self.synchronized_with_transaction.load(Ordering::SeqCst)
    }

    pub fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    pub fn requested(&self) {
        self.reference_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn released(&self) {
        let _ = self
            .reference_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1));
    }

    pub fn is_open(&self) -> bool {
        self.reference_count.load(Ordering::SeqCst) > 0
    }

    pub fn clear(&self) {
        self.synchronized_with_transaction.store(false, Ordering::SeqCst);
        self.rollback_only.store(false, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.clear();
        self.reference_count.store(0, Ordering::SeqCst);
    }

    pub fn unbound(&self) {
        self.void.store(true, Ordering::SeqCst);
    }

    pub fn is_void(&self) -> bool {
        self.void.load(Ordering::SeqCst)
    }
}

/// 连接上的保存点
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Savepoint {
    pub id: u64,
    pub name: String,
}

/// 事务层需要的连接操作
pub trait Connection: Send + Sync + fmt::Debug {
    fn supports_savepoints(&self) -> Result<bool, BoxError>;
    fn set_savepoint(&self, name: &str) -> Result<Savepoint, BoxError>;
    fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<(), BoxError>;
    fn release_savepoint(&self, savepoint: &Savepoint) -> Result<(), BoxError>;

    fn auto_commit(&self) -> Result<bool, BoxError>;
    fn set_auto_commit(&self, auto_commit: bool) -> Result<(), BoxError>;
    fn isolation_level(&self) -> Result<i32, BoxError>;
    fn set_isolation_level(&self, level: i32) -> Result<(), BoxError>;
    fn set_read_only(&self, read_only: bool) -> Result<(), BoxError>;

    fn commit(&self) -> Result<(), BoxError>;
    fn rollback(&self) -> Result<(), BoxError>;
    fn close(&self) -> Result<(), BoxError>;
}

/// 为事务管理器打开连接
pub trait ConnectionFactory: Send + Sync {
    /// 连接持有者绑定时使用的 key
    fn resource_key(&self) -> &str;
    fn connect(&self) -> Result<Arc<dyn Connection>, BoxError>;
}

pub const SAVEPOINT_NAME_PREFIX: &str = "SAVEPOINT_";

/// 在事务期间持有连接
#[derive(Debug)]
pub struct ConnectionHolder {
    support: ResourceHolderSupport,
    connection: Arc<dyn Connection>,
    transaction_active: AtomicBool,
    savepoints_supported: OnceLock<bool>,
    savepoint_counter: AtomicU64,
}

impl ConnectionHolder {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            support: ResourceHolderSupport::new(),
            connection,
            transaction_active: AtomicBool::new(false),
            savepoints_supported: OnceLock::new(),
            savepoint_counter: AtomicU64::new(0),
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn support(&self) -> &ResourceHolderSupport {
        &self.support
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction_active.load(Ordering::SeqCst)
    }

    pub fn set_transaction_active(&self, active: bool) {
        self.transaction_active.store(active, Ordering::SeqCst);
    }

    /// 只询问连接一次并缓存结果
    pub fn supports_savepoints(&self) -> Result<bool, BoxError> {
        if let Some(supported) = self.savepoints_supported.get() {
            return Ok(*supported);
        }
        let supported = self.connection.supports_savepoints()?;
        Ok(*self.savepoints_supported.get_or_init(|| supported))
    }

    /// 创建名为 `SAVEPOINT_<n>` 的保存点
    pub fn create_savepoint(&self) -> Result<Savepoint, BoxError> {
        let n = self.savepoint_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.connection
            .set_savepoint(&format!("{}{}", SAVEPOINT_NAME_PREFIX, n))
    }
}

impl ResourceHolder for ConnectionHolder {
    fn is_void(&self) -> bool {
        self.support.is_void()
    }

    fn unbound(&self) {
        self.support.unbound();
    }

    fn reset(&self) {
        self.support.reset();
        self.set_transaction_active(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_flags() {
        let support = ResourceHolderSupport::new();
        support.requested();
        support.set_rollback_only();
        assert!(support.is_open());
        assert!(support.is_rollback_only());

        support.released();
        support.released();
        assert!(!support.is_open());

        support.reset();
        assert!(!support.is_rollback_only());
        assert!(!support.is_void());
        support.unbound();
        assert!(support.is_void());
    }
}
