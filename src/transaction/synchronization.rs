//! 线程范围的事务同步
//!
//! 每个线程只看到自己的资源、已注册的同步回调与当前事务标志。
//! 线程状态一旦为空立即移除，空闲线程不会留下条目。

use super::holder::ResourceHolder;
use crate::errors::{BoxError, TransactionError};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{error, trace};

pub const LOWEST_PRECEDENCE: i32 = i32::MAX;
pub const HIGHEST_PRECEDENCE: i32 = i32::MIN;

/// 传给 `after_completion` 的完成状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Committed,
    RolledBack,
    Unknown,
}

/// 事务完成前后的回调，`order` 小的先执行
pub trait TransactionSynchronization: Send + Sync {
    fn order(&self) -> i32 {
        LOWEST_PRECEDENCE
    }

    fn suspend(&self) {}

    fn resume(&self) {}

    fn flush(&self) {}

    fn before_commit(&self, _read_only: bool) -> Result<(), BoxError> {
        Ok(())
    }

    fn before_completion(&self) {}

    fn after_commit(&self) {}

    fn after_completion(&self, _status: CompletionStatus) {}
}

#[derive(Default)]
struct ThreadState {
    resources: Option<HashMap<String, Arc<dyn ResourceHolder>>>,
    synchronizations: Option<Vec<Arc<dyn TransactionSynchronization>>>,
    name: Option<String>,
    read_only: bool,
    isolation_level: Option<i32>,
    actual_active: bool,
}

impl ThreadState {
    fn is_empty(&self) -> bool {
        self.resources.is_none()
            && self.synchronizations.is_none()
            && self.name.is_none()
            && !self.read_only
            && self.isolation_level.is_none()
            && !self.actual_active
    }
}

/// 按线程登记事务资源与同步回调
#[derive(Default)]
pub struct TransactionSynchronizationManager {
    threads: DashMap<ThreadId, ThreadState>,
}

impl TransactionSynchronizationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在当前线程的状态上执行 `f`，执行后为空则移除条目。
    /// `f` 内不能再调用管理器。
    fn with_state<R>(&self, f: impl FnOnce(&mut ThreadState) -> R) -> R {
        let id = thread::current().id();
        let (result, empty) = {
            let mut state = self.threads.entry(id).or_default();
            let result = f(&mut state);
            (result, state.is_empty())
        };
        if empty {
            self.threads.remove_if(&id, |_, state| state.is_empty());
        }
        result
    }

    fn read_state<R>(&self, f: impl FnOnce(Option<&ThreadState>) -> R) -> R {
        let id = thread::current().id();
        match self.threads.get(&id) {
            Some(state) => f(Some(state.value())),
            None => f(None),
        }
    }

    fn thread_name() -> String {
        let current = thread::current();
        current
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", current.id()))
    }

    // ------------------------------------------------------------------
    // 资源
    // ------------------------------------------------------------------

    /// 当前线程绑定资源的快照
    pub fn resource_map(&self) -> HashMap<String, Arc<dyn ResourceHolder>> {
        self.read_state(|state| {
            state
                .and_then(|state| state.resources.clone())
                .unwrap_or_default()
        })
    }

    pub fn has_resource(&self, key: &str) -> bool {
        self.get_resource(key).is_some()
    }

    /// 返回 `key` 下绑定的持有者；void 持有者会被移除并视为不存在
    pub fn get_resource(&self, key: &str) -> Option<Arc<dyn ResourceHolder>> {
        let holder = self.with_state(|state| {
            let resources = state.resources.as_mut()?;
            let holder = resources.get(key).cloned()?;
            if holder.is_void() {
                resources.remove(key);
                if resources.is_empty() {
                    state.resources = None;
                }
                return None;
            }
            Some(holder)
        });
        if let Some(holder) = &holder {
            trace!(key, holder = ?holder, "取得线程绑定的资源");
        }
        holder
    }

    /// 在 `key` 下绑定持有者，已有有效持有者时失败
    pub fn bind_resource(&self, key: &str, holder: Arc<dyn ResourceHolder>) -> Result<(), TransactionError> {
        let existing = self.with_state(|state| {
            let resources = state.resources.get_or_insert_with(HashMap::new);
            match resources.get(key) {
                Some(existing) if !existing.is_void() => Some(format!("{:?}", existing)),
                _ => {
                    resources.insert(key.to_string(), holder);
                    None
                }
            }
        });
        match existing {
            Some(value) => Err(TransactionError::AlreadyBound {
                key: key.to_string(),
                value,
                thread: Self::thread_name(),
            }),
            None => {
                trace!(key, "资源已绑定到线程");
                Ok(())
            }
        }
    }

    /// 解绑 `key` 下的持有者，未绑定时失败
    pub fn unbind_resource(&self, key: &str) -> Result<Arc<dyn ResourceHolder>, TransactionError> {
        self.unbind_resource_if_possible(key)
            .ok_or_else(|| TransactionError::NotBound {
                key: key.to_string(),
                thread: Self::thread_name(),
            })
    }

    /// 存在时解绑 `key` 下的持有者；void 持有者被移除但视为不存在
    pub fn unbind_resource_if_possible(&self, key: &str) -> Option<Arc<dyn ResourceHolder>> {
        let holder = self.with_state(|state| {
            let resources = state.resources.as_mut()?;
            let holder = resources.remove(key);
            if resources.is_empty() {
                state.resources = None;
            }
            holder
        })?;
        if holder.is_void() {
            return None;
        }
        trace!(key, "资源已从线程移除");
        Some(holder)
    }

    // ------------------------------------------------------------------
    // 同步回调
    // ------------------------------------------------------------------

    pub fn is_synchronization_active(&self) -> bool {
        self.read_state(|state| state.map_or(false, |state| state.synchronizations.is_some()))
    }

    pub fn init_synchronization(&self) -> Result<(), TransactionError> {
        self.with_state(|state| {
            if state.synchronizations.is_some() {
                return Err(TransactionError::SynchronizationActive);
            }
            state.synchronizations = Some(Vec::new());
            Ok(())
        })?;
        trace!("初始化事务同步");
        Ok(())
    }

    /// 为当前线程注册同步回调，同一实例重复注册无效
    pub fn register_synchronization(
        &self,
        synchronization: Arc<dyn TransactionSynchronization>,
    ) -> Result<(), TransactionError> {
        self.with_state(|state| {
            let registered = state
                .synchronizations
                .as_mut()
                .ok_or(TransactionError::SynchronizationInactive)?;
            let address = Arc::as_ptr(&synchronization) as *const ();
            if !registered
                .iter()
                .any(|existing| Arc::as_ptr(existing) as *const () == address)
            {
                registered.push(synchronization);
            }
            Ok(())
        })
    }

    /// 按 `order` 排序的已注册回调快照，相同时保持注册顺序
    pub fn synchronizations(&self) -> Result<Vec<Arc<dyn TransactionSynchronization>>, TransactionError> {
        let mut snapshot = self.read_state(|state| {
            state
                .and_then(|state| state.synchronizations.clone())
                .ok_or(TransactionError::SynchronizationInactive)
        })?;
        snapshot.sort_by_key(|synchronization| synchronization.order());
        Ok(snapshot)
    }

    pub fn clear_synchronization(&self) -> Result<(), TransactionError> {
        self.with_state(|state| {
            if state.synchronizations.take().is_none() {
                return Err(TransactionError::SynchronizationInactive);
            }
            Ok(())
        })?;
        trace!("清除事务同步");
        Ok(())
    }

    // ------------------------------------------------------------------
    // 当前事务属性
    // ------------------------------------------------------------------

    pub fn set_current_transaction_name(&self, name: Option<&str>) {
        self.with_state(|state| state.name = name.map(str::to_string));
    }

    pub fn current_transaction_name(&self) -> Option<String> {
        self.read_state(|state| state.and_then(|state| state.name.clone()))
    }

    pub fn set_current_transaction_read_only(&self, read_only: bool) {
        self.with_state(|state| state.read_only = read_only);
    }

    pub fn is_current_transaction_read_only(&self) -> bool {
        self.read_state(|state| state.map_or(false, |state| state.read_only))
    }

    pub fn set_current_transaction_isolation_level(&self, level: Option<i32>) {
        self.with_state(|state| state.isolation_level = level);
    }

    pub fn current_transaction_isolation_level(&self) -> Option<i32> {
        self.read_state(|state| state.and_then(|state| state.isolation_level))
    }

    pub fn set_actual_transaction_active(&self, active: bool) {
        self.with_state(|state| state.actual_active = active);
    }

    pub fn is_actual_transaction_active(&self) -> bool {
        self.read_state(|state| state.map_or(false, |state| state.actual_active))
    }

    /// 一次性清除同步回调与当前事务属性，已绑定的资源不受影响。
    /// 同步未激活时失败且不做任何修改。
    pub fn clear(&self) -> Result<(), TransactionError> {
        self.with_state(|state| {
            if state.synchronizations.is_none() {
                return Err(TransactionError::SynchronizationInactive);
            }
            state.synchronizations = None;
            state.name = None;
            state.read_only = false;
            state.isolation_level = None;
            state.actual_active = false;
            Ok(())
        })
    }

    /// 当前持有状态的线程数
    pub fn tracked_threads(&self) -> usize {
        self.threads.len()
    }

    // ------------------------------------------------------------------
    // 触发回调
    // ------------------------------------------------------------------

    pub fn trigger_flush(&self) -> Result<(), TransactionError> {
        for synchronization in self.synchronizations()? {
            synchronization.flush();
        }
        Ok(())
    }

    /// 遇到第一个失败的回调即停止
    pub fn trigger_before_commit(&self, read_only: bool) -> Result<(), TransactionError> {
        for synchronization in self.synchronizations()? {
            synchronization
                .before_commit(read_only)
                .map_err(|source| TransactionError::general("before_commit callback failed", Some(source)))?;
        }
        Ok(())
    }

    pub fn trigger_before_completion(&self) -> Result<(), TransactionError> {
        for synchronization in self.synchronizations()? {
            synchronization.before_completion();
        }
        Ok(())
    }

    pub fn trigger_after_commit(&self) -> Result<(), TransactionError> {
        invoke_after_commit(&self.synchronizations()?);
        Ok(())
    }

    pub fn trigger_after_completion(&self, status: CompletionStatus) -> Result<(), TransactionError> {
        invoke_after_completion(&self.synchronizations()?, status);
        Ok(())
    }
}

pub fn invoke_after_commit(synchronizations: &[Arc<dyn TransactionSynchronization>]) {
    for synchronization in synchronizations {
        synchronization.after_commit();
    }
}

/// 前面的回调 panic 时后续回调仍会执行，panic 只记录日志
pub fn invoke_after_completion(synchronizations: &[Arc<dyn TransactionSynchronization>], status: CompletionStatus) {
    for synchronization in synchronizations {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            synchronization.after_completion(status)
        }));
        if outcome.is_err() {
            error!(?status, "after_completion 回调 panic");
        }
    }
}
