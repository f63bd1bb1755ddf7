//! 嵌套事务的保存点处理

use super::holder::{ConnectionHolder, Savepoint};
use crate::errors::TransactionError;
use std::sync::Arc;
use tracing::debug;

/// 事务对外提供的保存点操作
pub trait SavepointManager {
    fn create_savepoint(&self) -> Result<Savepoint, TransactionError>;
    fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<(), TransactionError>;
    /// 失败只记录日志
    fn release_savepoint(&self, savepoint: &Savepoint);
}

/// 资源事务管理器为每个事务保存的状态
#[derive(Debug, Default)]
pub struct TransactionObject {
    holder: Option<Arc<ConnectionHolder>>,
    new_holder: bool,
    savepoint_allowed: bool,
    previous_isolation_level: Option<i32>,
    must_restore_auto_commit: bool,
}

impl TransactionObject {
    pub fn new(savepoint_allowed: bool) -> Self {
        Self {
            savepoint_allowed,
            ..Self::default()
        }
    }

    pub fn holder(&self) -> Option<&Arc<ConnectionHolder>> {
        self.holder.as_ref()
    }

    pub fn set_holder(&mut self, holder: Option<Arc<ConnectionHolder>>, new_holder: bool) {
        self.holder = holder;
        self.new_holder = new_holder;
    }

    pub fn has_holder(&self) -> bool {
        self.holder.is_some()
    }

    /// 持有的连接是否由本事务打开
    pub fn is_new_holder(&self) -> bool {
        self.new_holder
    }

    pub fn is_savepoint_allowed(&self) -> bool {
        self.savepoint_allowed
    }

    pub fn set_savepoint_allowed(&mut self, allowed: bool) {
        self.savepoint_allowed = allowed;
    }

    pub fn previous_isolation_level(&self) -> Option<i32> {
        self.previous_isolation_level
    }

    pub fn set_previous_isolation_level(&mut self, level: Option<i32>) {
        self.previous_isolation_level = level;
    }

    pub fn must_restore_auto_commit(&self) -> bool {
        self.must_restore_auto_commit
    }

    pub fn set_must_restore_auto_commit(&mut self, restore: bool) {
        self.must_restore_auto_commit = restore;
    }

    pub fn is_rollback_only(&self) -> bool {
        self.holder
            .as_ref()
            .map_or(false, |holder| holder.support().is_rollback_only())
    }

    pub fn set_rollback_only(&self) {
        if let Some(holder) = &self.holder {
            holder.support().set_rollback_only();
        }
    }

    fn holder_for_savepoint(&self) -> Result<&Arc<ConnectionHolder>, TransactionError> {
        if !self.savepoint_allowed {
            return Err(TransactionError::nested_not_supported(
                "Transaction manager does not allow nested transactions",
            ));
        }
        self.holder.as_ref().ok_or_else(|| {
            TransactionError::general(
                "Cannot create nested transaction if not exposing a connection transaction",
                None,
            )
        })
    }
}

impl SavepointManager for TransactionObject {
    fn create_savepoint(&self) -> Result<Savepoint, TransactionError> {
        let holder = self.holder_for_savepoint()?;
        match holder.supports_savepoints() {
            Ok(true) => {}
            Ok(false) => {
                return Err(TransactionError::nested_not_supported(
                    "Cannot create a nested transaction because savepoints are not supported by the connection",
                ))
            }
            Err(source) => {
                return Err(TransactionError::NestedNotSupported {
                    message: "Cannot determine whether the connection supports savepoints".to_string(),
                    source: Some(source),
                })
            }
        }
        holder
            .create_savepoint()
            .map_err(|source| TransactionError::CannotCreate {
                message: "Could not create savepoint".to_string(),
                source: Some(source),
            })
    }

    fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<(), TransactionError> {
        self.holder_for_savepoint()?
            .connection()
            .rollback_to_savepoint(savepoint)
            .map_err(|source| TransactionError::general("Could not roll back to savepoint", Some(source)))
    }

    fn release_savepoint(&self, savepoint: &Savepoint) {
        let released = self
            .holder_for_savepoint()
            .map_err(|err| err.to_string())
            .and_then(|holder| {
                holder
                    .connection()
                    .release_savepoint(savepoint)
                    .map_err(|err| err.to_string())
            });
        if let Err(reason) = released {
            debug!(savepoint = %savepoint.name, %reason, "无法显式释放保存点");
        }
    }
}
