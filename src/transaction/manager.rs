//! 基于连接工厂的事务管理器
//!
//! 连接通过同步管理器绑定到调用线程，事务内的代码用
//! [`ResourceTransactionManager::current_connection`] 取得当前连接。

use super::definition::{Propagation, TransactionDefinition, ISOLATION_DEFAULT};
use super::holder::{Connection, ConnectionFactory, ConnectionHolder, ResourceHolder, Savepoint};
use super::savepoint::{SavepointManager, TransactionObject};
use super::synchronization::{
    invoke_after_commit, invoke_after_completion, CompletionStatus, TransactionSynchronization,
    TransactionSynchronizationManager,
};
use crate::beans::AsAny;
use crate::errors::TransactionError;
use crate::log_error;
use std::sync::Arc;
use tracing::debug;

/// 事务的开启、提交与回滚
pub trait TransactionManager: Send + Sync {
    fn begin(&self, definition: &TransactionDefinition) -> Result<TransactionStatus, TransactionError>;

    fn commit(&self, status: TransactionStatus) -> Result<(), TransactionError>;

    fn rollback(&self, status: TransactionStatus) -> Result<(), TransactionError>;
}

/// 被挂起的外层事务状态
struct SuspendedResources {
    holder: Option<Arc<dyn ResourceHolder>>,
    synchronizations: Option<Vec<Arc<dyn TransactionSynchronization>>>,
    name: Option<String>,
    read_only: bool,
    isolation_level: Option<i32>,
    was_active: bool,
}

/// 一个事务作用域的句柄，由提交或回滚消费
pub struct TransactionStatus {
    transaction: Option<TransactionObject>,
    new_transaction: bool,
    new_synchronization: bool,
    read_only: bool,
    savepoint: Option<Savepoint>,
    suspended: Option<SuspendedResources>,
    rollback_only: bool,
}

impl TransactionStatus {
    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// 是否由该作用域开启了物理事务
    pub fn is_new_transaction(&self) -> bool {
        self.transaction.is_some() && self.new_transaction
    }

    pub fn is_new_synchronization(&self) -> bool {
        self.new_synchronization
    }

    pub fn has_savepoint(&self) -> bool {
        self.savepoint.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn has_suspended_resources(&self) -> bool {
        self.suspended.is_some()
    }

    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    pub fn is_local_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// 参与者在共享连接持有者上标记的仅回滚
    pub fn is_global_rollback_only(&self) -> bool {
        self.transaction
            .as_ref()
            .map_or(false, TransactionObject::is_rollback_only)
    }

    pub fn is_rollback_only(&self) -> bool {
        self.is_local_rollback_only() || self.is_global_rollback_only()
    }
}

impl std::fmt::Debug for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStatus")
            .field("has_transaction", &self.has_transaction())
            .field("new_transaction", &self.new_transaction)
            .field("new_synchronization", &self.new_synchronization)
            .field("savepoint", &self.savepoint)
            .field("suspended", &self.suspended.is_some())
            .field("rollback_only", &self.rollback_only)
            .finish()
    }
}

pub struct ResourceTransactionManager {
    factory: Arc<dyn ConnectionFactory>,
    synchronization: Arc<TransactionSynchronizationManager>,
    nested_transaction_allowed: bool,
}

impl ResourceTransactionManager {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        synchronization: Arc<TransactionSynchronizationManager>,
    ) -> Self {
        Self {
            factory,
            synchronization,
            nested_transaction_allowed: true,
        }
    }

    pub fn with_nested_transaction_allowed(mut self, allowed: bool) -> Self {
        self.nested_transaction_allowed = allowed;
        self
    }

    pub fn synchronization(&self) -> &Arc<TransactionSynchronizationManager> {
        &self.synchronization
    }

    fn resource_key(&self) -> &str {
        self.factory.resource_key()
    }

    fn current_holder(&self) -> Option<Arc<ConnectionHolder>> {
        self.synchronization
            .get_resource(self.resource_key())
            .and_then(|holder| holder.into_any_arc().downcast::<ConnectionHolder>().ok())
    }

    /// 当前线程事务绑定的连接
    pub fn current_connection(&self) -> Option<Arc<dyn Connection>> {
        self.current_holder()
            .map(|holder| Arc::clone(holder.connection()))
    }

    fn handle_existing(
        &self,
        definition: &TransactionDefinition,
        holder: Arc<ConnectionHolder>,
    ) -> Result<TransactionStatus, TransactionError> {
        match definition.propagation {
            Propagation::Never => Err(TransactionError::IllegalState(
                "Existing transaction found for transaction marked with propagation 'never'".to_string(),
            )),
            Propagation::NotSupported => {
                debug!("挂起当前事务");
                let suspended = self.suspend(true)?;
                self.prepare_status(definition, None, false, suspended)
            }
            Propagation::RequiresNew => {
                debug!(name = ?definition.name, "挂起当前事务并创建新事务");
                let suspended = self.suspend(true)?;
                self.start_transaction(definition, suspended)
            }
            Propagation::Nested => {
                if !self.nested_transaction_allowed {
                    return Err(TransactionError::nested_not_supported(
                        "Transaction manager does not allow nested transactions by default",
                    ));
                }
                debug!(name = ?definition.name, "创建嵌套事务");
                let mut transaction = TransactionObject::new(true);
                transaction.set_holder(Some(holder), false);
                let savepoint = transaction.create_savepoint()?;
                let mut status = self.prepare_status(definition, Some(transaction), false, None)?;
                status.savepoint = Some(savepoint);
                Ok(status)
            }
            Propagation::Required | Propagation::Supports | Propagation::Mandatory => {
                debug!("加入已有事务");
                let mut transaction = TransactionObject::new(self.nested_transaction_allowed);
                transaction.set_holder(Some(holder), false);
                self.prepare_status(definition, Some(transaction), false, None)
            }
        }
    }

    fn start_transaction(
        &self,
        definition: &TransactionDefinition,
        suspended: Option<SuspendedResources>,
    ) -> Result<TransactionStatus, TransactionError> {
        match self.open_transaction(definition) {
            Ok(transaction) => self.prepare_status(definition, Some(transaction), true, suspended),
            Err(err) => {
                if let Err(resume_err) = self.resume(suspended) {
                    log_error!(resume_err, "resume_after_begin_failure");
                }
                Err(err)
            }
        }
    }

    /// 打开连接、关闭自动提交并绑定到线程
    fn open_transaction(&self, definition: &TransactionDefinition) -> Result<TransactionObject, TransactionError> {
        let connection = self
            .factory
            .connect()
            .map_err(|source| TransactionError::CannotCreate {
                message: "Could not open connection for transaction".to_string(),
                source: Some(source),
            })?;
        debug!(name = ?definition.name, "已为事务获取连接");

        let mut transaction = TransactionObject::new(self.nested_transaction_allowed);
        if let Err(source) = prepare_connection(connection.as_ref(), definition, &mut transaction) {
            if let Err(close_err) = connection.close() {
                debug!(error = %close_err, "开启事务失败后无法关闭连接");
            }
            return Err(TransactionError::CannotCreate {
                message: "Could not prepare connection for transaction".to_string(),
                source: Some(source),
            });
        }

        let holder = Arc::new(ConnectionHolder::new(connection));
        holder.support().set_synchronized_with_transaction(true);
        holder.set_transaction_active(true);
        self.synchronization
            .bind_resource(self.resource_key(), holder.clone())?;
        transaction.set_holder(Some(holder), true);
        Ok(transaction)
    }

    fn prepare_status(
        &self,
        definition: &TransactionDefinition,
        transaction: Option<TransactionObject>,
        new_transaction: bool,
        suspended: Option<SuspendedResources>,
    ) -> Result<TransactionStatus, TransactionError> {
        let new_synchronization = !self.synchronization.is_synchronization_active();
        if new_synchronization {
            let sync = &self.synchronization;
            sync.set_actual_transaction_active(transaction.is_some());
            sync.set_current_transaction_isolation_level(
                (definition.isolation_level != ISOLATION_DEFAULT).then_some(definition.isolation_level),
            );
            sync.set_current_transaction_read_only(definition.read_only);
            sync.set_current_transaction_name(definition.name.as_deref());
            sync.init_synchronization()?;
        }
        Ok(TransactionStatus {
            transaction,
            new_transaction,
            new_synchronization,
            read_only: definition.read_only,
            savepoint: None,
            suspended,
            rollback_only: false,
        })
    }

    /// 把当前作用域从线程上摘下；`with_transaction` 时同时解绑连接持有者
    fn suspend(&self, with_transaction: bool) -> Result<Option<SuspendedResources>, TransactionError> {
        let sync = &self.synchronization;
        let holder = if with_transaction {
            Some(sync.unbind_resource(self.resource_key())?)
        } else {
            None
        };
        if !sync.is_synchronization_active() {
            return Ok(holder.map(|holder| SuspendedResources {
                holder: Some(holder),
                synchronizations: None,
                name: None,
                read_only: false,
                isolation_level: None,
                was_active: false,
            }));
        }

        let synchronizations = sync.synchronizations()?;
        for synchronization in &synchronizations {
            synchronization.suspend();
        }
        sync.clear_synchronization()?;
        let suspended = SuspendedResources {
            holder,
            synchronizations: Some(synchronizations),
            name: sync.current_transaction_name(),
            read_only: sync.is_current_transaction_read_only(),
            isolation_level: sync.current_transaction_isolation_level(),
            was_active: sync.is_actual_transaction_active(),
        };
        sync.set_current_transaction_name(None);
        sync.set_current_transaction_read_only(false);
        sync.set_current_transaction_isolation_level(None);
        sync.set_actual_transaction_active(false);
        Ok(Some(suspended))
    }

    fn resume(&self, suspended: Option<SuspendedResources>) -> Result<(), TransactionError> {
        let Some(suspended) = suspended else {
            return Ok(());
        };
        let sync = &self.synchronization;
        if let Some(holder) = suspended.holder {
            sync.bind_resource(self.resource_key(), holder)?;
        }
        if let Some(synchronizations) = suspended.synchronizations {
            sync.set_actual_transaction_active(suspended.was_active);
            sync.set_current_transaction_isolation_level(suspended.isolation_level);
            sync.set_current_transaction_read_only(suspended.read_only);
            sync.set_current_transaction_name(suspended.name.as_deref());
            sync.init_synchronization()?;
            for synchronization in synchronizations {
                synchronization.resume();
                sync.register_synchronization(synchronization)?;
            }
        }
        Ok(())
    }

    fn commit_steps(&self, status: &TransactionStatus, before_completion_invoked: &mut bool) -> Result<(), TransactionError> {
        if status.new_synchronization {
            self.synchronization.trigger_flush()?;
            self.synchronization.trigger_before_commit(status.read_only)?;
            self.synchronization.trigger_before_completion()?;
            *before_completion_invoked = true;
        }
        let Some(transaction) = &status.transaction else {
            return Ok(());
        };
        if let Some(savepoint) = &status.savepoint {
            debug!(savepoint = %savepoint.name, "释放事务保存点");
            transaction.release_savepoint(savepoint);
        } else if status.new_transaction {
            if let Some(holder) = transaction.holder() {
                debug!("提交事务");
                holder
                    .connection()
                    .commit()
                    .map_err(|source| TransactionError::general("Could not commit transaction", Some(source)))?;
            }
        }
        Ok(())
    }

    fn process_commit(&self, status: TransactionStatus) -> Result<(), TransactionError> {
        let mut before_completion_invoked = false;
        let result = match self.commit_steps(&status, &mut before_completion_invoked) {
            Ok(()) => {
                if status.new_synchronization {
                    if let Ok(synchronizations) = self.synchronization.synchronizations() {
                        invoke_after_commit(&synchronizations);
                        invoke_after_completion(&synchronizations, CompletionStatus::Committed);
                    }
                }
                Ok(())
            }
            Err(err) => {
                if status.new_synchronization && !before_completion_invoked {
                    if let Err(trigger_err) = self.synchronization.trigger_before_completion() {
                        log_error!(trigger_err, "before_completion");
                    }
                }
                let completion = if status.is_new_transaction() && self.rollback_connection(&status) {
                    CompletionStatus::RolledBack
                } else {
                    CompletionStatus::Unknown
                };
                self.trigger_after_completion(&status, completion);
                Err(err)
            }
        };
        self.cleanup_after_completion(status);
        result
    }

    /// 提交失败后回滚物理连接
    fn rollback_connection(&self, status: &TransactionStatus) -> bool {
        let Some(holder) = status.transaction.as_ref().and_then(TransactionObject::holder) else {
            return false;
        };
        match holder.connection().rollback() {
            Ok(()) => true,
            Err(err) => {
                log_error!(err, "rollback_after_commit_failure");
                false
            }
        }
    }

    fn rollback_steps(&self, status: &TransactionStatus) -> Result<(), TransactionError> {
        let Some(transaction) = &status.transaction else {
            return Ok(());
        };
        if let Some(savepoint) = &status.savepoint {
            debug!(savepoint = %savepoint.name, "回滚到保存点");
            transaction.rollback_to_savepoint(savepoint)?;
            transaction.release_savepoint(savepoint);
        } else if status.new_transaction {
            if let Some(holder) = transaction.holder() {
                debug!("回滚事务");
                holder
                    .connection()
                    .rollback()
                    .map_err(|source| TransactionError::general("Could not roll back transaction", Some(source)))?;
            }
        } else {
            debug!("参与的事务失败，将已有事务标记为仅回滚");
            transaction.set_rollback_only();
        }
        Ok(())
    }

    fn process_rollback(&self, status: TransactionStatus) -> Result<(), TransactionError> {
        if status.new_synchronization {
            if let Err(err) = self.synchronization.trigger_before_completion() {
                log_error!(err, "before_completion");
            }
        }
        let result = self.rollback_steps(&status);
        let completion = if result.is_ok() {
            CompletionStatus::RolledBack
        } else {
            CompletionStatus::Unknown
        };
        self.trigger_after_completion(&status, completion);
        self.cleanup_after_completion(status);
        result
    }

    fn trigger_after_completion(&self, status: &TransactionStatus, completion: CompletionStatus) {
        if !status.new_synchronization {
            return;
        }
        if let Ok(synchronizations) = self.synchronization.synchronizations() {
            invoke_after_completion(&synchronizations, completion);
        }
    }

    fn cleanup_after_completion(&self, status: TransactionStatus) {
        if status.new_synchronization {
            if let Err(err) = self.synchronization.clear() {
                log_error!(err, "clear_synchronization");
            }
        }
        if status.is_new_transaction() {
            if let Some(transaction) = &status.transaction {
                self.release_connection(transaction);
            }
        }
        if let Some(suspended) = status.suspended {
            debug!("内层事务结束，恢复被挂起的事务");
            if let Err(err) = self.resume(Some(suspended)) {
                log_error!(err, "resume_suspended_transaction");
            }
        }
    }

    /// 解绑持有者，恢复连接设置后关闭
    fn release_connection(&self, transaction: &TransactionObject) {
        if !transaction.is_new_holder() {
            return;
        }
        self.synchronization
            .unbind_resource_if_possible(self.resource_key());
        let Some(holder) = transaction.holder() else {
            return;
        };
        let connection = holder.connection();
        if transaction.must_restore_auto_commit() {
            if let Err(err) = connection.set_auto_commit(true) {
                debug!(error = %err, "事务结束后无法恢复自动提交");
            }
        }
        if let Some(level) = transaction.previous_isolation_level() {
            if let Err(err) = connection.set_isolation_level(level) {
                debug!(error = %err, "事务结束后无法恢复隔离级别");
            }
        }
        debug!("事务结束，释放连接");
        if let Err(err) = connection.close() {
            debug!(error = %err, "事务结束后无法关闭连接");
        }
        holder.reset();
    }
}

fn prepare_connection(
    connection: &dyn Connection,
    definition: &TransactionDefinition,
    transaction: &mut TransactionObject,
) -> Result<(), crate::errors::BoxError> {
    if definition.read_only {
        connection.set_read_only(true)?;
    }
    if definition.isolation_level != ISOLATION_DEFAULT {
        let current = connection.isolation_level()?;
        if current != definition.isolation_level {
            transaction.set_previous_isolation_level(Some(current));
            connection.set_isolation_level(definition.isolation_level)?;
        }
    }
    if connection.auto_commit()? {
        transaction.set_must_restore_auto_commit(true);
        connection.set_auto_commit(false)?;
    }
    Ok(())
}

impl TransactionManager for ResourceTransactionManager {
    fn begin(&self, definition: &TransactionDefinition) -> Result<TransactionStatus, TransactionError> {
        if let Some(holder) = self
            .current_holder()
            .filter(|holder| holder.is_transaction_active())
        {
            return self.handle_existing(definition, holder);
        }

        match definition.propagation {
            Propagation::Mandatory => Err(TransactionError::IllegalState(
                "No existing transaction found for transaction marked with propagation 'mandatory'".to_string(),
            )),
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested => {
                debug!(name = ?definition.name, propagation = %definition.propagation, "创建新事务");
                let suspended = self.suspend(false)?;
                self.start_transaction(definition, suspended)
            }
            Propagation::Supports | Propagation::NotSupported | Propagation::Never => {
                self.prepare_status(definition, None, false, None)
            }
        }
    }

    fn commit(&self, status: TransactionStatus) -> Result<(), TransactionError> {
        if status.is_local_rollback_only() {
            debug!("事务代码请求回滚");
            return self.process_rollback(status);
        }
        if status.is_new_transaction() && status.is_global_rollback_only() {
            debug!("全局事务已标记为仅回滚，但事务代码请求提交");
            self.process_rollback(status)?;
            return Err(TransactionError::general(
                "Transaction rolled back because it has been marked as rollback-only",
                None,
            ));
        }
        self.process_commit(status)
    }

    fn rollback(&self, status: TransactionStatus) -> Result<(), TransactionError> {
        self.process_rollback(status)
    }
}
