//! 线程范围的事务支持：资源绑定、同步回调、保存点，
//! 以及事务管理器与事务拦截器

pub mod definition;
pub mod holder;
pub mod interceptor;
pub mod manager;
pub mod savepoint;
pub mod synchronization;

pub use definition::{Propagation, TransactionDefinition};
pub use holder::{
    Connection, ConnectionFactory, ConnectionHolder, ResourceHolder, ResourceHolderSupport, Savepoint,
};
pub use interceptor::{transaction_advisor, TransactionInterceptor};
pub use manager::{ResourceTransactionManager, TransactionManager, TransactionStatus};
pub use savepoint::{SavepointManager, TransactionObject};
pub use synchronization::{CompletionStatus, TransactionSynchronization, TransactionSynchronizationManager};
