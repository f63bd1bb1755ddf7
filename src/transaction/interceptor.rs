//! 在事务中执行操作的拦截器

use super::definition::{TransactionDefinition, TRANSACTIONAL_ATTRIBUTE};
use super::manager::TransactionManager;
use crate::aop::{Advisor, Interceptor, MethodInvocation, Pointcut};
use crate::aop::matcher::AttributeMatcher;
use crate::beans::Value;
use crate::errors::{BoxError, InvocationError};
use crate::log_error;
use std::sync::Arc;
use tracing::debug;

/// 为带有 `transactional` 属性的操作开启事务，成功时提交，失败时回滚。
///
/// 属性值由 [`TransactionDefinition::parse_attribute`] 解析；
/// 没有该属性的操作直接执行。
pub struct TransactionInterceptor {
    manager: Arc<dyn TransactionManager>,
}

impl TransactionInterceptor {
    pub fn new(manager: Arc<dyn TransactionManager>) -> Self {
        Self { manager }
    }

    fn definition_for(&self, invocation: &MethodInvocation<'_>) -> Result<Option<TransactionDefinition>, InvocationError> {
        let operation = invocation.operation();
        let Some(attribute) = operation.attribute(TRANSACTIONAL_ATTRIBUTE) else {
            return Ok(None);
        };
        let mut definition =
            TransactionDefinition::parse_attribute(attribute).map_err(|err| failure(operation.name(), err))?;
        if definition.name.is_none() {
            definition.name = Some(format!("{}.{}", invocation.target_type().name(), operation.name()));
        }
        Ok(Some(definition))
    }
}

fn failure(operation: &str, err: impl Into<BoxError>) -> InvocationError {
    InvocationError::Failure {
        operation: operation.to_string(),
        source: err.into(),
    }
}

impl Interceptor for TransactionInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> Result<Value, InvocationError> {
        let Some(definition) = self.definition_for(invocation)? else {
            return invocation.proceed();
        };
        let operation = invocation.operation().name().to_string();
        let status = self
            .manager
            .begin(&definition)
            .map_err(|err| failure(&operation, err))?;

        match invocation.proceed() {
            Ok(value) => {
                self.manager
                    .commit(status)
                    .map_err(|err| failure(&operation, err))?;
                Ok(value)
            }
            Err(err) => {
                debug!(operation = %operation, error = %err, "操作失败，回滚事务");
                if let Err(rollback_err) = self.manager.rollback(status) {
                    log_error!(rollback_err, "transaction_rollback", target_operation = operation.as_str());
                }
                Err(err)
            }
        }
    }

    fn name(&self) -> &str {
        "transaction"
    }
}

/// 把 [`TransactionInterceptor`] 应用到所有带 `transactional` 属性的操作
pub fn transaction_advisor(manager: Arc<dyn TransactionManager>) -> Advisor {
    Advisor::new(
        Pointcut::for_methods(Arc::new(AttributeMatcher::present(TRANSACTIONAL_ATTRIBUTE))),
        Arc::new(TransactionInterceptor::new(manager)),
    )
}
