//! 拦截代理
//!
//! 代理与目标实现同一个 `Component` 能力：每次 `dispatch` 都会按顺序执行
//! 匹配该操作的拦截器链，最后调用目标。每个操作的拦截器链在第一次调用时
//! 计算并缓存；运行时匹配器的判断留到调用时进行。
//!
//! 调用目标之前，代理按类型声明的操作表查找操作并检查实参个数，
//! 这两类失败由代理自己产生并包装为 `Failure`；目标返回的任何错误都原样透传。

use super::advisor::{Advisor, Interceptor};
use super::matcher::MethodMatcher;
use crate::beans::{Component, Operation, TypeDescriptor, Value};
use crate::errors::{BoxError, InvocationError};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Clone)]
enum ChainEntry {
    Static(Arc<dyn Interceptor>),
    /// 需要在调用时结合实参判断
    Dynamic {
        matcher: Arc<dyn MethodMatcher>,
        interceptor: Arc<dyn Interceptor>,
    },
}

/// 一次被拦截的调用
pub struct MethodInvocation<'a> {
    target: &'a Arc<dyn Component>,
    target_type: &'a TypeDescriptor,
    operation: &'a Operation,
    /// 操作是否在目标的操作表中（操作表为空时视为全部存在）
    declared: bool,
    arguments: Vec<Value>,
    chain: &'a [ChainEntry],
    index: usize,
}

impl<'a> MethodInvocation<'a> {
    pub fn operation(&self) -> &Operation {
        self.operation
    }

    pub fn target_type(&self) -> &TypeDescriptor {
        self.target_type
    }

    pub fn target(&self) -> &Arc<dyn Component> {
        self.target
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// 拦截器可以在继续调用前改写实参
    pub fn arguments_mut(&mut self) -> &mut Vec<Value> {
        &mut self.arguments
    }

    /// 执行链条中的下一个拦截器，链条结束后调用目标
    pub fn proceed(&mut self) -> Result<Value, InvocationError> {
        let chain = self.chain;
        while let Some(entry) = chain.get(self.index) {
            self.index += 1;
            match entry {
                ChainEntry::Static(interceptor) => return interceptor.invoke(self),
                ChainEntry::Dynamic {
                    matcher,
                    interceptor,
                } => {
                    if matcher.matches_with_args(self.operation, self.target_type, &self.arguments) {
                        return interceptor.invoke(self);
                    }
                    trace!(
                        operation = self.operation.name(),
                        interceptor = interceptor.name(),
                        "运行时匹配未通过，跳过拦截器"
                    );
                }
            }
        }
        self.invoke_target()
    }

    fn invoke_target(&self) -> Result<Value, InvocationError> {
        if let Some(err) = self.check_invocable() {
            return Err(InvocationError::Failure {
                operation: self.operation.name().to_string(),
                source: Box::new(err) as BoxError,
            });
        }
        self.target.dispatch(self.operation.name(), &self.arguments)
    }

    fn check_invocable(&self) -> Option<InvocationError> {
        if !self.declared {
            return Some(InvocationError::NoSuchOperation {
                type_name: self.target_type.name().to_string(),
                operation: self.operation.name().to_string(),
            });
        }
        match self.operation.arity() {
            Some(arity) if arity != self.arguments.len() => Some(InvocationError::illegal_arguments(
                self.operation.name(),
                format!("expected {} argument(s) but got {}", arity, self.arguments.len()),
            )),
            _ => None,
        }
    }
}

/// 拦截代理
pub struct AopProxy {
    target: Arc<dyn Component>,
    target_type: TypeDescriptor,
    operations: HashMap<String, Operation>,
    advisors: Vec<Arc<Advisor>>,
    chain_cache: DashMap<String, Arc<[ChainEntry]>>,
}

impl AopProxy {
    /// 用有序的顾问列表包装目标
    pub fn wrap(
        target: Arc<dyn Component>,
        target_type: TypeDescriptor,
        operations: &[Operation],
        advisors: Vec<Arc<Advisor>>,
    ) -> Arc<dyn Component> {
        Arc::new(Self {
            target,
            target_type,
            operations: operations
                .iter()
                .map(|operation| (operation.name().to_string(), operation.clone()))
                .collect(),
            advisors,
            chain_cache: DashMap::new(),
        })
    }

    pub fn target(&self) -> &Arc<dyn Component> {
        &self.target
    }

    pub fn target_type(&self) -> &TypeDescriptor {
        &self.target_type
    }

    pub fn advisors(&self) -> &[Arc<Advisor>] {
        &self.advisors
    }

    /// 未声明的操作以目标类型为声明类型、不带元数据
    fn operation(&self, name: &str) -> (Operation, bool) {
        match self.operations.get(name) {
            Some(operation) => (operation.clone(), true),
            None => (
                Operation::new(name, self.target_type.name().clone()),
                self.operations.is_empty(),
            ),
        }
    }

    fn chain_for(&self, operation: &Operation) -> Arc<[ChainEntry]> {
        if let Some(chain) = self.chain_cache.get(operation.name()) {
            return Arc::clone(chain.value());
        }
        let chain: Arc<[ChainEntry]> = self
            .advisors
            .iter()
            .filter(|advisor| {
                advisor
                    .pointcut()
                    .method_matcher()
                    .matches(operation, &self.target_type)
            })
            .map(|advisor| {
                let matcher = advisor.pointcut().method_matcher();
                let interceptor = Arc::clone(advisor.interceptor());
                if matcher.is_runtime() {
                    ChainEntry::Dynamic {
                        matcher: Arc::clone(matcher),
                        interceptor,
                    }
                } else {
                    ChainEntry::Static(interceptor)
                }
            })
            .collect();
        self.chain_cache
            .insert(operation.name().to_string(), Arc::clone(&chain));
        chain
    }
}

impl Component for AopProxy {
    fn set_property(&self, name: &str, value: Value) -> Result<(), BoxError> {
        self.target.set_property(name, value)
    }

    fn dispatch(&self, operation: &str, args: &[Value]) -> Result<Value, InvocationError> {
        let (operation, declared) = self.operation(operation);
        let chain = self.chain_for(&operation);
        let mut invocation = MethodInvocation {
            target: &self.target,
            target_type: &self.target_type,
            operation: &operation,
            declared,
            arguments: args.to_vec(),
            chain: &chain,
            index: 0,
        };
        invocation.proceed()
    }
}

/// 组件是否是拦截代理
pub fn is_proxy(component: &Arc<dyn Component>) -> bool {
    crate::beans::downcast_component::<AopProxy>(component).is_some()
}

/// 取出代理背后的目标；不是代理时返回自身
pub fn target_of(component: &Arc<dyn Component>) -> Arc<dyn Component> {
    match crate::beans::downcast_component::<AopProxy>(component) {
        Some(proxy) => Arc::clone(proxy.target()),
        None => Arc::clone(component),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aop::advisor::{FnInterceptor, Pointcut};
    use crate::aop::matcher::{ArgumentEqualsMatcher, NameMatcher, TrueMatcher};
    use parking_lot::Mutex;

    struct Echo;

    impl Component for Echo {
        fn dispatch(&self, operation: &str, args: &[Value]) -> Result<Value, InvocationError> {
            match operation {
                "echo" => Ok(args.first().cloned().unwrap_or(Value::Unit)),
                _ => Err(InvocationError::NoSuchOperation {
                    type_name: "Echo".to_string(),
                    operation: operation.to_string(),
                }),
            }
        }
    }

    fn recording(log: Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn Interceptor> {
        Arc::new(FnInterceptor::new(name, move |invocation: &mut MethodInvocation<'_>| {
            log.lock().push(name.to_string());
            invocation.proceed()
        }))
    }

    #[test]
    fn test_chain_is_cached_per_operation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let advisor = Arc::new(Advisor::new(
            Pointcut::for_methods(Arc::new(NameMatcher::new(&["echo"]))),
            recording(log.clone(), "a"),
        ));
        let proxy = AopProxy::wrap(Arc::new(Echo), TypeDescriptor::new("Echo"), &[], vec![advisor]);

        assert_eq!(proxy.dispatch("echo", &[Value::Int(1)]).unwrap(), Value::Int(1));
        assert_eq!(proxy.dispatch("echo", &[Value::Int(2)]).unwrap(), Value::Int(2));
        assert_eq!(*log.lock(), vec!["a".to_string(), "a".to_string()]);

        let concrete = crate::beans::downcast_component::<AopProxy>(&proxy).unwrap();
        assert_eq!(concrete.chain_cache.len(), 1);
        assert!(is_proxy(&proxy));
    }

    #[test]
    fn test_runtime_matcher_is_checked_on_every_call() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let advisor = Arc::new(Advisor::new(
            Pointcut::for_methods(Arc::new(ArgumentEqualsMatcher::new(0, "audit"))),
            recording(log.clone(), "audit"),
        ));
        let proxy = AopProxy::wrap(Arc::new(Echo), TypeDescriptor::new("Echo"), &[], vec![advisor]);

        proxy.dispatch("echo", &[Value::from("plain")]).unwrap();
        assert!(log.lock().is_empty());
        proxy.dispatch("echo", &[Value::from("audit")]).unwrap();
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_undeclared_operation_becomes_invocation_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let advisor = Arc::new(Advisor::new(
            Pointcut::for_methods(Arc::new(TrueMatcher)),
            recording(log.clone(), "any"),
        ));
        let operations = [Operation::new("echo", "Echo")];
        let proxy = AopProxy::wrap(Arc::new(Echo), TypeDescriptor::new("Echo"), &operations, vec![advisor]);

        let err = proxy.dispatch("shout", &[]).unwrap_err();
        match err {
            InvocationError::Failure { operation, source } => {
                assert_eq!(operation, "shout");
                assert!(matches!(
                    source.downcast_ref::<InvocationError>(),
                    Some(InvocationError::NoSuchOperation { .. })
                ));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(*log.lock(), vec!["any".to_string()]);
    }

    #[test]
    fn test_target_errors_of_any_kind_pass_through() {
        // 操作表为空时不做查找，目标自己的 NoSuchOperation 原样返回
        let proxy = AopProxy::wrap(Arc::new(Echo), TypeDescriptor::new("Echo"), &[], Vec::new());
        assert!(matches!(
            proxy.dispatch("shout", &[]),
            Err(InvocationError::NoSuchOperation { .. })
        ));
    }

    #[test]
    fn test_interceptor_can_rewrite_arguments() {
        let advisor = Arc::new(Advisor::new(
            Pointcut::for_methods(Arc::new(TrueMatcher)),
            Arc::new(FnInterceptor::new("upper", |invocation: &mut MethodInvocation<'_>| {
                if let Some(Value::Str(text)) = invocation.arguments_mut().first_mut() {
                    *text = text.to_uppercase();
                }
                invocation.proceed()
            })),
        ));
        let proxy = AopProxy::wrap(Arc::new(Echo), TypeDescriptor::new("Echo"), &[], vec![advisor]);
        assert_eq!(proxy.dispatch("echo", &[Value::from("hi")]).unwrap(), Value::from("HI"));
        assert!(!is_proxy(&target_of(&proxy)));
    }
}
