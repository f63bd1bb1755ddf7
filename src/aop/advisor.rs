//! 切点、拦截器与顾问

use super::matcher::{
    intersect_filters, intersection, union_filters, union_with_filters, ClassFilter, MethodMatcher,
    TrueClassFilter,
};
use super::proxy::MethodInvocation;
use crate::beans::{TypeDescriptor, Value};
use crate::errors::InvocationError;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// 环绕拦截器；调用 `invocation.proceed()` 继续执行链条
pub trait Interceptor: Send + Sync {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> Result<Value, InvocationError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 以闭包实现的拦截器
pub struct FnInterceptor<F> {
    name: String,
    f: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(&mut MethodInvocation<'_>) -> Result<Value, InvocationError> + Send + Sync,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
        }
    }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(&mut MethodInvocation<'_>) -> Result<Value, InvocationError> + Send + Sync,
{
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> Result<Value, InvocationError> {
        (self.f)(invocation)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 切点：类过滤器 + 方法匹配器
#[derive(Debug, Clone)]
pub struct Pointcut {
    class_filter: Arc<dyn ClassFilter>,
    method_matcher: Arc<dyn MethodMatcher>,
}

impl PartialEq for Pointcut {
    fn eq(&self, other: &Self) -> bool {
        *self.class_filter == *other.class_filter && *self.method_matcher == *other.method_matcher
    }
}

impl Eq for Pointcut {}

impl Hash for Pointcut {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class_filter.hash(state);
        self.method_matcher.hash(state);
    }
}

impl Pointcut {
    pub fn new(class_filter: Arc<dyn ClassFilter>, method_matcher: Arc<dyn MethodMatcher>) -> Self {
        Self {
            class_filter,
            method_matcher,
        }
    }

    /// 对所有类型生效
    pub fn for_methods(method_matcher: Arc<dyn MethodMatcher>) -> Self {
        Self::new(Arc::new(TrueClassFilter), method_matcher)
    }

    pub fn class_filter(&self) -> &Arc<dyn ClassFilter> {
        &self.class_filter
    }

    pub fn method_matcher(&self) -> &Arc<dyn MethodMatcher> {
        &self.method_matcher
    }

    /// 并集：每一侧的方法匹配器只在自己的类过滤器接受目标时生效
    pub fn union(&self, other: &Pointcut) -> Pointcut {
        Pointcut {
            class_filter: union_filters(self.class_filter.clone(), other.class_filter.clone()),
            method_matcher: union_with_filters(
                self.method_matcher.clone(),
                self.class_filter.clone(),
                other.method_matcher.clone(),
                other.class_filter.clone(),
            ),
        }
    }

    pub fn intersection(&self, other: &Pointcut) -> Pointcut {
        Pointcut {
            class_filter: intersect_filters(self.class_filter.clone(), other.class_filter.clone()),
            method_matcher: intersection(self.method_matcher.clone(), other.method_matcher.clone()),
        }
    }
}

/// 顾问：切点 + 拦截器
///
/// 相等性由切点的结构相等与拦截器实例的身份共同决定。
#[derive(Clone)]
pub struct Advisor {
    pointcut: Pointcut,
    interceptor: Arc<dyn Interceptor>,
}

impl Advisor {
    pub fn new(pointcut: Pointcut, interceptor: Arc<dyn Interceptor>) -> Self {
        Self {
            pointcut,
            interceptor,
        }
    }

    pub fn pointcut(&self) -> &Pointcut {
        &self.pointcut
    }

    pub fn interceptor(&self) -> &Arc<dyn Interceptor> {
        &self.interceptor
    }

    fn interceptor_address(&self) -> *const () {
        Arc::as_ptr(&self.interceptor) as *const ()
    }
}

impl fmt::Debug for Advisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advisor")
            .field("pointcut", &self.pointcut)
            .field("interceptor", &self.interceptor.name())
            .finish()
    }
}

impl PartialEq for Advisor {
    fn eq(&self, other: &Self) -> bool {
        self.pointcut == other.pointcut && self.interceptor_address() == other.interceptor_address()
    }
}

impl Eq for Advisor {}

impl Hash for Advisor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pointcut.hash(state);
        self.interceptor_address().hash(state);
    }
}

/// 顾问注册表：全局顾问与命名顾问链
#[derive(Default)]
pub struct AdvisorRegistry {
    global: RwLock<Vec<Arc<Advisor>>>,
    chains: RwLock<HashMap<String, Vec<Arc<Advisor>>>>,
}

impl AdvisorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_global(&self, advisor: Arc<Advisor>) {
        self.global.write().push(advisor);
    }

    pub fn register_chain(&self, name: &str, advisors: Vec<Arc<Advisor>>) {
        self.chains.write().insert(name.to_string(), advisors);
    }

    pub fn global(&self) -> Vec<Arc<Advisor>> {
        self.global.read().clone()
    }

    pub fn chain(&self, name: &str) -> Option<Vec<Arc<Advisor>>> {
        self.chains.read().get(name).cloned()
    }

    /// 按类过滤器筛选并去重，保持原有顺序
    pub fn applicable(candidates: &[Arc<Advisor>], target: &TypeDescriptor) -> Vec<Arc<Advisor>> {
        let mut seen: HashSet<&Advisor> = HashSet::new();
        let mut applicable = Vec::new();
        for advisor in candidates {
            if advisor.pointcut().class_filter().accepts(target) && seen.insert(&**advisor) {
                applicable.push(Arc::clone(advisor));
            }
        }
        applicable
    }
}
