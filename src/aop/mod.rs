//! 方法拦截
//!
//! - `matcher`: 方法匹配器、类过滤器及其并/交组合
//! - `advisor`: 切点、拦截器、顾问与顾问注册表
//! - `proxy`: 按顾问顺序执行拦截器链的代理

pub mod advisor;
pub mod matcher;
pub mod proxy;

pub use advisor::{Advisor, AdvisorRegistry, FnInterceptor, Interceptor, Pointcut};
pub use matcher::{ClassFilter, MethodMatcher};
pub use proxy::{is_proxy, target_of, AopProxy, MethodInvocation};
