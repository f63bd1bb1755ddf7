//! 参数名解析
//!
//! 具名依赖绑定需要知道构造器/工厂方法的参数名。多个解析器按优先级
//! 组合，第一个能给出完整名称列表的解析器生效。

use super::types::Executable;
use dashmap::DashMap;
use std::sync::Arc;

pub trait NameResolver: Send + Sync {
    /// 返回每个参数的名称；无法确定的位置为 `None`
    fn parameter_names(&self, executable: &dyn Executable) -> Vec<Option<String>>;
}

/// 使用注册时声明的参数名
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredNameResolver;

impl NameResolver for DeclaredNameResolver {
    fn parameter_names(&self, executable: &dyn Executable) -> Vec<Option<String>> {
        executable.declared_parameter_names()
    }
}

/// 按位置生成 `arg0`、`arg1` …
#[derive(Debug, Default, Clone, Copy)]
pub struct PositionalNameResolver;

impl NameResolver for PositionalNameResolver {
    fn parameter_names(&self, executable: &dyn Executable) -> Vec<Option<String>> {
        (0..executable.param_count())
            .map(|index| Some(format!("arg{}", index)))
            .collect()
    }
}

/// 按优先级组合多个解析器，并按签名缓存结果
#[derive(Default)]
pub struct PrioritizedNameResolver {
    resolvers: Vec<Arc<dyn NameResolver>>,
    cache: DashMap<String, Vec<Option<String>>>,
}

impl PrioritizedNameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    fn resolve_uncached(&self, executable: &dyn Executable) -> Vec<Option<String>> {
        for resolver in &self.resolvers {
            let names = resolver.parameter_names(executable);
            if names.len() == executable.param_count() && names.iter().all(Option::is_some) {
                return names;
            }
        }
        vec![None; executable.param_count()]
    }
}

impl NameResolver for PrioritizedNameResolver {
    fn parameter_names(&self, executable: &dyn Executable) -> Vec<Option<String>> {
        let key = executable.signature();
        if let Some(names) = self.cache.get(&key) {
            return names.clone();
        }
        let names = self.resolve_uncached(executable);
        self.cache.insert(key, names.clone());
        names
    }
}

/// 容器默认使用的解析器：先取声明的名称，再退回到位置名称
pub fn default_name_resolver() -> Arc<dyn NameResolver> {
    Arc::new(
        PrioritizedNameResolver::new()
            .with(Arc::new(DeclaredNameResolver))
            .with(Arc::new(PositionalNameResolver)),
    )
}
