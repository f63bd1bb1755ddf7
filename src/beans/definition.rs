//! 组件定义与定义注册表

use super::types::TypeRef;
use super::value::Value;
use crate::errors::ContainerError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 组件作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// 每个容器一个实例
    #[default]
    Singleton,
    /// 每次解析创建新实例
    PerRequest,
}

/// 依赖的来源
#[derive(Debug, Clone)]
pub enum DependencyRef {
    Literal(Value),
    /// 按 id 引用另一个组件
    Reference(String),
    /// 按能力自动装配
    Autowire(String),
}

impl DependencyRef {
    pub fn literal(value: impl Into<Value>) -> Self {
        DependencyRef::Literal(value.into())
    }

    pub fn reference(id: &str) -> Self {
        DependencyRef::Reference(id.to_string())
    }

    pub fn autowire(capability: &str) -> Self {
        DependencyRef::Autowire(capability.to_string())
    }

    /// 引用的组件 id
    pub fn referenced_id(&self) -> Option<&str> {
        match self {
            DependencyRef::Reference(id) => Some(id),
            _ => None,
        }
    }
}

/// 依赖注入的位置
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingTarget {
    /// 构造器/工厂方法的参数位置
    Index(usize),
    /// 构造器/工厂方法的参数名
    Named(String),
    /// 属性（setter）注入
    Property(String),
}

impl BindingTarget {
    pub fn is_constructor(&self) -> bool {
        !matches!(self, BindingTarget::Property(_))
    }
}

impl fmt::Display for BindingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingTarget::Index(index) => write!(f, "constructor argument {}", index),
            BindingTarget::Named(name) => write!(f, "constructor argument '{}'", name),
            BindingTarget::Property(name) => write!(f, "property '{}'", name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub target: BindingTarget,
    pub dependency: DependencyRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryMethodRef {
    pub name: String,
    /// 实例工厂方法所在的组件 id；`None` 表示静态工厂方法
    pub factory_bean: Option<String>,
}

/// 组件定义
#[derive(Debug, Clone)]
pub struct Definition {
    id: String,
    type_ref: TypeRef,
    scope: Scope,
    bindings: Vec<Binding>,
    factory_method: Option<FactoryMethodRef>,
    lazy: bool,
    primary: bool,
    autowire_constructor: bool,
    interception_eligible: bool,
    advisor_chain: Option<String>,
    description: Option<String>,
    defined_in: Option<String>,
}

impl Definition {
    /// 默认单例、非延迟、不拦截
    pub fn new(id: &str, type_name: &str) -> Self {
        Self {
            id: id.to_string(),
            type_ref: TypeRef::new(type_name),
            scope: Scope::Singleton,
            bindings: Vec::new(),
            factory_method: None,
            lazy: false,
            primary: false,
            autowire_constructor: false,
            interception_eligible: false,
            advisor_chain: None,
            description: None,
            defined_in: None,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn per_request(self) -> Self {
        self.with_scope(Scope::PerRequest)
    }

    pub fn constructor_arg(mut self, index: usize, dependency: DependencyRef) -> Self {
        self.bindings.push(Binding {
            target: BindingTarget::Index(index),
            dependency,
        });
        self
    }

    pub fn named_arg(mut self, name: &str, dependency: DependencyRef) -> Self {
        self.bindings.push(Binding {
            target: BindingTarget::Named(name.to_string()),
            dependency,
        });
        self
    }

    pub fn property(mut self, name: &str, dependency: DependencyRef) -> Self {
        self.bindings.push(Binding {
            target: BindingTarget::Property(name.to_string()),
            dependency,
        });
        self
    }

    pub fn binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// 静态工厂方法
    pub fn with_factory_method(mut self, name: &str) -> Self {
        self.factory_method = Some(FactoryMethodRef {
            name: name.to_string(),
            factory_bean: None,
        });
        self
    }

    /// 另一个组件上的实例工厂方法
    pub fn with_factory_bean(mut self, factory_bean: &str, method: &str) -> Self {
        self.factory_method = Some(FactoryMethodRef {
            name: method.to_string(),
            factory_bean: Some(factory_bean.to_string()),
        });
        self
    }

    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn autowire_constructor(mut self) -> Self {
        self.autowire_constructor = true;
        self
    }

    pub fn intercepted(mut self) -> Self {
        self.interception_eligible = true;
        self
    }

    /// 使用命名的顾问链而不是全局顾问
    pub fn with_advisor_chain(mut self, chain: &str) -> Self {
        self.interception_eligible = true;
        self.advisor_chain = Some(chain.to_string());
        self
    }

    pub fn described_as(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// 定义来源（例如配置文件路径），用于错误信息
    pub fn defined_in(mut self, source: &str) -> Self {
        self.defined_in = Some(source.to_string());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_singleton(&self) -> bool {
        self.scope == Scope::Singleton
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn constructor_bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(|b| b.target.is_constructor())
    }

    pub fn property_bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(|b| !b.target.is_constructor())
    }

    pub fn factory_method(&self) -> Option<&FactoryMethodRef> {
        self.factory_method.as_ref()
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn autowires_constructor(&self) -> bool {
        self.autowire_constructor
    }

    pub fn is_interception_eligible(&self) -> bool {
        self.interception_eligible
    }

    pub fn advisor_chain(&self) -> Option<&str> {
        self.advisor_chain.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.defined_in.as_deref()
    }
}

#[derive(Default)]
struct RegistryInner {
    definitions: HashMap<String, Arc<Definition>>,
    order: Vec<String>,
}

/// 定义注册表，保留注册顺序
#[derive(Default)]
pub struct DefinitionRegistry {
    inner: RwLock<RegistryInner>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: Definition) -> Result<(), ContainerError> {
        let mut inner = self.inner.write();
        if inner.definitions.contains_key(definition.id()) {
            return Err(ContainerError::DuplicateDefinition(definition.id().to_string()));
        }
        let id = definition.id().to_string();
        inner.order.push(id.clone());
        inner.definitions.insert(id, Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Definition>> {
        self.inner.read().definitions.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().definitions.contains_key(id)
    }

    /// 按注册顺序返回所有 id
    pub fn ids(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    /// 按注册顺序返回所有定义
    pub fn definitions(&self) -> Vec<Arc<Definition>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.definitions.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_rejects_duplicates_and_keeps_order() {
        let registry = DefinitionRegistry::new();
        registry.register(Definition::new("b", "B")).unwrap();
        registry.register(Definition::new("a", "A")).unwrap();

        let err = registry.register(Definition::new("b", "Other")).unwrap_err();
        assert!(matches!(err, ContainerError::DuplicateDefinition(ref id) if id == "b"));
        assert_eq!(registry.ids(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(registry.get("b").map(|d| d.type_ref().name().to_string()), Some("B".to_string()));
    }

    #[test]
    fn test_bindings_split_by_target() {
        let definition = Definition::new("service", "Service")
            .constructor_arg(0, DependencyRef::reference("repo"))
            .named_arg("timeout", DependencyRef::literal(30))
            .property("clock", DependencyRef::autowire("Clock"));

        assert_eq!(definition.constructor_bindings().count(), 2);
        assert_eq!(definition.property_bindings().count(), 1);
        assert!(definition.is_singleton());
        assert!(!definition.is_interception_eligible());
    }

    #[test]
    fn test_scope_deserializes_kebab_case() {
        #[derive(Deserialize)]
        struct Holder {
            scope: Scope,
        }
        let holder: Holder = toml::from_str("scope = \"per-request\"").unwrap();
        assert_eq!(holder.scope, Scope::PerRequest);
    }
}
