//! 组件类型描述
//!
//! Rust 没有运行时反射，因此组件的构造器、工厂方法、能力（接口）以及
//! 操作元数据都在注册时显式声明，由 `TypeRegistry` 统一保存。

use super::component::{Args, Component};
use crate::errors::BoxError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// 类字面量的运行时类型名
pub const TYPE_LITERAL: &str = "type";

/// 驻留的类型名称
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(Arc<str>);

impl TypeRef {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({})", self.0)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TypeRef {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

/// 类过滤器看到的类型信息：名称加能力集合
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    name: TypeRef,
    capabilities: BTreeSet<String>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<TypeRef>) -> Self {
        Self {
            name: name.into(),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.insert(capability.to_string());
        self
    }

    pub fn name(&self) -> &TypeRef {
        &self.name
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.capabilities.iter().map(String::as_str)
    }

    /// 类型名本身或任一声明的能力与之相同
    pub fn has_capability(&self, capability: &str) -> bool {
        self.name.name() == capability || self.capabilities.contains(capability)
    }
}

/// 可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    NonPublic,
}

/// 参与构造器/工厂方法排序的候选
pub trait Ranked {
    fn visibility(&self) -> Visibility;
    fn param_count(&self) -> usize;
}

impl<R: Ranked + ?Sized> Ranked for &R {
    fn visibility(&self) -> Visibility {
        (**self).visibility()
    }

    fn param_count(&self) -> usize {
        (**self).param_count()
    }
}

/// 可被容器调用的构造器或工厂方法
pub trait Executable: Ranked {
    fn owner(&self) -> &TypeRef;
    /// 用于缓存与错误信息的签名
    fn signature(&self) -> String;
    /// 注册时声明的参数名（“调试元数据”），缺失为 `None`
    fn declared_parameter_names(&self) -> Vec<Option<String>>;
    /// 用于按能力自动装配的参数类型；类型变量无法装配
    fn autowire_type(&self, index: usize) -> Option<TypeRef>;
}

pub type BuildFn = Arc<dyn Fn(&Args<'_>) -> Result<Arc<dyn Component>, BoxError> + Send + Sync>;
pub type FactoryFn = Arc<
    dyn Fn(Option<&Arc<dyn Component>>, &Args<'_>) -> Result<Arc<dyn Component>, BoxError>
        + Send
        + Sync,
>;

/// 构造器参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub ty: TypeRef,
    pub name: Option<String>,
}

impl ParamSpec {
    pub fn new(ty: &str) -> Self {
        Self {
            ty: TypeRef::new(ty),
            name: None,
        }
    }

    pub fn named(name: &str, ty: &str) -> Self {
        Self {
            ty: TypeRef::new(ty),
            name: Some(name.to_string()),
        }
    }
}

/// 构造器
#[derive(Clone)]
pub struct Constructor {
    owner: TypeRef,
    index: usize,
    visibility: Visibility,
    params: Vec<ParamSpec>,
    build: BuildFn,
}

impl Constructor {
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn instantiate(&self, args: &Args<'_>) -> Result<Arc<dyn Component>, BoxError> {
        (self.build)(args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("signature", &self.signature())
            .field("visibility", &self.visibility)
            .finish()
    }
}

impl Ranked for Constructor {
    fn visibility(&self) -> Visibility {
        self.visibility
    }

    fn param_count(&self) -> usize {
        self.params.len()
    }
}

impl Executable for Constructor {
    fn owner(&self) -> &TypeRef {
        &self.owner
    }

    fn signature(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|p| p.ty.name()).collect();
        format!("{}::<init>#{}({})", self.owner, self.index, params.join(", "))
    }

    fn declared_parameter_names(&self) -> Vec<Option<String>> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    fn autowire_type(&self, index: usize) -> Option<TypeRef> {
        self.params.get(index).map(|p| p.ty.clone())
    }
}

/// 泛型感知的类型表达
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GenericType {
    Concrete(TypeRef),
    /// 类型变量，例如 `T`
    Var(String),
    /// 参数化类型，例如 `Class<T>`
    Parameterized { raw: TypeRef, args: Vec<GenericType> },
}

impl GenericType {
    pub fn concrete(name: &str) -> Self {
        GenericType::Concrete(TypeRef::new(name))
    }

    pub fn var(name: &str) -> Self {
        GenericType::Var(name.to_string())
    }

    pub fn parameterized(raw: &str, args: Vec<GenericType>) -> Self {
        GenericType::Parameterized {
            raw: TypeRef::new(raw),
            args,
        }
    }

    /// 擦除后的类型
    pub fn erased(&self) -> Option<TypeRef> {
        match self {
            GenericType::Concrete(ty) => Some(ty.clone()),
            GenericType::Parameterized { raw, .. } => Some(raw.clone()),
            GenericType::Var(_) => None,
        }
    }
}

/// 工厂方法
#[derive(Clone)]
pub struct FactoryMethod {
    owner: TypeRef,
    name: String,
    visibility: Visibility,
    is_static: bool,
    type_params: Vec<String>,
    params: Vec<GenericType>,
    param_names: Vec<Option<String>>,
    return_type: GenericType,
    erased_return: TypeRef,
    invoke: FactoryFn,
}

impl FactoryMethod {
    /// 新建一个公开的静态工厂方法
    pub fn new<F>(name: &str, return_type: GenericType, erased_return: &str, invoke: F) -> Self
    where
        F: Fn(Option<&Arc<dyn Component>>, &Args<'_>) -> Result<Arc<dyn Component>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            owner: TypeRef::new(""),
            name: name.to_string(),
            visibility: Visibility::Public,
            is_static: true,
            type_params: Vec::new(),
            params: Vec::new(),
            param_names: Vec::new(),
            return_type,
            erased_return: TypeRef::new(erased_return),
            invoke: Arc::new(invoke),
        }
    }

    pub fn non_public(mut self) -> Self {
        self.visibility = Visibility::NonPublic;
        self
    }

    /// 实例工厂方法，需要 `factory_bean`
    pub fn instance(mut self) -> Self {
        self.is_static = false;
        self
    }

    /// 声明在方法自身上的类型参数
    pub fn type_param(mut self, name: &str) -> Self {
        self.type_params.push(name.to_string());
        self
    }

    pub fn param(mut self, ty: GenericType) -> Self {
        self.params.push(ty);
        self.param_names.push(None);
        self
    }

    pub fn named_param(mut self, name: &str, ty: GenericType) -> Self {
        self.params.push(ty);
        self.param_names.push(Some(name.to_string()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn type_params(&self) -> &[String] {
        &self.type_params
    }

    pub fn param_types(&self) -> &[GenericType] {
        &self.params
    }

    pub fn return_type(&self) -> &GenericType {
        &self.return_type
    }

    pub fn erased_return(&self) -> &TypeRef {
        &self.erased_return
    }

    pub fn invoke(
        &self,
        factory: Option<&Arc<dyn Component>>,
        args: &Args<'_>,
    ) -> Result<Arc<dyn Component>, BoxError> {
        (self.invoke)(factory, args)
    }
}

impl fmt::Debug for FactoryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryMethod")
            .field("signature", &self.signature())
            .field("visibility", &self.visibility)
            .field("static", &self.is_static)
            .finish()
    }
}

impl Ranked for FactoryMethod {
    fn visibility(&self) -> Visibility {
        self.visibility
    }

    fn param_count(&self) -> usize {
        self.params.len()
    }
}

impl Executable for FactoryMethod {
    fn owner(&self) -> &TypeRef {
        &self.owner
    }

    fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| format!("{:?}", p)).collect();
        format!("{}::{}({})", self.owner, self.name, params.join(", "))
    }

    fn declared_parameter_names(&self) -> Vec<Option<String>> {
        self.param_names.clone()
    }

    fn autowire_type(&self, index: usize) -> Option<TypeRef> {
        self.params.get(index).and_then(GenericType::erased)
    }
}

/// 组件声明的操作及其元数据（取代注解）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operation {
    name: String,
    declaring_type: TypeRef,
    attributes: BTreeMap<String, String>,
    /// 声明的参数个数；未声明时不做检查
    arity: Option<usize>,
}

impl Operation {
    pub fn new(name: &str, declaring_type: impl Into<TypeRef>) -> Self {
        Self {
            name: name.to_string(),
            declaring_type: declaring_type.into(),
            attributes: BTreeMap::new(),
            arity: None,
        }
    }

    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declaring_type(&self) -> &TypeRef {
        &self.declaring_type
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// 已注册的组件类型
pub struct ComponentType {
    descriptor: TypeDescriptor,
    constructors: Vec<Constructor>,
    factory_methods: Vec<FactoryMethod>,
    operations: Vec<Operation>,
}

impl ComponentType {
    pub fn builder(name: &str) -> ComponentTypeBuilder {
        ComponentTypeBuilder {
            ty: ComponentType {
                descriptor: TypeDescriptor::new(name),
                constructors: Vec::new(),
                factory_methods: Vec::new(),
                operations: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &TypeRef {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    pub fn factory_methods(&self) -> &[FactoryMethod] {
        &self.factory_methods
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.name() == name)
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentType")
            .field("descriptor", &self.descriptor)
            .field("constructors", &self.constructors)
            .field("factory_methods", &self.factory_methods)
            .field("operations", &self.operations)
            .finish()
    }
}

pub struct ComponentTypeBuilder {
    ty: ComponentType,
}

impl ComponentTypeBuilder {
    pub fn capability(mut self, capability: &str) -> Self {
        self.ty.descriptor = self.ty.descriptor.with_capability(capability);
        self
    }

    pub fn constructor<F>(self, visibility: Visibility, params: &[&str], build: F) -> Self
    where
        F: Fn(&Args<'_>) -> Result<Arc<dyn Component>, BoxError> + Send + Sync + 'static,
    {
        let params = params.iter().map(|ty| ParamSpec::new(ty)).collect();
        self.constructor_with(visibility, params, build)
    }

    /// 带参数名的构造器，参数以 `(名称, 类型)` 给出
    pub fn named_constructor<F>(self, visibility: Visibility, params: &[(&str, &str)], build: F) -> Self
    where
        F: Fn(&Args<'_>) -> Result<Arc<dyn Component>, BoxError> + Send + Sync + 'static,
    {
        let params = params
            .iter()
            .map(|(name, ty)| ParamSpec::named(name, ty))
            .collect();
        self.constructor_with(visibility, params, build)
    }

    fn constructor_with<F>(mut self, visibility: Visibility, params: Vec<ParamSpec>, build: F) -> Self
    where
        F: Fn(&Args<'_>) -> Result<Arc<dyn Component>, BoxError> + Send + Sync + 'static,
    {
        let index = self.ty.constructors.len();
        self.ty.constructors.push(Constructor {
            owner: self.ty.descriptor.name().clone(),
            index,
            visibility,
            params,
            build: Arc::new(build),
        });
        self
    }

    pub fn factory_method(mut self, mut method: FactoryMethod) -> Self {
        method.owner = self.ty.descriptor.name().clone();
        self.ty.factory_methods.push(method);
        self
    }

    pub fn operation(self, name: &str) -> Self {
        self.operation_with(name, &[])
    }

    pub fn operation_with(mut self, name: &str, attributes: &[(&str, &str)]) -> Self {
        let mut operation = Operation::new(name, self.ty.descriptor.name().clone());
        for (key, value) in attributes {
            operation = operation.with_attribute(key, value);
        }
        self.ty.operations.push(operation);
        self
    }

    /// 声明参数个数的操作，代理在调用目标前检查实参数量
    pub fn operation_taking(mut self, name: &str, arity: usize) -> Self {
        let operation = Operation::new(name, self.ty.descriptor.name().clone()).with_arity(arity);
        self.ty.operations.push(operation);
        self
    }

    pub fn build(self) -> ComponentType {
        self.ty
    }
}

/// 类型注册表
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<TypeRef, Arc<ComponentType>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册类型；同名类型会被替换
    pub fn register(&self, component_type: ComponentType) {
        let name = component_type.name().clone();
        self.types.write().insert(name, Arc::new(component_type));
    }

    pub fn get(&self, name: &TypeRef) -> Option<Arc<ComponentType>> {
        self.types.read().get(name).cloned()
    }

    /// 未注册的类型只有名称，没有能力
    pub fn descriptor(&self, name: &TypeRef) -> TypeDescriptor {
        self.get(name)
            .map(|ty| ty.descriptor().clone())
            .unwrap_or_else(|| TypeDescriptor::new(name.clone()))
    }

    /// 按名称解析类型：已注册的组件类型或内建的简单值类型
    pub fn resolve_name(&self, name: &str) -> Option<TypeRef> {
        let ty = TypeRef::new(name);
        if self.types.read().contains_key(&ty) || is_builtin(name) {
            Some(ty)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

fn is_builtin(name: &str) -> bool {
    matches!(name, "bool" | "i64" | "f64" | "String" | "Vec" | TYPE_LITERAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_capabilities() {
        let descriptor = TypeDescriptor::new("JdbcOrderRepository").with_capability("OrderRepository");
        assert!(descriptor.has_capability("OrderRepository"));
        assert!(descriptor.has_capability("JdbcOrderRepository"));
        assert!(!descriptor.has_capability("Clock"));
    }

    #[test]
    fn test_builder_assigns_owner_and_signature() {
        let ty = ComponentType::builder("Clock")
            .constructor(Visibility::Public, &["i64"], |_| Err("unused".into()))
            .operation_with("now", &[("cacheable", "true")])
            .operation_taking("advance", 1)
            .build();

        assert_eq!(ty.constructors()[0].signature(), "Clock::<init>#0(i64)");
        assert_eq!(ty.operation("now").and_then(|op| op.attribute("cacheable")), Some("true"));
        assert_eq!(ty.operation("now").map(|op| op.declaring_type().name()), Some("Clock"));
        assert_eq!(ty.operation("now").and_then(Operation::arity), None);
        assert_eq!(ty.operation("advance").and_then(Operation::arity), Some(1));
    }

    #[test]
    fn test_registry_resolves_builtin_and_registered_names() {
        let registry = TypeRegistry::new();
        registry.register(ComponentType::builder("Clock").build());

        assert_eq!(registry.resolve_name("Clock"), Some(TypeRef::new("Clock")));
        assert_eq!(registry.resolve_name("String"), Some(TypeRef::new("String")));
        assert_eq!(registry.resolve_name("Missing"), None);
        assert!(registry.descriptor(&TypeRef::new("Missing")).capabilities().next().is_none());
    }
}
