//! 组件容器
//!
//! 组件类型在注册时显式声明构造器、工厂方法、能力与操作；
//! 定义描述如何装配一个组件；容器负责按定义创建、缓存并在需要时代理组件。

pub mod autowire;
pub mod component;
pub mod container;
pub mod definition;
pub mod graph;
pub mod name_resolver;
pub mod types;
pub mod value;

pub use component::{downcast_component, same_instance, Args, AsAny, Component};
pub use container::{Container, ContainerBuilder, ContainerSettings, ContainerStats};
pub use definition::{
    Binding, BindingTarget, Definition, DefinitionRegistry, DependencyRef, FactoryMethodRef, Scope,
};
pub use name_resolver::{
    default_name_resolver, DeclaredNameResolver, NameResolver, PositionalNameResolver,
    PrioritizedNameResolver,
};
pub use types::{
    ComponentType, ComponentTypeBuilder, Constructor, Executable, FactoryMethod, GenericType,
    Operation, ParamSpec, Ranked, TypeDescriptor, TypeRef, TypeRegistry, Visibility,
};
pub use value::Value;
