//! 组件容器
//!
//! - 单例按 id 缓存，并发解析只会创建一次
//! - 创建登记（谁在创建哪个 id、早期引用、依赖关系）由一把互斥锁保护，
//!   锁只在登记期间持有，构造器与属性注入在锁外执行
//! - 同一单例的并发解析者在条件变量上等待首个创建者完成；
//!   跨线程互相等待时改为使用早期引用，没有早期引用则报告循环引用
//! - 已实例化但尚未完成属性注入的单例会登记“早期引用”，
//!   以打破仅由属性注入构成的循环依赖；创建失败时，
//!   拿到过早期引用的已缓存组件会被连带移出缓存

use super::autowire::{resolve_factory_return_type, sort_by_preference};
use super::component::{Args, AsAny, Component};
use super::definition::{
    Binding, BindingTarget, Definition, DefinitionRegistry, DependencyRef, FactoryMethodRef,
};
use super::name_resolver::{default_name_resolver, NameResolver};
use super::types::{ComponentType, Executable, FactoryMethod, Ranked, TypeRef, TypeRegistry};
use super::value::Value;
use crate::aop::{Advisor, AdvisorRegistry, AopProxy};
use crate::errors::{BoxError, ContainerError, CreationFailure};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, trace};

/// 容器设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// 是否允许通过早期引用打破属性注入的循环依赖
    pub allow_circular_references: bool,
    /// `refresh` 时是否立即创建所有非延迟单例
    pub preinstantiate_singletons: bool,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            allow_circular_references: true,
            preinstantiate_singletons: true,
        }
    }
}

struct EarlyReference {
    raw: Arc<dyn Component>,
    /// 已经交给其他组件的引用（可能是代理），发布时必须复用
    exposed: Option<Arc<dyn Component>>,
    handed_out: bool,
}

#[derive(Default)]
struct CreationState {
    /// 正在创建的单例及其创建线程
    builders: HashMap<String, ThreadId>,
    /// 阻塞等待中的线程及其等待的单例
    waiting: HashMap<ThreadId, String>,
    /// 每个线程的创建栈，包括 per-request 组件
    in_creation: HashMap<ThreadId, Vec<String>>,
    early_references: HashMap<String, EarlyReference>,
    /// 被依赖的 id -> 解析时引用了它的组件
    dependents: HashMap<String, HashSet<String>>,
}

impl CreationState {
    fn enter(&mut self, thread: ThreadId, id: &str) {
        self.in_creation.entry(thread).or_default().push(id.to_string());
    }

    fn leave(&mut self, thread: ThreadId, id: &str) {
        if let Some(stack) = self.in_creation.get_mut(&thread) {
            if let Some(position) = stack.iter().rposition(|entry| entry == id) {
                stack.remove(position);
            }
            if stack.is_empty() {
                self.in_creation.remove(&thread);
            }
        }
    }

    fn is_creating(&self, thread: ThreadId, id: &str) -> bool {
        self.in_creation
            .get(&thread)
            .is_some_and(|stack| stack.iter().any(|entry| entry == id))
    }

    /// 沿“等待 -> 创建者”链查找，判断当前线程等待 `builder` 是否会形成死锁
    fn would_deadlock(&self, me: ThreadId, builder: ThreadId) -> bool {
        let mut seen = HashSet::new();
        let mut current = builder;
        while seen.insert(current) {
            if current == me {
                return true;
            }
            let Some(next) = self
                .waiting
                .get(&current)
                .and_then(|awaited| self.builders.get(awaited))
            else {
                return false;
            };
            current = *next;
        }
        false
    }

    fn early_status(&mut self, id: &str) -> InCreation {
        match self.early_references.get_mut(id) {
            Some(early) => {
                early.handed_out = true;
                match &early.exposed {
                    Some(exposed) => InCreation::Exposed(Arc::clone(exposed)),
                    None => InCreation::Raw(Arc::clone(&early.raw)),
                }
            }
            None => InCreation::Unresolvable,
        }
    }

    /// `id` 的全部传递依赖者，并清除相应的依赖记录
    fn take_transitive_dependents(&mut self, id: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut seen = HashSet::from([id.to_string()]);
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(next) = queue.pop_front() {
            for dependent in self.dependents.remove(&next).unwrap_or_default() {
                if seen.insert(dependent.clone()) {
                    found.push(dependent.clone());
                    queue.push_back(dependent);
                }
            }
        }
        found
    }
}

enum InCreation {
    Exposed(Arc<dyn Component>),
    Raw(Arc<dyn Component>),
    Unresolvable,
}

/// 内部容器统计信息（原子计数器）
#[derive(Default)]
struct InnerStats {
    total_resolutions: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
}

struct ContainerInner {
    settings: ContainerSettings,
    types: TypeRegistry,
    definitions: DefinitionRegistry,
    advisors: AdvisorRegistry,
    name_resolver: Arc<dyn NameResolver>,
    singletons: DashMap<String, Arc<dyn Component>>,
    creation: Mutex<CreationState>,
    creation_done: Condvar,
    stats: InnerStats,
}

/// 组件容器，克隆后共享同一份状态
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

/// 容器构建器
#[derive(Default)]
pub struct ContainerBuilder {
    settings: ContainerSettings,
    name_resolver: Option<Arc<dyn NameResolver>>,
}

impl ContainerBuilder {
    pub fn settings(mut self, settings: ContainerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn allow_circular_references(mut self, allow: bool) -> Self {
        self.settings.allow_circular_references = allow;
        self
    }

    pub fn name_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.name_resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Container {
        Container {
            inner: Arc::new(ContainerInner {
                settings: self.settings,
                types: TypeRegistry::new(),
                definitions: DefinitionRegistry::new(),
                advisors: AdvisorRegistry::new(),
                name_resolver: self.name_resolver.unwrap_or_else(default_name_resolver),
                singletons: DashMap::new(),
                creation: Mutex::new(CreationState::default()),
                creation_done: Condvar::new(),
                stats: InnerStats::default(),
            }),
        }
    }
}

impl Container {
    /// 创建使用默认设置的容器
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.inner.settings
    }

    /// 注册组件类型
    pub fn register_type(&self, component_type: ComponentType) {
        self.inner.types.register(component_type);
    }

    /// 注册组件定义，id 重复时失败
    pub fn register_definition(&self, definition: Definition) -> Result<(), ContainerError> {
        debug!(id = definition.id(), ty = %definition.type_ref(), scope = ?definition.scope(), "注册组件定义");
        self.inner.definitions.register(definition)
    }

    pub fn register_definitions(
        &self,
        definitions: impl IntoIterator<Item = Definition>,
    ) -> Result<(), ContainerError> {
        definitions
            .into_iter()
            .try_for_each(|definition| self.register_definition(definition))
    }

    /// 添加对所有未指定顾问链的可拦截组件生效的顾问
    pub fn add_advisor(&self, advisor: Arc<Advisor>) {
        self.inner.advisors.add_global(advisor);
    }

    /// 注册命名顾问链
    pub fn register_advisor_chain(&self, name: &str, advisors: Vec<Arc<Advisor>>) {
        self.inner.advisors.register_chain(name, advisors);
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.inner.types
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.inner.definitions
    }

    pub fn contains_definition(&self, id: &str) -> bool {
        self.inner.definitions.contains(id)
    }

    /// 单例是否已经创建并缓存
    pub fn is_singleton_cached(&self, id: &str) -> bool {
        self.inner.singletons.contains_key(id)
    }

    /// 当前线程正在创建的组件（只在创建回调内部非空）
    pub fn currently_in_creation(&self) -> Vec<String> {
        let me = thread::current().id();
        let mut ids = self.with_state(|state| state.in_creation.get(&me).cloned().unwrap_or_default());
        ids.sort();
        ids
    }

    /// 按 id 解析组件
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Component>, ContainerError> {
        self.inner.stats.total_resolutions.fetch_add(1, Ordering::Relaxed);

        if let Some(instance) = self.cached_singleton(id) {
            return Ok(instance);
        }

        let definition = self.inner.definitions.get(id).ok_or_else(|| {
            CreationFailure::new(id, "No component with this id is defined")
                .with_source(ContainerError::NoSuchDefinition(id.to_string()))
                .into_error()
        })?;

        if definition.is_singleton() {
            self.resolve_singleton(&definition)
        } else {
            self.resolve_per_request(&definition)
        }
    }

    fn resolve_singleton(&self, definition: &Definition) -> Result<Arc<dyn Component>, ContainerError> {
        let id = definition.id();
        let me = thread::current().id();

        let mut state = self.inner.creation.lock();
        loop {
            // 等待期间可能已被其他线程创建
            if let Some(instance) = self.cached_singleton(id) {
                return Ok(instance);
            }
            match state.builders.get(id).copied() {
                None => break,
                Some(builder) if builder == me || state.would_deadlock(me, builder) => {
                    let status = state.early_status(id);
                    drop(state);
                    return self.early_reference(definition, status);
                }
                Some(builder) => {
                    trace!(id, ?builder, "等待其他线程完成单例创建");
                    state.waiting.insert(me, id.to_string());
                    self.inner.creation_done.wait(&mut state);
                    state.waiting.remove(&me);
                }
            }
        }
        state.builders.insert(id.to_string(), me);
        state.enter(me, id);
        drop(state);

        self.inner.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        let result = self
            .create(definition)
            .and_then(|(raw, instance_type)| Ok((self.publishable(definition, raw, &instance_type)?, instance_type)));

        let mut state = self.inner.creation.lock();
        state.builders.remove(id);
        state.leave(me, id);
        let early = state.early_references.remove(id);
        let outcome = match result {
            Ok((instance, instance_type)) => {
                self.inner.singletons.insert(id.to_string(), Arc::clone(&instance));
                debug!(id, ty = %instance_type, "单例创建完成");
                Ok(instance)
            }
            Err(err) => {
                if early.is_some_and(|early| early.handed_out) {
                    for dependent in state.take_transitive_dependents(id) {
                        if self.inner.singletons.remove(&dependent).is_some() {
                            debug!(id, dependent = %dependent, "移除持有失败组件早期引用的单例");
                        }
                    }
                }
                Err(err)
            }
        };
        drop(state);
        self.inner.creation_done.notify_all();
        outcome
    }

    fn resolve_per_request(&self, definition: &Definition) -> Result<Arc<dyn Component>, ContainerError> {
        let id = definition.id();
        let me = thread::current().id();

        let cyclic = self.with_state(|state| {
            let cyclic = state.is_creating(me, id);
            if !cyclic {
                state.enter(me, id);
            }
            cyclic
        });
        if cyclic {
            return Err(self.circular_failure(definition));
        }

        self.inner.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        let result = self.create(definition);
        self.with_state(|state| state.leave(me, id));

        let (raw, instance_type) = result?;
        self.wrap_if_eligible(definition, raw, &instance_type)
    }

    /// 发布单例时使用的引用：早期引用已经交出的代理，或者新包装的实例
    fn publishable(
        &self,
        definition: &Definition,
        raw: Arc<dyn Component>,
        instance_type: &TypeRef,
    ) -> Result<Arc<dyn Component>, ContainerError> {
        let id = definition.id();
        let exposed = self.with_state(|state| {
            state
                .early_references
                .get(id)
                .and_then(|early| early.exposed.clone())
        });
        if let Some(exposed) = exposed {
            return Ok(exposed);
        }
        let wrapped = self.wrap_if_eligible(definition, raw, instance_type)?;
        Ok(self.expose(id, wrapped))
    }

    /// 登记早期引用的对外形态；已有其他线程登记时以先登记者为准
    fn expose(&self, id: &str, candidate: Arc<dyn Component>) -> Arc<dyn Component> {
        self.with_state(|state| match state.early_references.get_mut(id) {
            Some(early) => Arc::clone(early.exposed.get_or_insert(candidate)),
            None => candidate,
        })
    }

    /// 解析并向下转型为具体类型；被代理的组件只能通过 `dispatch` 使用
    pub fn resolve_as<T: Component>(&self, id: &str) -> Result<Arc<T>, ContainerError> {
        self.resolve(id)?
            .into_any_arc()
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                id: id.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// 按能力解析唯一组件；多个候选时取唯一的 primary
    pub fn resolve_by_capability(&self, capability: &str) -> Result<Arc<dyn Component>, ContainerError> {
        let candidate = self.select_candidate(capability, None)?;
        self.resolve(candidate.id())
    }

    /// 所有能力匹配的组件 id（按注册顺序）
    pub fn ids_for_capability(&self, capability: &str) -> Vec<String> {
        self.candidates(capability, None)
            .iter()
            .map(|definition| definition.id().to_string())
            .collect()
    }

    /// 预测组件的实例类型，不创建实例
    pub fn predict_type(&self, id: &str) -> Result<TypeRef, ContainerError> {
        let definition = self
            .inner
            .definitions
            .get(id)
            .ok_or_else(|| ContainerError::NoSuchDefinition(id.to_string()))?;
        self.predict_type_of(&definition)
    }

    /// 创建所有非延迟单例，返回创建数量
    pub fn preinstantiate_singletons(&self) -> Result<usize, ContainerError> {
        crate::measure_performance!("preinstantiate_singletons", {
            let mut count = 0;
            for definition in self.inner.definitions.definitions() {
                if definition.is_singleton() && !definition.is_lazy() {
                    self.resolve(definition.id())?;
                    count += 1;
                }
            }
            crate::log_operation!(info, "preinstantiate_singletons", count = count);
            Ok(count)
        })
    }

    /// 按设置完成启动：开启预实例化时创建所有非延迟单例，返回创建数量
    pub fn refresh(&self) -> Result<usize, ContainerError> {
        if !self.inner.settings.preinstantiate_singletons {
            debug!("未开启预实例化，单例在首次解析时创建");
            return Ok(0);
        }
        self.preinstantiate_singletons()
    }

    /// 获取容器统计信息
    pub fn get_stats(&self) -> ContainerStats {
        ContainerStats {
            total_resolutions: self.inner.stats.total_resolutions.load(Ordering::Relaxed),
            cache_hits: self.inner.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.stats.cache_misses.load(Ordering::Relaxed),
            singletons: self.inner.singletons.len(),
        }
    }

    /// 获取缓存命中率
    pub fn get_cache_hit_rate(&self) -> f64 {
        self.get_stats().hit_rate()
    }

    fn cached_singleton(&self, id: &str) -> Option<Arc<dyn Component>> {
        let instance = self.inner.singletons.get(id).map(|entry| Arc::clone(entry.value()));
        if instance.is_some() {
            self.inner.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        instance
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut CreationState) -> R) -> R {
        let mut state = self.inner.creation.lock();
        f(&mut state)
    }

    /// 单例正在创建时的处理：返回早期引用，或者报告无法解决的循环引用
    fn early_reference(
        &self,
        definition: &Definition,
        status: InCreation,
    ) -> Result<Arc<dyn Component>, ContainerError> {
        match status {
            InCreation::Exposed(instance) => Ok(instance),
            InCreation::Raw(raw) => {
                let instance_type = self.predict_type_of(definition)?;
                let exposed = self.wrap_if_eligible(definition, raw, &instance_type)?;
                debug!(id = definition.id(), "返回尚未完成初始化的早期引用");
                Ok(self.expose(definition.id(), exposed))
            }
            InCreation::Unresolvable => Err(self.circular_failure(definition)),
        }
    }

    fn circular_failure(&self, definition: &Definition) -> ContainerError {
        self.failure(
            definition,
            "Requested component is currently in creation: is there an unresolvable circular reference?",
        )
        .into_circular()
    }

    fn create(&self, definition: &Definition) -> Result<(Arc<dyn Component>, TypeRef), ContainerError> {
        let id = definition.id();
        trace!(id, "开始创建组件");

        let instance_type = self
            .predict_type_of(definition)
            .map_err(|err| self.wrap(definition, "Could not determine component type", err))?;

        let raw = match definition.factory_method() {
            Some(factory) => self.instantiate_with_factory_method(definition, factory)?,
            None => self.autowire_constructor(definition)?,
        };

        if definition.is_singleton() && self.inner.settings.allow_circular_references {
            self.with_state(|state| {
                state.early_references.insert(
                    id.to_string(),
                    EarlyReference {
                        raw: Arc::clone(&raw),
                        exposed: None,
                        handed_out: false,
                    },
                );
            });
            trace!(id, "登记早期引用以便解决潜在的循环依赖");
        }

        self.populate(definition, &raw)?;
        Ok((raw, instance_type))
    }

    fn populate(&self, definition: &Definition, raw: &Arc<dyn Component>) -> Result<(), ContainerError> {
        for binding in definition.property_bindings() {
            let BindingTarget::Property(name) = &binding.target else {
                continue;
            };
            let value = self.resolve_dependency(definition, &binding.target, &binding.dependency)?;
            raw.set_property(name, value).map_err(|source| {
                self.failure(definition, format!("Error setting property '{}'", name))
                    .with_source(source)
                    .into_error()
            })?;
        }
        Ok(())
    }

    fn resolve_dependency(
        &self,
        definition: &Definition,
        target: &BindingTarget,
        dependency: &DependencyRef,
    ) -> Result<Value, ContainerError> {
        match dependency {
            DependencyRef::Literal(value) => Ok(value.clone()),
            DependencyRef::Reference(other) => self
                .resolve(other)
                .map(|instance| self.record_dependent(other, definition.id(), instance))
                .map_err(|err| {
                    self.wrap(
                        definition,
                        format!("Cannot resolve reference to component '{}' while setting {}", other, target),
                        err,
                    )
                }),
            DependencyRef::Autowire(capability) => self
                .select_candidate(capability, Some(definition.id()))
                .and_then(|candidate| {
                    self.resolve(candidate.id())
                        .map(|instance| self.record_dependent(candidate.id(), definition.id(), instance))
                })
                .map_err(|err| {
                    self.wrap(
                        definition,
                        format!("Unsatisfied dependency expressed through {}", target),
                        err,
                    )
                }),
        }
    }

    fn record_dependent(&self, dependency: &str, dependent: &str, instance: Arc<dyn Component>) -> Value {
        self.with_state(|state| {
            state
                .dependents
                .entry(dependency.to_string())
                .or_default()
                .insert(dependent.to_string());
        });
        Value::Component(instance)
    }

    fn candidates(&self, capability: &str, exclude: Option<&str>) -> Vec<Arc<Definition>> {
        self.inner
            .definitions
            .definitions()
            .into_iter()
            .filter(|definition| Some(definition.id()) != exclude)
            .filter(|definition| match self.predict_type_of(definition) {
                Ok(ty) => self.inner.types.descriptor(&ty).has_capability(capability),
                Err(_) => false,
            })
            .collect()
    }

    fn select_candidate(&self, capability: &str, exclude: Option<&str>) -> Result<Arc<Definition>, ContainerError> {
        let mut candidates = self.candidates(capability, exclude);
        if candidates.len() == 1 {
            return Ok(candidates.remove(0));
        }
        let mut primaries: Vec<Arc<Definition>> = candidates
            .iter()
            .filter(|definition| definition.is_primary())
            .cloned()
            .collect();
        if primaries.len() == 1 {
            return Ok(primaries.remove(0));
        }
        Err(ContainerError::NoUniqueCandidate {
            capability: capability.to_string(),
            candidates: candidates.iter().map(|d| d.id().to_string()).collect(),
        })
    }

    fn component_type(&self, definition: &Definition, ty: &TypeRef) -> Result<Arc<ComponentType>, ContainerError> {
        self.inner.types.get(ty).ok_or_else(|| {
            self.wrap(
                definition,
                "Component type is not registered",
                ContainerError::UnknownType(ty.to_string()),
            )
        })
    }

    fn autowire_constructor(&self, definition: &Definition) -> Result<Arc<dyn Component>, ContainerError> {
        let component_type = self.component_type(definition, definition.type_ref())?;
        let candidates: Vec<_> = component_type.constructors().iter().collect();
        if candidates.is_empty() {
            return Err(self
                .failure(definition, format!("Type '{}' declares no constructor", definition.type_ref()))
                .into_error());
        }
        self.instantiate_with(definition, candidates, |constructor, args| {
            constructor.instantiate(&Args::new("<init>", args))
        })
    }

    fn instantiate_with_factory_method(
        &self,
        definition: &Definition,
        factory: &FactoryMethodRef,
    ) -> Result<Arc<dyn Component>, ContainerError> {
        let (owner, factory_instance) = match &factory.factory_bean {
            Some(bean) => {
                let instance = self.resolve(bean).map_err(|err| {
                    self.wrap(definition, format!("Cannot resolve factory component '{}'", bean), err)
                })?;
                (self.predict_type(bean)?, Some(instance))
            }
            None => (definition.type_ref().clone(), None),
        };

        let component_type = self.component_type(definition, &owner)?;
        let candidates = factory_candidates(&component_type, factory);
        if candidates.is_empty() {
            return Err(self
                .failure(
                    definition,
                    format!(
                        "No {} factory method '{}' on type '{}'",
                        if factory.factory_bean.is_some() { "instance" } else { "static" },
                        factory.name,
                        owner
                    ),
                )
                .into_error());
        }
        self.instantiate_with(definition, candidates, |method, args| {
            method.invoke(factory_instance.as_ref(), &Args::new(method.name(), args))
        })
    }

    /// 依次尝试排序后的候选，第一个参数全部满足的候选被调用；
    /// 全部失败时报告最后一个失败，并把之前的失败作为相关原因附上
    fn instantiate_with<E, F>(
        &self,
        definition: &Definition,
        mut candidates: Vec<&E>,
        invoke: F,
    ) -> Result<Arc<dyn Component>, ContainerError>
    where
        E: Executable,
        F: Fn(&E, &[Value]) -> Result<Arc<dyn Component>, BoxError>,
    {
        sort_by_preference(&mut candidates);
        let explicit: Vec<&Binding> = definition.constructor_bindings().collect();
        let mut failures = Vec::new();

        for candidate in candidates {
            if candidate.param_count() < explicit.len() {
                continue;
            }
            let args = match self.resolve_arguments(definition, candidate, &explicit) {
                Ok(args) => args,
                Err(err) if err.is_unresolvable_circular_reference() => return Err(err),
                Err(err) => {
                    trace!(id = definition.id(), candidate = %candidate.signature(), error = %err, "候选不满足");
                    failures.push(err);
                    continue;
                }
            };
            return invoke(candidate, &args).map_err(|source| {
                self.failure(definition, format!("Instantiation via {} failed", candidate.signature()))
                    .with_source(source)
                    .into_error()
            });
        }

        match failures.pop() {
            Some(last) => {
                let mut failure = self
                    .failure(definition, "Could not satisfy any candidate constructor")
                    .with_source(last);
                for earlier in failures {
                    failure.add_related_cause(earlier);
                }
                Err(failure.into_error())
            }
            None => Err(self
                .failure(
                    definition,
                    format!("No candidate accepts {} explicit argument(s)", explicit.len()),
                )
                .into_error()),
        }
    }

    fn resolve_arguments(
        &self,
        definition: &Definition,
        executable: &dyn Executable,
        explicit: &[&Binding],
    ) -> Result<Vec<Value>, ContainerError> {
        let signature = executable.signature();
        let names = self.inner.name_resolver.parameter_names(executable);
        let mut slots: Vec<Option<Value>> = vec![None; executable.param_count()];

        for binding in explicit {
            let index = match &binding.target {
                BindingTarget::Index(index) => *index,
                BindingTarget::Named(name) => names
                    .iter()
                    .position(|candidate| candidate.as_deref() == Some(name.as_str()))
                    .ok_or_else(|| {
                        self.failure(definition, format!("No parameter named '{}' on {}", name, signature))
                            .into_error()
                    })?,
                BindingTarget::Property(_) => continue,
            };
            let slot = slots.get_mut(index).ok_or_else(|| {
                self.failure(definition, format!("{} is out of range for {}", binding.target, signature))
                    .into_error()
            })?;
            if slot.is_some() {
                return Err(self
                    .failure(definition, format!("Parameter {} of {} is bound more than once", index, signature))
                    .into_error());
            }
            *slot = Some(self.resolve_dependency(definition, &binding.target, &binding.dependency)?);
        }

        let mut args = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(value) => args.push(value),
                None if definition.autowires_constructor() => {
                    let capability = executable.autowire_type(index).ok_or_else(|| {
                        self.failure(
                            definition,
                            format!("Parameter {} of {} has no concrete type to autowire", index, signature),
                        )
                        .into_error()
                    })?;
                    let dependency = DependencyRef::Autowire(capability.name().to_string());
                    args.push(self.resolve_dependency(definition, &BindingTarget::Index(index), &dependency)?);
                }
                None => {
                    return Err(self
                        .failure(
                            definition,
                            format!("Unsatisfied dependency expressed through parameter {} of {}", index, signature),
                        )
                        .into_error())
                }
            }
        }
        Ok(args)
    }

    fn predict_type_of(&self, definition: &Definition) -> Result<TypeRef, ContainerError> {
        self.predict(definition, &mut Vec::new())
    }

    fn predict(&self, definition: &Definition, visiting: &mut Vec<String>) -> Result<TypeRef, ContainerError> {
        let Some(factory) = definition.factory_method() else {
            return Ok(definition.type_ref().clone());
        };
        if visiting.iter().any(|id| id == definition.id()) {
            return Err(ContainerError::TypeResolution {
                name: definition.id().to_string(),
                reason: format!("factory component chain is circular: {}", visiting.join(" -> ")),
            });
        }
        visiting.push(definition.id().to_string());

        let owner = match &factory.factory_bean {
            Some(bean) => {
                let bean_definition = self
                    .inner
                    .definitions
                    .get(bean)
                    .ok_or_else(|| ContainerError::NoSuchDefinition(bean.clone()))?;
                self.predict(&bean_definition, visiting)?
            }
            None => definition.type_ref().clone(),
        };
        let component_type = self
            .inner
            .types
            .get(&owner)
            .ok_or_else(|| ContainerError::UnknownType(owner.to_string()))?;

        let mut candidates = factory_candidates(&component_type, factory);
        sort_by_preference(&mut candidates);
        let explicit: Vec<&Binding> = definition.constructor_bindings().collect();
        let method = candidates
            .iter()
            .find(|method| method.param_count() == explicit.len())
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| ContainerError::TypeResolution {
                name: factory.name.clone(),
                reason: format!("no factory method with this name on '{}'", owner),
            })?;

        let args = self.prediction_arguments(method, &explicit);
        resolve_factory_return_type(method, &args, &self.inner.types)
    }

    /// 预测类型时只使用字面量实参，其余位置为 `Unit`
    fn prediction_arguments(&self, method: &FactoryMethod, explicit: &[&Binding]) -> Vec<Value> {
        let names = self.inner.name_resolver.parameter_names(method);
        let mut args = vec![Value::Unit; method.param_types().len()];
        for binding in explicit {
            let index = match &binding.target {
                BindingTarget::Index(index) => Some(*index),
                BindingTarget::Named(name) => names
                    .iter()
                    .position(|candidate| candidate.as_deref() == Some(name.as_str())),
                BindingTarget::Property(_) => None,
            };
            if let (Some(index), DependencyRef::Literal(value)) = (index, &binding.dependency) {
                if let Some(slot) = args.get_mut(index) {
                    *slot = value.clone();
                }
            }
        }
        args
    }

    fn wrap_if_eligible(
        &self,
        definition: &Definition,
        raw: Arc<dyn Component>,
        instance_type: &TypeRef,
    ) -> Result<Arc<dyn Component>, ContainerError> {
        if !definition.is_interception_eligible() {
            return Ok(raw);
        }
        let candidates = match definition.advisor_chain() {
            Some(chain) => self.inner.advisors.chain(chain).ok_or_else(|| {
                self.failure(definition, format!("Unknown advisor chain '{}'", chain))
                    .into_error()
            })?,
            None => self.inner.advisors.global(),
        };
        let descriptor = self.inner.types.descriptor(instance_type);
        let advisors = AdvisorRegistry::applicable(&candidates, &descriptor);
        if advisors.is_empty() {
            return Ok(raw);
        }
        let operations = self
            .inner
            .types
            .get(instance_type)
            .map(|ty| ty.operations().to_vec())
            .unwrap_or_default();
        debug!(id = definition.id(), advisors = advisors.len(), "创建拦截代理");
        Ok(AopProxy::wrap(raw, descriptor, &operations, advisors))
    }

    fn failure(&self, definition: &Definition, message: impl Into<String>) -> CreationFailure {
        CreationFailure::new(definition.id(), message)
            .with_defined_in(definition.source().map(str::to_string))
    }

    fn wrap(&self, definition: &Definition, message: impl Into<String>, cause: ContainerError) -> ContainerError {
        ContainerError::wrap(definition.id(), definition.source(), message, cause)
    }
}

fn factory_candidates<'a>(component_type: &'a ComponentType, factory: &FactoryMethodRef) -> Vec<&'a FactoryMethod> {
    let want_static = factory.factory_bean.is_none();
    component_type
        .factory_methods()
        .iter()
        .filter(|method| method.name() == factory.name && method.is_static() == want_static)
        .collect()
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

/// 容器统计信息
#[derive(Debug, Clone)]
pub struct ContainerStats {
    pub total_resolutions: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub singletons: usize,
}

impl ContainerStats {
    /// 获取总解析次数
    pub fn total(&self) -> usize {
        self.total_resolutions
    }

    /// 获取缓存命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total() as f64
        }
    }
}
