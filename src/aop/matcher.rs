//! 方法匹配器与类过滤器
//!
//! 匹配器之间按结构比较相等：同类型、同参数的两个匹配器相等且哈希一致，
//! 这样组合匹配器和顾问可以去重、作为缓存键使用。

use crate::beans::{Operation, TypeDescriptor, Value};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// 为 trait 对象提供结构相等与哈希
pub trait MatcherIdentity {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn Any) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T: Any + PartialEq + Hash> MatcherIdentity for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().map_or(false, |other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

/// 方法匹配器
///
/// 静态匹配器只根据操作签名判断；运行时匹配器（`is_runtime` 为真）
/// 在静态检查通过后，还会在每次调用时结合实参再判断一次。
pub trait MethodMatcher: MatcherIdentity + fmt::Debug + Send + Sync {
    fn matches(&self, operation: &Operation, target: &TypeDescriptor) -> bool;

    fn is_runtime(&self) -> bool {
        false
    }

    fn matches_with_args(&self, operation: &Operation, target: &TypeDescriptor, _args: &[Value]) -> bool {
        self.matches(operation, target)
    }
}

impl PartialEq for dyn MethodMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.dyn_eq(MatcherIdentity::as_any(other))
    }
}

impl Eq for dyn MethodMatcher {}

impl Hash for dyn MethodMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dyn_hash(state);
    }
}

/// 类过滤器
pub trait ClassFilter: MatcherIdentity + fmt::Debug + Send + Sync {
    fn accepts(&self, target: &TypeDescriptor) -> bool;
}

impl PartialEq for dyn ClassFilter {
    fn eq(&self, other: &Self) -> bool {
        self.dyn_eq(MatcherIdentity::as_any(other))
    }
}

impl Eq for dyn ClassFilter {}

impl Hash for dyn ClassFilter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dyn_hash(state);
    }
}

// ---------------------------------------------------------------------------
// 基础匹配器
// ---------------------------------------------------------------------------

/// 匹配所有操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TrueMatcher;

impl MethodMatcher for TrueMatcher {
    fn matches(&self, _operation: &Operation, _target: &TypeDescriptor) -> bool {
        true
    }
}

/// 按操作名匹配，支持 `*` 通配
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameMatcher {
    patterns: Vec<String>,
}

impl NameMatcher {
    pub fn new(patterns: &[&str]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl MethodMatcher for NameMatcher {
    fn matches(&self, operation: &Operation, _target: &TypeDescriptor) -> bool {
        self.patterns
            .iter()
            .any(|pattern| simple_match(pattern, operation.name()))
    }
}

/// 按操作元数据匹配；未指定值时只要求存在该键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeMatcher {
    key: String,
    value: Option<String>,
}

impl AttributeMatcher {
    pub fn present(key: &str) -> Self {
        Self {
            key: key.to_string(),
            value: None,
        }
    }

    pub fn equals(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: Some(value.to_string()),
        }
    }
}

impl MethodMatcher for AttributeMatcher {
    fn matches(&self, operation: &Operation, _target: &TypeDescriptor) -> bool {
        match (operation.attribute(&self.key), &self.value) {
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
            (None, _) => false,
        }
    }
}

/// 运行时匹配：实参个数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArgumentCountMatcher {
    count: usize,
}

impl ArgumentCountMatcher {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl MethodMatcher for ArgumentCountMatcher {
    fn matches(&self, _operation: &Operation, _target: &TypeDescriptor) -> bool {
        true
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_with_args(&self, _operation: &Operation, _target: &TypeDescriptor, args: &[Value]) -> bool {
        args.len() == self.count
    }
}

/// 运行时匹配：指定位置的实参等于给定值
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArgumentEqualsMatcher {
    index: usize,
    expected: Value,
}

impl ArgumentEqualsMatcher {
    pub fn new(index: usize, expected: impl Into<Value>) -> Self {
        Self {
            index,
            expected: expected.into(),
        }
    }
}

impl MethodMatcher for ArgumentEqualsMatcher {
    fn matches(&self, _operation: &Operation, _target: &TypeDescriptor) -> bool {
        true
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_with_args(&self, _operation: &Operation, _target: &TypeDescriptor, args: &[Value]) -> bool {
        args.get(self.index) == Some(&self.expected)
    }
}

// ---------------------------------------------------------------------------
// 组合匹配器
// ---------------------------------------------------------------------------

/// 并集
#[derive(Debug)]
pub struct UnionMatcher {
    first: Arc<dyn MethodMatcher>,
    second: Arc<dyn MethodMatcher>,
}

impl PartialEq for UnionMatcher {
    fn eq(&self, other: &Self) -> bool {
        *self.first == *other.first && *self.second == *other.second
    }
}

impl Eq for UnionMatcher {}

impl Hash for UnionMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.first.hash(state);
        self.second.hash(state);
    }
}

impl MethodMatcher for UnionMatcher {
    fn matches(&self, operation: &Operation, target: &TypeDescriptor) -> bool {
        self.first.matches(operation, target) || self.second.matches(operation, target)
    }

    fn is_runtime(&self) -> bool {
        self.first.is_runtime() || self.second.is_runtime()
    }

    fn matches_with_args(&self, operation: &Operation, target: &TypeDescriptor, args: &[Value]) -> bool {
        self.first.matches_with_args(operation, target, args)
            || self.second.matches_with_args(operation, target, args)
    }
}

/// 带类过滤器的并集：静态匹配时每一侧先经过各自的类过滤器。
///
/// 运行时匹配（三参数）不检查类过滤器，直接对两侧求并。
#[derive(Debug)]
pub struct ClassFilterAwareUnionMatcher {
    first: Arc<dyn MethodMatcher>,
    first_filter: Arc<dyn ClassFilter>,
    second: Arc<dyn MethodMatcher>,
    second_filter: Arc<dyn ClassFilter>,
}

impl PartialEq for ClassFilterAwareUnionMatcher {
    fn eq(&self, other: &Self) -> bool {
        *self.first == *other.first && *self.first_filter == *other.first_filter && *self.second == *other.second && *self.second_filter == *other.second_filter
    }
}

impl Eq for ClassFilterAwareUnionMatcher {}

impl Hash for ClassFilterAwareUnionMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.first.hash(state);
        self.first_filter.hash(state);
        self.second.hash(state);
        self.second_filter.hash(state);
    }
}

impl MethodMatcher for ClassFilterAwareUnionMatcher {
    fn matches(&self, operation: &Operation, target: &TypeDescriptor) -> bool {
        (self.first_filter.accepts(target) && self.first.matches(operation, target))
            || (self.second_filter.accepts(target) && self.second.matches(operation, target))
    }

    fn is_runtime(&self) -> bool {
        self.first.is_runtime() || self.second.is_runtime()
    }

    fn matches_with_args(&self, operation: &Operation, target: &TypeDescriptor, args: &[Value]) -> bool {
        self.first.matches_with_args(operation, target, args)
            || self.second.matches_with_args(operation, target, args)
    }
}

/// 交集
#[derive(Debug)]
pub struct IntersectionMatcher {
    first: Arc<dyn MethodMatcher>,
    second: Arc<dyn MethodMatcher>,
}

impl PartialEq for IntersectionMatcher {
    fn eq(&self, other: &Self) -> bool {
        *self.first == *other.first && *self.second == *other.second
    }
}

impl Eq for IntersectionMatcher {}

impl Hash for IntersectionMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.first.hash(state);
        self.second.hash(state);
    }
}

impl MethodMatcher for IntersectionMatcher {
    fn matches(&self, operation: &Operation, target: &TypeDescriptor) -> bool {
        self.first.matches(operation, target) && self.second.matches(operation, target)
    }

    fn is_runtime(&self) -> bool {
        self.first.is_runtime() || self.second.is_runtime()
    }

    /// 只有运行时子匹配器会拿到实参，静态子匹配器按签名判断
    fn matches_with_args(&self, operation: &Operation, target: &TypeDescriptor, args: &[Value]) -> bool {
        let check = |matcher: &Arc<dyn MethodMatcher>| {
            if matcher.is_runtime() {
                matcher.matches_with_args(operation, target, args)
            } else {
                matcher.matches(operation, target)
            }
        };
        check(&self.first) && check(&self.second)
    }
}

/// 两个匹配器的并集
pub fn union(first: Arc<dyn MethodMatcher>, second: Arc<dyn MethodMatcher>) -> Arc<dyn MethodMatcher> {
    Arc::new(UnionMatcher { first, second })
}

/// 两个匹配器的交集
pub fn intersection(first: Arc<dyn MethodMatcher>, second: Arc<dyn MethodMatcher>) -> Arc<dyn MethodMatcher> {
    Arc::new(IntersectionMatcher { first, second })
}

/// 各自带类过滤器的并集
pub fn union_with_filters(
    first: Arc<dyn MethodMatcher>,
    first_filter: Arc<dyn ClassFilter>,
    second: Arc<dyn MethodMatcher>,
    second_filter: Arc<dyn ClassFilter>,
) -> Arc<dyn MethodMatcher> {
    Arc::new(ClassFilterAwareUnionMatcher {
        first,
        first_filter,
        second,
        second_filter,
    })
}

// ---------------------------------------------------------------------------
// 类过滤器
// ---------------------------------------------------------------------------

/// 接受所有类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TrueClassFilter;

impl ClassFilter for TrueClassFilter {
    fn accepts(&self, _target: &TypeDescriptor) -> bool {
        true
    }
}

/// 按类型名匹配，支持 `*` 通配
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeNameFilter {
    pattern: String,
}

impl TypeNameFilter {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
        }
    }
}

impl ClassFilter for TypeNameFilter {
    fn accepts(&self, target: &TypeDescriptor) -> bool {
        simple_match(&self.pattern, target.name().name())
    }
}

/// 要求类型具备某个能力
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityFilter {
    capability: String,
}

impl CapabilityFilter {
    pub fn new(capability: &str) -> Self {
        Self {
            capability: capability.to_string(),
        }
    }
}

impl ClassFilter for CapabilityFilter {
    fn accepts(&self, target: &TypeDescriptor) -> bool {
        target.has_capability(&self.capability)
    }
}

#[derive(Debug)]
pub struct UnionClassFilter {
    first: Arc<dyn ClassFilter>,
    second: Arc<dyn ClassFilter>,
}

impl PartialEq for UnionClassFilter {
    fn eq(&self, other: &Self) -> bool {
        *self.first == *other.first && *self.second == *other.second
    }
}

impl Eq for UnionClassFilter {}

impl Hash for UnionClassFilter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.first.hash(state);
        self.second.hash(state);
    }
}

impl ClassFilter for UnionClassFilter {
    fn accepts(&self, target: &TypeDescriptor) -> bool {
        self.first.accepts(target) || self.second.accepts(target)
    }
}

#[derive(Debug)]
pub struct IntersectionClassFilter {
    first: Arc<dyn ClassFilter>,
    second: Arc<dyn ClassFilter>,
}

impl PartialEq for IntersectionClassFilter {
    fn eq(&self, other: &Self) -> bool {
        *self.first == *other.first && *self.second == *other.second
    }
}

impl Eq for IntersectionClassFilter {}

impl Hash for IntersectionClassFilter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.first.hash(state);
        self.second.hash(state);
    }
}

impl ClassFilter for IntersectionClassFilter {
    fn accepts(&self, target: &TypeDescriptor) -> bool {
        self.first.accepts(target) && self.second.accepts(target)
    }
}

pub fn union_filters(first: Arc<dyn ClassFilter>, second: Arc<dyn ClassFilter>) -> Arc<dyn ClassFilter> {
    Arc::new(UnionClassFilter { first, second })
}

pub fn intersect_filters(first: Arc<dyn ClassFilter>, second: Arc<dyn ClassFilter>) -> Arc<dyn ClassFilter> {
    Arc::new(IntersectionClassFilter { first, second })
}

/// 简单通配匹配：`*` 匹配任意长度字符
pub fn simple_match(pattern: &str, text: &str) -> bool {
    let Some(first_star) = pattern.find('*') else {
        return pattern == text;
    };
    if first_star == 0 {
        if pattern.len() == 1 {
            return true;
        }
        let rest = &pattern[1..];
        let Some(next_star) = rest.find('*') else {
            return text.ends_with(rest);
        };
        let part = &rest[..next_star];
        if part.is_empty() {
            return simple_match(rest, text);
        }
        let remaining = &rest[next_star..];
        let mut from = 0;
        while let Some(found) = text[from..].find(part) {
            let index = from + found;
            if simple_match(remaining, &text[index + part.len()..]) {
                return true;
            }
            from = index + 1;
            while !text.is_char_boundary(from) {
                from += 1;
            }
        }
        return false;
    }
    let prefix = &pattern[..first_star];
    text.len() >= first_star
        && text.starts_with(prefix)
        && simple_match(&pattern[first_star..], &text[first_star..])
}
