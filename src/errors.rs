//! 错误类型定义
//!
//! 容器、拦截层、事务同步与配置各自拥有独立的错误枚举。

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// 通用装箱错误：目标组件与外部资源报告的错误都以此形式传递
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// 容器错误
#[derive(Debug, Error)]
pub enum ContainerError {
    /// 组件创建失败
    #[error(transparent)]
    Creation(Box<CreationFailure>),
    /// 仅由构造器参数组成（或被禁止打破）的循环引用
    #[error(transparent)]
    UnresolvableCircularReference(Box<CreationFailure>),
    #[error("No definition registered with id '{0}'")]
    NoSuchDefinition(String),
    #[error("Definition with id '{0}' is already registered")]
    DuplicateDefinition(String),
    #[error("Type '{0}' is not registered")]
    UnknownType(String),
    #[error(
        "Expected a single candidate for capability '{capability}' but found {count}: {list}",
        count = .candidates.len(),
        list = .candidates.join(", ")
    )]
    NoUniqueCandidate {
        capability: String,
        candidates: Vec<String>,
    },
    #[error("Component '{id}' is not of the requested type '{expected}'")]
    TypeMismatch { id: String, expected: &'static str },
    #[error("Could not resolve type '{name}': {reason}")]
    TypeResolution { name: String, reason: String },
}

impl ContainerError {
    /// 创建一个不带底层原因的创建失败
    pub fn creation(id: impl Into<String>, message: impl Into<String>) -> Self {
        CreationFailure::new(id, message).into_error()
    }

    /// 以父组件的身份包装依赖失败。
    ///
    /// 循环引用的类型会沿调用链向上保留，使顶层错误仍然可以被识别为
    /// `UnresolvableCircularReference`。
    pub fn wrap(
        id: &str,
        defined_in: Option<&str>,
        message: impl Into<String>,
        cause: ContainerError,
    ) -> Self {
        let circular = cause.is_unresolvable_circular_reference();
        let failure = CreationFailure::new(id, message)
            .with_defined_in(defined_in.map(str::to_string))
            .with_source(cause);
        if circular {
            failure.into_circular()
        } else {
            failure.into_error()
        }
    }

    pub fn is_unresolvable_circular_reference(&self) -> bool {
        matches!(self, ContainerError::UnresolvableCircularReference(_))
    }

    /// 如果是创建失败，返回其详细信息
    pub fn creation_failure(&self) -> Option<&CreationFailure> {
        match self {
            ContainerError::Creation(failure)
            | ContainerError::UnresolvableCircularReference(failure) => Some(failure),
            _ => None,
        }
    }

    /// 附带的相关原因（多个候选同时失败时）
    pub fn related_causes(&self) -> &[ContainerError] {
        self.creation_failure()
            .map(|failure| failure.related_causes())
            .unwrap_or(&[])
    }

    /// 沿原因链与相关原因查找满足条件的错误
    pub fn contains(&self, predicate: &dyn Fn(&ContainerError) -> bool) -> bool {
        if predicate(self) {
            return true;
        }
        if self
            .related_causes()
            .iter()
            .any(|related| related.contains(predicate))
        {
            return true;
        }
        let mut cause = StdError::source(self);
        while let Some(err) = cause {
            if let Some(container_err) = err.downcast_ref::<ContainerError>() {
                return container_err.contains(predicate);
            }
            cause = err.source();
        }
        false
    }
}

/// 组件创建失败的详细信息
#[derive(Debug)]
pub struct CreationFailure {
    id: String,
    defined_in: Option<String>,
    message: String,
    source: Option<BoxError>,
    related: Vec<ContainerError>,
}

impl CreationFailure {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            defined_in: None,
            message: message.into(),
            source: None,
            related: Vec::new(),
        }
    }

    pub fn with_defined_in(mut self, defined_in: Option<String>) -> Self {
        self.defined_in = defined_in;
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// 记录一个独立的相关原因
    pub fn add_related_cause(&mut self, cause: ContainerError) {
        self.related.push(cause);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn defined_in(&self) -> Option<&str> {
        self.defined_in.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn related_causes(&self) -> &[ContainerError] {
        &self.related
    }

    pub fn into_error(self) -> ContainerError {
        ContainerError::Creation(Box::new(self))
    }

    pub fn into_circular(self) -> ContainerError {
        ContainerError::UnresolvableCircularReference(Box::new(self))
    }
}

impl fmt::Display for CreationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error creating component with id '{}'", self.id)?;
        if let Some(defined_in) = &self.defined_in {
            write!(f, " defined in {}", defined_in)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(source) = &self.source {
            write!(f, "; nested error is {}", source)?;
        }
        for related in &self.related {
            write!(f, "\nRelated cause: {}", related)?;
        }
        Ok(())
    }
}

impl StdError for CreationFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static))
    }
}

/// 拦截层错误
///
/// 目标组件（或通知逻辑）返回的错误由代理原样透传；
/// 代理在调用目标前发现的失败（操作不存在、参数个数不符）以 `Failure` 返回。
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error(transparent)]
    Target(BoxError),
    #[error("No operation '{operation}' on type '{type_name}'")]
    NoSuchOperation { type_name: String, operation: String },
    #[error("Illegal arguments for operation '{operation}': {reason}")]
    IllegalArguments { operation: String, reason: String },
    #[error("Invocation of operation '{operation}' failed: {source}")]
    Failure {
        operation: String,
        #[source]
        source: BoxError,
    },
}

impl InvocationError {
    pub fn target(err: impl Into<BoxError>) -> Self {
        InvocationError::Target(err.into())
    }

    pub fn illegal_arguments(operation: &str, reason: impl Into<String>) -> Self {
        InvocationError::IllegalArguments {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_target(&self) -> bool {
        matches!(self, InvocationError::Target(_))
    }

    /// 将目标错误向下转型为调用方的领域错误类型
    pub fn downcast_target<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            InvocationError::Target(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// 事务同步错误
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Already value [{value}] for key [{key}] bound to thread [{thread}]")]
    AlreadyBound {
        key: String,
        value: String,
        thread: String,
    },
    #[error("No value for key [{key}] bound to thread [{thread}]")]
    NotBound { key: String, thread: String },
    #[error("Cannot activate transaction synchronization - already active")]
    SynchronizationActive,
    #[error("Transaction synchronization is not active")]
    SynchronizationInactive,
    #[error("{message}")]
    NestedNotSupported {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("{message}")]
    CannotCreate {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("{message}")]
    General {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("Illegal transaction state: {0}")]
    IllegalState(String),
}

impl TransactionError {
    pub fn nested_not_supported(message: impl Into<String>) -> Self {
        TransactionError::NestedNotSupported {
            message: message.into(),
            source: None,
        }
    }

    pub fn general(message: impl Into<String>, source: Option<BoxError>) -> Self {
        TransactionError::General {
            message: message.into(),
            source,
        }
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML from '{0}': {1}")]
    TomlParse(String, #[source] toml::de::Error),
    #[error("Invalid definition '{id}': {reason}")]
    InvalidDefinition { id: String, reason: String },
    #[error("Invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },
}
