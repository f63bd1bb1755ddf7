pub mod aop;
pub mod beans;
pub mod config;
pub mod errors;
pub mod logging;
pub mod transaction;

// 常用类型的重新导出
pub use beans::{Args, Component, Container, ContainerSettings, Definition, DependencyRef, Value};
pub use config::{ConfigLoader, SprigConfig};
pub use errors::{BoxError, ConfigError, ContainerError, InvocationError, TransactionError};
