//! 事务属性：传播行为、隔离级别、只读与超时

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ISOLATION_DEFAULT: i32 = -1;
pub const ISOLATION_READ_UNCOMMITTED: i32 = 1;
pub const ISOLATION_READ_COMMITTED: i32 = 2;
pub const ISOLATION_REPEATABLE_READ: i32 = 4;
pub const ISOLATION_SERIALIZABLE: i32 = 8;

pub const TIMEOUT_DEFAULT: i32 = -1;

/// 事务拦截器读取的操作属性名
pub const TRANSACTIONAL_ATTRIBUTE: &str = "transactional";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    /// 加入当前事务，没有则新建
    #[default]
    Required,
    /// 加入当前事务，没有则以非事务方式执行
    Supports,
    /// 加入当前事务，没有则失败
    Mandatory,
    /// 挂起当前事务并新建事务
    RequiresNew,
    /// 挂起当前事务并以非事务方式执行
    NotSupported,
    /// 存在事务时失败
    Never,
    /// 在当前事务的保存点中执行，没有事务时同 `Required`
    Nested,
}

impl Propagation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Propagation::Required => "required",
            Propagation::Supports => "supports",
            Propagation::Mandatory => "mandatory",
            Propagation::RequiresNew => "requires_new",
            Propagation::NotSupported => "not_supported",
            Propagation::Never => "never",
            Propagation::Nested => "nested",
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Propagation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "required" => Ok(Propagation::Required),
            "supports" => Ok(Propagation::Supports),
            "mandatory" => Ok(Propagation::Mandatory),
            "requires_new" => Ok(Propagation::RequiresNew),
            "not_supported" => Ok(Propagation::NotSupported),
            "never" => Ok(Propagation::Never),
            "nested" => Ok(Propagation::Nested),
            _ => Err(ConfigError::InvalidValue {
                key: "propagation".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDefinition {
    pub propagation: Propagation,
    pub isolation_level: i32,
    pub timeout: i32,
    pub read_only: bool,
    pub name: Option<String>,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            isolation_level: ISOLATION_DEFAULT,
            timeout: TIMEOUT_DEFAULT,
            read_only: false,
            name: None,
        }
    }
}

impl TransactionDefinition {
    pub fn new(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Self::default()
        }
    }

    pub fn with_isolation_level(mut self, level: i32) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn with_timeout(mut self, seconds: i32) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// 解析形如 `requires_new,read_only,isolation=2` 的属性值
    ///
    /// 空字符串使用默认值，未知标志报错
    pub fn parse_attribute(text: &str) -> Result<Self, ConfigError> {
        let mut definition = Self::default();
        for part in text.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let (key, value) = match part.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value.trim())),
                None => (part, None),
            };
            match (key, value) {
                ("read_only" | "readonly", None) => definition.read_only = true,
                ("isolation", Some(value)) => definition.isolation_level = parse_isolation(value)?,
                ("timeout", Some(value)) => {
                    definition.timeout = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "timeout".to_string(),
                        value: value.to_string(),
                    })?
                }
                ("name", Some(value)) => definition.name = Some(value.to_string()),
                ("propagation", Some(value)) => definition.propagation = value.parse()?,
                (flag, None) => definition.propagation = flag.parse()?,
                (key, Some(value)) => {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    })
                }
            }
        }
        Ok(definition)
    }
}

fn parse_isolation(value: &str) -> Result<i32, ConfigError> {
    let level = match value.to_ascii_lowercase().as_str() {
        "default" => ISOLATION_DEFAULT,
        "read_uncommitted" => ISOLATION_READ_UNCOMMITTED,
        "read_committed" => ISOLATION_READ_COMMITTED,
        "repeatable_read" => ISOLATION_REPEATABLE_READ,
        "serializable" => ISOLATION_SERIALIZABLE,
        other => other.parse().map_err(|_| ConfigError::InvalidValue {
            key: "isolation".to_string(),
            value: value.to_string(),
        })?,
    };
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attribute() {
        let definition = TransactionDefinition::parse_attribute("requires_new, read_only, isolation=2").unwrap();
        assert_eq!(definition.propagation, Propagation::RequiresNew);
        assert!(definition.read_only);
        assert_eq!(definition.isolation_level, ISOLATION_READ_COMMITTED);

        let definition = TransactionDefinition::parse_attribute("").unwrap();
        assert_eq!(definition, TransactionDefinition::default());

        let definition = TransactionDefinition::parse_attribute("isolation=serializable,timeout=30,name=orders").unwrap();
        assert_eq!(definition.isolation_level, ISOLATION_SERIALIZABLE);
        assert_eq!(definition.timeout, 30);
        assert_eq!(definition.name.as_deref(), Some("orders"));
    }

    #[test]
    fn test_parse_attribute_rejects_unknown_flags() {
        assert!(TransactionDefinition::parse_attribute("sometimes").is_err());
        assert!(TransactionDefinition::parse_attribute("isolation=loose").is_err());
        assert!(TransactionDefinition::parse_attribute("retries=3").is_err());
    }

    #[test]
    fn test_propagation_accepts_dashes() {
        assert_eq!("NOT-SUPPORTED".parse::<Propagation>().unwrap(), Propagation::NotSupported);
        assert_eq!(Propagation::RequiresNew.to_string(), "requires_new");
    }
}
