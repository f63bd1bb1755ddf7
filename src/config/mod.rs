pub mod definition_config;
pub mod loader;

pub use definition_config::{BindingConfig, DefinitionConfig, FactoryMethodConfig, LiteralConfig};
pub use loader::ConfigLoader;

use crate::beans::{ContainerSettings, Definition};
use crate::errors::ConfigError;
use crate::logging::{LogFormat, LoggingSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const ENV_LOG_LEVEL: &str = "SPRIG_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "SPRIG_LOG_FORMAT";
pub const ENV_ALLOW_CIRCULAR_REFERENCES: &str = "SPRIG_ALLOW_CIRCULAR_REFERENCES";
pub const ENV_PREINSTANTIATE_SINGLETONS: &str = "SPRIG_PREINSTANTIATE_SINGLETONS";

/// 配置文件原样反序列化的结果，所有段都可以省略
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialSprigConfig {
    pub container: Option<ContainerSettings>,
    pub logging: Option<LoggingSettings>,
    #[serde(default)]
    pub definition: Vec<DefinitionConfig>,
}

/// 合并了环境变量之后的完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SprigConfig {
    pub container: ContainerSettings,
    pub logging: LoggingSettings,
    pub definition: Vec<DefinitionConfig>,
    /// 配置来源文件，用于定义的 "defined in" 信息
    #[serde(skip)]
    pub source: Option<String>,
}

impl SprigConfig {
    pub fn from_partial_and_env(
        partial: PartialSprigConfig,
        env_map: &HashMap<String, String>,
        source: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut container = partial.container.unwrap_or_default();
        let mut logging = partial.logging.unwrap_or_default();

        if let Some(level) = env_map.get(ENV_LOG_LEVEL) {
            logging.level = level.clone();
        }
        if let Some(format) = env_map.get(ENV_LOG_FORMAT) {
            logging.format = format.parse::<LogFormat>()?;
        }
        if let Some(allow) = env_map.get(ENV_ALLOW_CIRCULAR_REFERENCES) {
            container.allow_circular_references = parse_bool(ENV_ALLOW_CIRCULAR_REFERENCES, allow)?;
        }
        if let Some(eager) = env_map.get(ENV_PREINSTANTIATE_SINGLETONS) {
            container.preinstantiate_singletons = parse_bool(ENV_PREINSTANTIATE_SINGLETONS, eager)?;
        }

        Ok(Self {
            container,
            logging,
            definition: partial.definition,
            source,
        })
    }

    /// 按文件中的顺序转换所有定义
    pub fn definitions(&self) -> Result<Vec<Definition>, ConfigError> {
        self.definition
            .iter()
            .map(|config| config.to_definition(self.source.as_deref()))
            .collect()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
