use std::{collections::HashMap, env, fs, path::Path};

use crate::errors::ConfigError;

use super::{
    PartialSprigConfig, SprigConfig, ENV_ALLOW_CIRCULAR_REFERENCES, ENV_LOG_FORMAT, ENV_LOG_LEVEL,
    ENV_PREINSTANTIATE_SINGLETONS,
};

/// 配置加载器：读取 TOML 文件或字符串，再叠加环境变量覆盖
pub struct ConfigLoader {
    env_override: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// 从进程环境变量读取覆盖项
    pub fn new() -> Self {
        Self { env_override: None }
    }

    /// 使用固定的环境变量（测试用）
    pub fn with_env(env_map: HashMap<String, String>) -> Self {
        Self {
            env_override: Some(env_map),
        }
    }

    /// 从 TOML 文件加载配置
    pub fn load_from_path(&self, path: &Path) -> Result<SprigConfig, ConfigError> {
        let display = path.to_string_lossy().to_string();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(display.clone(), e))?;
        let partial = self.parse(&content, &display)?;
        tracing::debug!(path = %path.display(), definitions = partial.definition.len(), "已加载配置文件");
        SprigConfig::from_partial_and_env(partial, &self.collect_env_vars(), Some(display))
    }

    /// 从 TOML 文本加载配置
    pub fn load_from_str(&self, content: &str) -> Result<SprigConfig, ConfigError> {
        let partial = self.parse(content, "<string>")?;
        SprigConfig::from_partial_and_env(partial, &self.collect_env_vars(), None)
    }

    fn parse(&self, content: &str, origin: &str) -> Result<PartialSprigConfig, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlParse(origin.to_string(), e))
    }

    /// 收集相关的环境变量
    fn collect_env_vars(&self) -> HashMap<String, String> {
        let env_keys = [
            ENV_LOG_LEVEL,
            ENV_LOG_FORMAT,
            ENV_ALLOW_CIRCULAR_REFERENCES,
            ENV_PREINSTANTIATE_SINGLETONS,
        ];

        let mut env_map = HashMap::new();
        for key in &env_keys {
            let value = match &self.env_override {
                Some(overrides) => overrides.get(*key).cloned(),
                None => env::var(key).ok(),
            };
            if let Some(value) = value {
                env_map.insert(key.to_string(), value);
            }
        }
        env_map
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
        [container]
        allow_circular_references = false

        [logging]
        level = "debug"
        format = "compact"

        [[definition]]
        id = "repo"
        type = "Repository"

        [[definition]]
        id = "orders"
        type = "OrderService"
        args = [ { index = 0, ref = "repo" } ]
    "#;

    #[test]
    fn test_load_from_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("beans.toml");
        fs::write(&path, SAMPLE).unwrap();

        let loader = ConfigLoader::with_env(HashMap::new());
        let config = loader.load_from_path(&path).unwrap();
        assert!(!config.container.allow_circular_references);
        assert!(config.container.preinstantiate_singletons);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Compact);

        let definitions = config.definitions().unwrap();
        assert_eq!(definitions.len(), 2);
        assert!(definitions[1].source().unwrap().contains("beans.toml"));
    }

    #[test]
    fn test_env_overrides_file() {
        let env_map = HashMap::from([
            (ENV_LOG_LEVEL.to_string(), "trace".to_string()),
            (ENV_LOG_FORMAT.to_string(), "json".to_string()),
            (ENV_ALLOW_CIRCULAR_REFERENCES.to_string(), "yes".to_string()),
            (ENV_PREINSTANTIATE_SINGLETONS.to_string(), "off".to_string()),
        ]);
        let config = ConfigLoader::with_env(env_map).load_from_str(SAMPLE).unwrap();
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.container.allow_circular_references);
        assert!(!config.container.preinstantiate_singletons);
    }

    #[test]
    fn test_invalid_inputs() {
        let loader = ConfigLoader::with_env(HashMap::new());
        assert!(matches!(
            loader.load_from_path(Path::new("/definitely/not/here.toml")),
            Err(ConfigError::FileRead(..))
        ));
        assert!(matches!(
            loader.load_from_str("[container\n"),
            Err(ConfigError::TomlParse(..))
        ));
        assert!(matches!(
            loader.load_from_str("[unknown]\nkey = 1"),
            Err(ConfigError::TomlParse(..))
        ));

        let env_map = HashMap::from([(ENV_ALLOW_CIRCULAR_REFERENCES.to_string(), "maybe".to_string())]);
        assert!(matches!(
            ConfigLoader::with_env(env_map).load_from_str(""),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
