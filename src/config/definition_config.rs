use crate::beans::{Definition, DependencyRef, Scope, TypeRef, Value};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 配置文件中的字面量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralConfig {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for LiteralConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralConfig::Bool(value) => write!(f, "{}", value),
            LiteralConfig::Int(value) => write!(f, "{}", value),
            LiteralConfig::Float(value) => write!(f, "{}", value),
            LiteralConfig::Str(value) => f.write_str(value),
        }
    }
}

impl From<&LiteralConfig> for Value {
    fn from(literal: &LiteralConfig) -> Self {
        match literal {
            LiteralConfig::Bool(value) => Value::Bool(*value),
            LiteralConfig::Int(value) => Value::Int(*value),
            LiteralConfig::Float(value) => Value::Float(*value),
            LiteralConfig::Str(value) => Value::Str(value.clone()),
        }
    }
}

/// 一条注入：`index` 或 `name` 指定位置，`value`/`ref`/`autowire`/`class` 四选一
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    pub index: Option<usize>,
    pub name: Option<String>,
    pub value: Option<LiteralConfig>,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    pub autowire: Option<String>,
    pub class: Option<String>,
    /// 与 `value` 搭配，声明字面量的目标类型
    #[serde(rename = "type")]
    pub value_type: Option<String>,
}

impl BindingConfig {
    fn dependency(&self, id: &str) -> Result<DependencyRef, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidDefinition {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let given = [
            self.value.is_some(),
            self.reference.is_some(),
            self.autowire.is_some(),
            self.class.is_some(),
        ]
        .iter()
        .filter(|given| **given)
        .count();
        if given != 1 {
            return Err(invalid("binding needs exactly one of 'value', 'ref', 'autowire' or 'class'"));
        }
        if self.value_type.is_some() && self.value.is_none() {
            return Err(invalid("'type' is only allowed together with 'value'"));
        }

        if let Some(value) = &self.value {
            let value = match &self.value_type {
                Some(target) => Value::typed(&value.to_string(), target),
                None => Value::from(value),
            };
            return Ok(DependencyRef::Literal(value));
        }
        if let Some(reference) = &self.reference {
            return Ok(DependencyRef::reference(reference));
        }
        if let Some(capability) = &self.autowire {
            return Ok(DependencyRef::autowire(capability));
        }
        match &self.class {
            Some(class) => Ok(DependencyRef::Literal(Value::Type(TypeRef::new(class)))),
            None => Err(invalid("binding has no dependency")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactoryMethodConfig {
    pub name: String,
    pub factory_bean: Option<String>,
}

/// `[[definition]]` 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub lazy: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub autowire_constructor: bool,
    #[serde(default)]
    pub interception_eligible: bool,
    pub advisor_chain: Option<String>,
    pub description: Option<String>,
    pub factory_method: Option<FactoryMethodConfig>,
    #[serde(default)]
    pub args: Vec<BindingConfig>,
    #[serde(default)]
    pub properties: Vec<BindingConfig>,
}

impl DefinitionConfig {
    /// 转换为容器定义；`source` 是定义所在的文件
    pub fn to_definition(&self, source: Option<&str>) -> Result<Definition, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidDefinition {
            id: self.id.clone(),
            reason,
        };
        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty".to_string()));
        }
        if self.type_name.trim().is_empty() {
            return Err(invalid("type must not be empty".to_string()));
        }

        let mut definition = Definition::new(&self.id, &self.type_name)
            .with_scope(self.scope)
            .with_lazy(self.lazy);
        if self.primary {
            definition = definition.primary();
        }
        if self.autowire_constructor {
            definition = definition.autowire_constructor();
        }
        if self.interception_eligible {
            definition = definition.intercepted();
        }
        if let Some(chain) = &self.advisor_chain {
            definition = definition.with_advisor_chain(chain);
        }
        if let Some(factory) = &self.factory_method {
            definition = match &factory.factory_bean {
                Some(bean) => definition.with_factory_bean(bean, &factory.name),
                None => definition.with_factory_method(&factory.name),
            };
        }

        for arg in &self.args {
            let dependency = arg.dependency(&self.id)?;
            definition = match (arg.index, &arg.name) {
                (Some(index), None) => definition.constructor_arg(index, dependency),
                (None, Some(name)) => definition.named_arg(name, dependency),
                _ => {
                    return Err(invalid(
                        "constructor argument needs exactly one of 'index' or 'name'".to_string(),
                    ))
                }
            };
        }
        for property in &self.properties {
            let dependency = property.dependency(&self.id)?;
            definition = match (property.index, &property.name) {
                (None, Some(name)) => definition.property(name, dependency),
                _ => return Err(invalid("property needs a 'name' and no 'index'".to_string())),
            };
        }

        if let Some(description) = &self.description {
            definition = definition.described_as(description).defined_in(description);
        } else if let Some(source) = source {
            definition = definition.defined_in(&format!("file [{}]", source));
        }
        Ok(definition)
    }
}
