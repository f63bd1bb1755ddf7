//! 依赖值与调用参数

use super::component::{AsAny, Component};
use super::types::{TypeRef, TYPE_LITERAL};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// 注入到构造器、工厂方法、属性以及操作调用中的值
#[derive(Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// 类字面量
    Type(TypeRef),
    /// 带显式目标类型的字面量
    Typed { raw: String, target: TypeRef },
    List(Vec<Value>),
    Component(Arc<dyn Component>),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Value::Opaque(Arc::new(value))
    }

    pub fn typed(raw: &str, target: &str) -> Self {
        Value::Typed {
            raw: raw.to_string(),
            target: TypeRef::new(target),
        }
    }

    /// 简单值的运行时类型；组件、不透明值和 `Unit` 没有可推断的类型
    pub fn runtime_type(&self) -> Option<TypeRef> {
        match self {
            Value::Bool(_) => Some(TypeRef::new("bool")),
            Value::Int(_) => Some(TypeRef::new("i64")),
            Value::Float(_) => Some(TypeRef::new("f64")),
            Value::Str(_) => Some(TypeRef::new("String")),
            Value::Type(_) => Some(TypeRef::new(TYPE_LITERAL)),
            Value::Typed { target, .. } => Some(target.clone()),
            Value::List(_) => Some(TypeRef::new("Vec")),
            Value::Unit | Value::Component(_) | Value::Opaque(_) => None,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            Value::Typed { raw, .. } => raw.parse().ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Typed { raw, .. } => raw.parse().ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            Value::Typed { raw, .. } => raw.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            Value::Typed { raw, .. } => Some(raw),
            _ => None,
        }
    }

    pub fn as_component(&self) -> Option<&Arc<dyn Component>> {
        match self {
            Value::Component(component) => Some(component),
            _ => None,
        }
    }

    /// 向下转型组件或不透明值
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Component(component) => Arc::clone(component).into_any_arc().downcast::<T>().ok(),
            Value::Opaque(value) => Arc::clone(value).downcast::<T>().ok(),
            _ => None,
        }
    }

    fn identity(&self) -> Option<*const ()> {
        match self {
            Value::Component(component) => Some(Arc::as_ptr(component) as *const ()),
            Value::Opaque(value) => Some(Arc::as_ptr(value) as *const ()),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("Unit"),
            Value::Bool(value) => write!(f, "Bool({})", value),
            Value::Int(value) => write!(f, "Int({})", value),
            Value::Float(value) => write!(f, "Float({})", value),
            Value::Str(value) => write!(f, "Str({:?})", value),
            Value::Type(ty) => write!(f, "Type({})", ty),
            Value::Typed { raw, target } => write!(f, "Typed({:?} as {})", raw, target),
            Value::List(values) => f.debug_list().entries(values).finish(),
            Value::Component(component) => {
                write!(f, "Component({:p})", Arc::as_ptr(component) as *const ())
            }
            Value::Opaque(value) => write!(f, "Opaque({:p})", Arc::as_ptr(value) as *const ()),
        }
    }
}

/// 字面量按值比较，组件与不透明值按身份比较
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (
                Value::Typed { raw: a, target: ta },
                Value::Typed { raw: b, target: tb },
            ) => a == b && ta == tb,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Component(_), Value::Component(_)) | (Value::Opaque(_), Value::Opaque(_)) => {
                self.identity() == other.identity()
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Unit => {}
            Value::Bool(value) => value.hash(state),
            Value::Int(value) => value.hash(state),
            Value::Float(value) => value.to_bits().hash(state),
            Value::Str(value) => value.hash(state),
            Value::Type(ty) => ty.hash(state),
            Value::Typed { raw, target } => {
                raw.hash(state);
                target.hash(state);
            }
            Value::List(values) => values.hash(state),
            Value::Component(_) | Value::Opaque(_) => self.identity().hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Arc<dyn Component>> for Value {
    fn from(component: Arc<dyn Component>) -> Self {
        Value::Component(component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_type_of_simple_values() {
        assert_eq!(Value::from(3).runtime_type(), Some(TypeRef::new("i64")));
        assert_eq!(Value::from("x").runtime_type(), Some(TypeRef::new("String")));
        assert_eq!(Value::typed("42", "u16").runtime_type(), Some(TypeRef::new("u16")));
        assert_eq!(Value::Unit.runtime_type(), None);
        assert_eq!(Value::opaque(5u8).runtime_type(), None);
    }

    #[test]
    fn test_opaque_values_compare_by_identity() {
        let shared = Value::opaque(7u32);
        assert_eq!(shared, shared.clone());
        assert_ne!(shared, Value::opaque(7u32));
        assert_eq!(shared.downcast::<u32>().map(|v| *v), Some(7));
    }

    #[test]
    fn test_typed_literal_parses_on_access() {
        let value = Value::typed("25", "u16");
        assert_eq!(value.as_int(), Some(25));
        assert_eq!(value.as_str(), Some("25"));
        assert_eq!(value.as_bool(), None);
    }
}
