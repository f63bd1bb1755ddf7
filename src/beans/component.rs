//! 组件能力接口

use super::value::Value;
use crate::errors::{BoxError, InvocationError};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 为组件提供向下转型能力
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// 容器管理的组件
///
/// 属性注入发生在实例共享之后，因此 `set_property` 只拿到 `&self`，
/// 实现需要使用内部可变性。
pub trait Component: AsAny {
    /// 属性注入
    fn set_property(&self, name: &str, _value: Value) -> Result<(), BoxError> {
        Err(format!("no writable property '{}' on {}", name, std::any::type_name::<Self>()).into())
    }

    /// 按名称分派操作
    fn dispatch(&self, operation: &str, _args: &[Value]) -> Result<Value, InvocationError> {
        Err(InvocationError::NoSuchOperation {
            type_name: std::any::type_name::<Self>().to_string(),
            operation: operation.to_string(),
        })
    }
}

impl fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({:p})", self as *const dyn Component as *const ())
    }
}

/// 两个组件引用是否指向同一实例
pub fn same_instance(a: &Arc<dyn Component>, b: &Arc<dyn Component>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// 向下转型为具体组件类型
pub fn downcast_component<T: Component>(component: &Arc<dyn Component>) -> Option<Arc<T>> {
    Arc::clone(component).into_any_arc().downcast::<T>().ok()
}

/// 构造器、工厂方法与操作接收到的参数
pub struct Args<'a> {
    operation: &'a str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(operation: &'a str, values: &'a [Value]) -> Self {
        Self { operation, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    pub fn get(&self, index: usize) -> Result<&'a Value, InvocationError> {
        self.values.get(index).ok_or_else(|| {
            InvocationError::illegal_arguments(
                self.operation,
                format!("missing argument {} (got {})", index, self.values.len()),
            )
        })
    }

    pub fn bool(&self, index: usize) -> Result<bool, InvocationError> {
        let value = self.get(index)?;
        value.as_bool().ok_or_else(|| self.mismatch(index, "bool", value))
    }

    pub fn int(&self, index: usize) -> Result<i64, InvocationError> {
        let value = self.get(index)?;
        value.as_int().ok_or_else(|| self.mismatch(index, "i64", value))
    }

    pub fn float(&self, index: usize) -> Result<f64, InvocationError> {
        let value = self.get(index)?;
        value.as_float().ok_or_else(|| self.mismatch(index, "f64", value))
    }

    pub fn str(&self, index: usize) -> Result<&'a str, InvocationError> {
        let value = self.get(index)?;
        value.as_str().ok_or_else(|| self.mismatch(index, "String", value))
    }

    pub fn component(&self, index: usize) -> Result<Arc<dyn Component>, InvocationError> {
        let value = self.get(index)?;
        value
            .as_component()
            .cloned()
            .ok_or_else(|| self.mismatch(index, "component", value))
    }

    /// 取出组件或不透明值并转型
    pub fn downcast<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, InvocationError> {
        let value = self.get(index)?;
        value
            .downcast::<T>()
            .ok_or_else(|| self.mismatch(index, std::any::type_name::<T>(), value))
    }

    fn mismatch(&self, index: usize, expected: &str, actual: &Value) -> InvocationError {
        InvocationError::illegal_arguments(
            self.operation,
            format!("argument {} is not a {}: {:?}", index, expected, actual),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock;
    impl Component for Clock {}

    #[test]
    fn test_default_dispatch_reports_missing_operation() {
        let clock = Clock;
        let err = clock.dispatch("tick", &[]).unwrap_err();
        assert!(matches!(err, InvocationError::NoSuchOperation { ref operation, .. } if operation == "tick"));
        assert!(clock.set_property("zone", Value::from("UTC")).is_err());
    }

    #[test]
    fn test_downcast_and_identity() {
        let a: Arc<dyn Component> = Arc::new(Clock);
        let b: Arc<dyn Component> = Arc::new(Clock);
        assert!(same_instance(&a, &a.clone()));
        assert!(!same_instance(&a, &b));
        assert!(downcast_component::<Clock>(&a).is_some());
    }

    #[test]
    fn test_args_accessors_report_illegal_arguments() {
        let values = vec![Value::from(3), Value::from("x")];
        let args = Args::new("place", &values);
        assert_eq!(args.int(0).unwrap(), 3);
        assert_eq!(args.str(1).unwrap(), "x");
        assert!(matches!(args.int(1), Err(InvocationError::IllegalArguments { .. })));
        assert!(matches!(args.get(5), Err(InvocationError::IllegalArguments { .. })));
    }
}
