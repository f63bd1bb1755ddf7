//! 构造器排序与工厂方法返回类型推断

use super::types::{FactoryMethod, GenericType, Ranked, TypeRef, TypeRegistry, Visibility, TYPE_LITERAL};
use super::value::Value;
use crate::errors::ContainerError;
use std::cmp::Reverse;

/// 公开的在前，同可见性下参数多的在前；其余保持声明顺序
pub fn sort_by_preference<R: Ranked>(candidates: &mut [R]) {
    candidates.sort_by_key(|candidate| {
        (
            candidate.visibility() != Visibility::Public,
            Reverse(candidate.param_count()),
        )
    });
}

/// 推断泛型工厂方法的实际返回类型。
///
/// 只有返回类型是方法自身声明的类型变量时才进行推断：
/// - 参数类型就是该类型变量时，取对应实参的运行时类型（带类型的字面量取其目标类型）；
/// - 参数是以该类型变量参数化的类型（如 `Class<T>`）时，实参为类字面量则直接取之，
///   为字符串则按类型名解析。
///
/// 其余情况返回擦除后的返回类型。
pub fn resolve_factory_return_type(
    method: &FactoryMethod,
    args: &[Value],
    types: &TypeRegistry,
) -> Result<TypeRef, ContainerError> {
    let params = method.param_types();
    if params.len() != args.len() {
        return Err(ContainerError::TypeResolution {
            name: method.name().to_string(),
            reason: format!(
                "argument count {} does not match parameter count {}",
                args.len(),
                params.len()
            ),
        });
    }

    let erased = method.erased_return().clone();
    let return_type = method.return_type();
    let declared_on_method = match return_type {
        GenericType::Var(var) => method.type_params().iter().any(|p| p == var),
        _ => false,
    };
    if !declared_on_method {
        return Ok(erased);
    }

    for (param, arg) in params.iter().zip(args) {
        if param == return_type {
            return Ok(arg.runtime_type().unwrap_or(erased));
        }
        if let GenericType::Parameterized { args: type_args, .. } = param {
            if type_args.iter().any(|type_arg| type_arg == return_type) {
                return match arg {
                    Value::Type(ty) => Ok(ty.clone()),
                    Value::Str(name) => resolve_class_name(name, types),
                    Value::Typed { raw, target } if target.name() == TYPE_LITERAL => {
                        resolve_class_name(raw, types)
                    }
                    _ => Ok(erased),
                };
            }
        }
    }
    Ok(erased)
}

fn resolve_class_name(name: &str, types: &TypeRegistry) -> Result<TypeRef, ContainerError> {
    types
        .resolve_name(name)
        .ok_or_else(|| ContainerError::TypeResolution {
            name: name.to_string(),
            reason: "no such type is registered".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beans::types::ComponentType;

    struct Candidate(usize, Visibility);

    impl Ranked for Candidate {
        fn visibility(&self) -> Visibility {
            self.1
        }

        fn param_count(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_public_and_greedy_first() {
        let mut candidates = vec![
            Candidate(3, Visibility::NonPublic),
            Candidate(2, Visibility::Public),
            Candidate(1, Visibility::Public),
        ];
        sort_by_preference(&mut candidates);
        let order: Vec<(usize, Visibility)> = candidates.iter().map(|c| (c.0, c.1)).collect();
        assert_eq!(
            order,
            vec![
                (2, Visibility::Public),
                (1, Visibility::Public),
                (3, Visibility::NonPublic)
            ]
        );
    }

    fn factory(return_type: GenericType, params: Vec<GenericType>) -> FactoryMethod {
        let method = FactoryMethod::new("create", return_type, "Object", |_, _| Err("unused".into()))
            .type_param("T");
        params.into_iter().fold(method, FactoryMethod::param)
    }

    #[test]
    fn test_infers_from_direct_type_variable_argument() {
        let types = TypeRegistry::new();
        let method = factory(GenericType::var("T"), vec![GenericType::var("T")]);

        let ty = resolve_factory_return_type(&method, &[Value::from(7)], &types).unwrap();
        assert_eq!(ty, TypeRef::new("i64"));

        let ty = resolve_factory_return_type(&method, &[Value::typed("7", "u8")], &types).unwrap();
        assert_eq!(ty, TypeRef::new("u8"));

        // 非简单值退回擦除类型
        let ty = resolve_factory_return_type(&method, &[Value::Unit], &types).unwrap();
        assert_eq!(ty, TypeRef::new("Object"));
    }

    #[test]
    fn test_infers_from_class_parameter() {
        let types = TypeRegistry::new();
        types.register(ComponentType::builder("Clock").build());
        let method = factory(
            GenericType::var("T"),
            vec![GenericType::parameterized("Class", vec![GenericType::var("T")])],
        );

        let ty = resolve_factory_return_type(&method, &[Value::Type(TypeRef::new("Clock"))], &types)
            .unwrap();
        assert_eq!(ty, TypeRef::new("Clock"));

        let ty = resolve_factory_return_type(&method, &[Value::from("Clock")], &types).unwrap();
        assert_eq!(ty, TypeRef::new("Clock"));

        let err = resolve_factory_return_type(&method, &[Value::from("Missing")], &types).unwrap_err();
        assert!(matches!(err, ContainerError::TypeResolution { ref name, .. } if name == "Missing"));
    }

    #[test]
    fn test_class_level_variable_is_not_inferred() {
        let types = TypeRegistry::new();
        let method = FactoryMethod::new("create", GenericType::var("E"), "Entity", |_, _| {
            Err("unused".into())
        })
        .param(GenericType::var("E"));

        let ty = resolve_factory_return_type(&method, &[Value::from(1)], &types).unwrap();
        assert_eq!(ty, TypeRef::new("Entity"));
    }

    #[test]
    fn test_argument_count_mismatch_is_an_error() {
        let types = TypeRegistry::new();
        let method = factory(GenericType::var("T"), vec![GenericType::var("T")]);
        assert!(resolve_factory_return_type(&method, &[], &types).is_err());
    }
}
