//! 定义图的静态校验
//!
//! 不创建任何组件，只根据定义之间的引用找出注定失败的装配：
//! 悬空引用、重复 id，以及无法通过提前暴露引用打破的循环。

use super::definition::{Definition, DependencyRef, Scope};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    /// 构造器参数或实例工厂所在组件，必须在实例化之前就绪
    Constructor,
    /// 属性注入，可以使用提前暴露的引用
    Property,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    DuplicateId(String),
    DanglingReference { from: String, to: String, binding: String },
    /// 环上的组件全部按 id 列出，顺序为注册顺序
    UnresolvableCycle { members: Vec<String>, reason: CycleReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleReason {
    ConstructorOnly,
    PerRequest,
    CircularReferencesDisabled,
}

impl fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphIssue::DuplicateId(id) => write!(f, "duplicate definition id '{}'", id),
            GraphIssue::DanglingReference { from, to, binding } => {
                write!(f, "'{}' references unknown definition '{}' via {}", from, to, binding)
            }
            GraphIssue::UnresolvableCycle { members, reason } => {
                let reason = match reason {
                    CycleReason::ConstructorOnly => "every edge is a constructor dependency",
                    CycleReason::PerRequest => "every member is per-request",
                    CycleReason::CircularReferencesDisabled => "circular references are disabled",
                };
                write!(f, "unresolvable circular reference [{}]: {}", members.join(" -> "), reason)
            }
        }
    }
}

/// 校验结果
#[derive(Debug, Default)]
pub struct GraphReport {
    pub definitions: usize,
    pub references: usize,
    pub issues: Vec<GraphIssue>,
}

impl GraphReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

struct Graph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    per_request: Vec<bool>,
    edges: Vec<Vec<(usize, EdgeKind)>>,
}

/// 校验一组按注册顺序排列的定义
pub fn validate(definitions: &[Arc<Definition>], allow_circular_references: bool) -> GraphReport {
    let mut report = GraphReport {
        definitions: definitions.len(),
        ..GraphReport::default()
    };

    let mut graph = Graph {
        ids: Vec::new(),
        index: HashMap::new(),
        per_request: Vec::new(),
        edges: Vec::new(),
    };
    let mut unique = Vec::new();
    for definition in definitions {
        if graph.index.contains_key(definition.id()) {
            report.issues.push(GraphIssue::DuplicateId(definition.id().to_string()));
            continue;
        }
        graph.index.insert(definition.id().to_string(), graph.ids.len());
        graph.ids.push(definition.id().to_string());
        graph.per_request.push(definition.scope() == Scope::PerRequest);
        graph.edges.push(Vec::new());
        unique.push(definition);
    }

    for (from, definition) in unique.iter().enumerate() {
        let mut references: Vec<(String, &str, EdgeKind)> = Vec::new();
        for binding in definition.bindings() {
            if let DependencyRef::Reference(id) = &binding.dependency {
                let kind = if binding.target.is_constructor() {
                    EdgeKind::Constructor
                } else {
                    EdgeKind::Property
                };
                references.push((binding.target.to_string(), id.as_str(), kind));
            }
        }
        if let Some(bean) = definition.factory_method().and_then(|f| f.factory_bean.as_deref()) {
            references.push(("factory_bean".to_string(), bean, EdgeKind::Constructor));
        }

        for (binding, to, kind) in references {
            report.references += 1;
            match graph.index.get(to) {
                Some(&target) => graph.edges[from].push((target, kind)),
                None => report.issues.push(GraphIssue::DanglingReference {
                    from: definition.id().to_string(),
                    to: to.to_string(),
                    binding,
                }),
            }
        }
    }

    let mut reported: HashSet<Vec<usize>> = HashSet::new();
    let mut push_cycles = |components: Vec<Vec<usize>>, reason: CycleReason, issues: &mut Vec<GraphIssue>| {
        for mut members in components {
            members.sort_unstable();
            if reported.insert(members.clone()) {
                issues.push(GraphIssue::UnresolvableCycle {
                    members: members.iter().map(|&i| graph.ids[i].clone()).collect(),
                    reason,
                });
            }
        }
    };

    if allow_circular_references {
        let constructor_only = cycles(&graph, |_, kind| kind == EdgeKind::Constructor);
        push_cycles(constructor_only, CycleReason::ConstructorOnly, &mut report.issues);
        let per_request = cycles(&graph, |to, _| graph.per_request[to]);
        let per_request = per_request
            .into_iter()
            .filter(|members| members.iter().all(|&i| graph.per_request[i]))
            .collect();
        push_cycles(per_request, CycleReason::PerRequest, &mut report.issues);
    } else {
        let all = cycles(&graph, |_, _| true);
        push_cycles(all, CycleReason::CircularReferencesDisabled, &mut report.issues);
    }

    report
}

/// 只沿 `follow` 接受的边查找强连通分量，返回所有构成环的分量
fn cycles(graph: &Graph, follow: impl Fn(usize, EdgeKind) -> bool) -> Vec<Vec<usize>> {
    struct Tarjan<'g, F> {
        graph: &'g Graph,
        follow: F,
        counter: usize,
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        components: Vec<Vec<usize>>,
    }

    impl<F: Fn(usize, EdgeKind) -> bool> Tarjan<'_, F> {
        fn visit(&mut self, v: usize) {
            self.index[v] = Some(self.counter);
            self.lowlink[v] = self.counter;
            self.counter += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            let graph = self.graph;
            for &(w, kind) in &graph.edges[v] {
                if !(self.follow)(w, kind) {
                    continue;
                }
                match self.index[w] {
                    None => {
                        self.visit(w);
                        self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.lowlink[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                let self_loop = self.graph.edges[v]
                    .iter()
                    .any(|&(w, kind)| w == v && (self.follow)(w, kind));
                if component.len() > 1 || self_loop {
                    self.components.push(component);
                }
            }
        }
    }

    let n = graph.ids.len();
    let mut tarjan = Tarjan {
        graph,
        follow,
        counter: 0,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        components: Vec::new(),
    };
    for v in 0..n {
        if tarjan.index[v].is_none() {
            tarjan.visit(v);
        }
    }
    tarjan.components
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs(definitions: Vec<Definition>) -> Vec<Arc<Definition>> {
        definitions.into_iter().map(Arc::new).collect()
    }

    #[test]
    fn test_property_cycle_is_fine_constructor_cycle_is_not() {
        let property_cycle = defs(vec![
            Definition::new("a", "A").property("b", DependencyRef::reference("b")),
            Definition::new("b", "B").property("a", DependencyRef::reference("a")),
        ]);
        assert!(validate(&property_cycle, true).is_valid());

        let report = validate(&property_cycle, false);
        assert_eq!(
            report.issues,
            vec![GraphIssue::UnresolvableCycle {
                members: vec!["a".to_string(), "b".to_string()],
                reason: CycleReason::CircularReferencesDisabled,
            }]
        );

        let mixed = defs(vec![
            Definition::new("a", "A").constructor_arg(0, DependencyRef::reference("b")),
            Definition::new("b", "B").property("a", DependencyRef::reference("a")),
        ]);
        assert!(validate(&mixed, true).is_valid());

        let constructor_cycle = defs(vec![
            Definition::new("a", "A").constructor_arg(0, DependencyRef::reference("b")),
            Definition::new("b", "B").named_arg("next", DependencyRef::reference("c")),
            Definition::new("c", "C").with_factory_bean("a", "make"),
        ]);
        let report = validate(&constructor_cycle, true);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].to_string().contains("[a -> b -> c]"));
    }

    #[test]
    fn test_per_request_cycle_and_dangling_reference() {
        let definitions = defs(vec![
            Definition::new("a", "A").per_request().property("b", DependencyRef::reference("b")),
            Definition::new("b", "B").per_request().property("a", DependencyRef::reference("a")),
            Definition::new("c", "C").property("ghost", DependencyRef::reference("ghost")),
            Definition::new("c", "C"),
        ]);
        let report = validate(&definitions, true);
        assert_eq!(report.definitions, 4);
        assert_eq!(report.references, 3);
        assert!(report.issues.contains(&GraphIssue::DuplicateId("c".to_string())));
        assert!(report.issues.contains(&GraphIssue::DanglingReference {
            from: "c".to_string(),
            to: "ghost".to_string(),
            binding: "property 'ghost'".to_string(),
        }));
        assert!(report.issues.iter().any(|issue| matches!(
            issue,
            GraphIssue::UnresolvableCycle { reason: CycleReason::PerRequest, .. }
        )));
    }

    #[test]
    fn test_self_reference_through_constructor() {
        let definitions = defs(vec![Definition::new("a", "A").constructor_arg(0, DependencyRef::reference("a"))]);
        let report = validate(&definitions, true);
        assert_eq!(report.issues.len(), 1);
    }
}
