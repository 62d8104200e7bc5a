//! Parsed pointcut expressions and their derived predicates

use std::collections::HashSet;

use once_cell::sync::OnceCell;

use crate::common::error::{Error, Result};
use crate::reflect::ClassInfo;

use super::ast::ExpressionNode;
use super::context::{ExpressionContext, PointcutKind};
use super::eval::{CflowStack, Evaluator};
use super::namespace::NamespaceRegistry;
use super::parser::parse_expression;

/// Build the advised-class filter tree: member-level detail is dropped and
/// only constraints on the class hosting the join point survive. `call` and
/// `handler` leaves constrain the callee/exception type rather than the
/// hosting class, so they collapse to true, as do cflow subtrees (their
/// dynamic qualifier is handled separately). Negation over member-level
/// subtrees collapses to true: a class can host both matching and
/// non-matching members.
pub fn derive_advised_class_tree(node: &ExpressionNode) -> ExpressionNode {
    match node {
        ExpressionNode::And(a, b) => ExpressionNode::And(
            Box::new(derive_advised_class_tree(a)),
            Box::new(derive_advised_class_tree(b)),
        ),
        ExpressionNode::Or(a, b) => ExpressionNode::Or(
            Box::new(derive_advised_class_tree(a)),
            Box::new(derive_advised_class_tree(b)),
        ),
        ExpressionNode::Not(inner) => {
            if inner.has_member_constraint() {
                ExpressionNode::True
            } else {
                ExpressionNode::Not(Box::new(derive_advised_class_tree(inner)))
            }
        }
        ExpressionNode::Call(_) | ExpressionNode::Handler(_) => ExpressionNode::True,
        ExpressionNode::Execution(pattern) | ExpressionNode::WithinCode(pattern) => {
            ExpressionNode::Within(pattern.declaring_type.clone())
        }
        ExpressionNode::Get(pattern) | ExpressionNode::Set(pattern) => {
            ExpressionNode::Within(pattern.declaring_type.clone())
        }
        ExpressionNode::Within(pattern) => ExpressionNode::Within(pattern.clone()),
        ExpressionNode::Cflow(_) | ExpressionNode::CflowBelow(_) => ExpressionNode::True,
        ExpressionNode::Reference(name) => ExpressionNode::Reference(name.clone()),
        ExpressionNode::True => ExpressionNode::True,
    }
}

/// Extract the control-flow-scoped sub-expression: every subtree reachable
/// only through `cflow`/`cflowbelow` nodes, ORed together when several
/// exist. References are kept and resolved during evaluation.
pub fn derive_cflow_tree(node: &ExpressionNode) -> Option<ExpressionNode> {
    match node {
        ExpressionNode::And(a, b) | ExpressionNode::Or(a, b) => {
            match (derive_cflow_tree(a), derive_cflow_tree(b)) {
                (Some(left), Some(right)) => {
                    Some(ExpressionNode::Or(Box::new(left), Box::new(right)))
                }
                (Some(left), None) => Some(left),
                (None, Some(right)) => Some(right),
                (None, None) => None,
            }
        }
        ExpressionNode::Not(inner) => derive_cflow_tree(inner),
        ExpressionNode::Cflow(_) | ExpressionNode::CflowBelow(_) => Some(node.clone()),
        ExpressionNode::Reference(name) => Some(ExpressionNode::Reference(name.clone())),
        _ => None,
    }
}

/// A parsed pointcut: the predicate tree, its originating namespace, the
/// named formal arguments, and the memoized derived predicates. The tree is
/// immutable after parse; derived trees are pure functions of it, computed
/// once.
#[derive(Debug)]
pub struct ExpressionInfo {
    expression: String,
    namespace: String,
    root: ExpressionNode,
    arguments: Vec<(String, String)>,
    advised_class_tree: OnceCell<ExpressionNode>,
    cflow_tree: OnceCell<Option<ExpressionNode>>,
}

impl ExpressionInfo {
    pub fn parse(namespace: impl Into<String>, expression: &str) -> Result<Self> {
        let root = parse_expression(expression)?;
        Ok(Self {
            expression: expression.to_string(),
            namespace: namespace.into(),
            root,
            arguments: Vec::new(),
            advised_class_tree: OnceCell::new(),
            cflow_tree: OnceCell::new(),
        })
    }

    /// Parse together with a call-signature suffix carrying formal argument
    /// bindings, e.g. `txPoints(java.lang.String name, int depth)`.
    /// Returns the bare pointcut name and the populated expression.
    pub fn parse_with_signature(
        namespace: impl Into<String>,
        signature: &str,
        expression: &str,
    ) -> Result<(String, Self)> {
        let (name, arguments) = parse_pointcut_signature(signature)?;
        let mut info = Self::parse(namespace, expression)?;
        info.arguments = arguments;
        Ok((name, info))
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn root(&self) -> &ExpressionNode {
        &self.root
    }

    /// Declared formal arguments: name → declared type.
    pub fn arguments(&self) -> &[(String, String)] {
        &self.arguments
    }

    pub fn argument_type(&self, name: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(argument, _)| argument == name)
            .map(|(_, declared)| declared.as_str())
    }

    /// The memoized advised-class filter tree.
    pub fn advised_class_tree(&self) -> &ExpressionNode {
        self.advised_class_tree
            .get_or_init(|| derive_advised_class_tree(&self.root))
    }

    /// The memoized cflow sub-expression, absent when the expression has no
    /// reachable cflow node.
    pub fn cflow_tree(&self) -> Option<&ExpressionNode> {
        self.cflow_tree
            .get_or_init(|| derive_cflow_tree(&self.root))
            .as_ref()
    }

    /// Raw per-join-point match.
    pub fn matches(
        &self,
        context: &ExpressionContext,
        registry: &NamespaceRegistry,
    ) -> Result<bool> {
        Evaluator { namespace: &self.namespace, registry }.matches(&self.root, context)
    }

    /// Cheap class-level admission test: can any member of this class match.
    pub fn matches_class(&self, class: &ClassInfo, registry: &NamespaceRegistry) -> Result<bool> {
        Evaluator { namespace: &self.namespace, registry }
            .matches_class_tree(self.advised_class_tree(), class)
    }

    /// Must this class install cflow entry/exit bookkeeping.
    pub fn matches_cflow_class(
        &self,
        class: &ClassInfo,
        registry: &NamespaceRegistry,
    ) -> Result<bool> {
        Evaluator { namespace: &self.namespace, registry }.matches_cflow_class(&self.root, class)
    }

    /// Evaluate the dynamic cflow qualifier against an activation stack.
    pub fn matches_cflow_stack(
        &self,
        stack: &CflowStack,
        registry: &NamespaceRegistry,
    ) -> Result<bool> {
        match self.cflow_tree() {
            Some(tree) => {
                Evaluator { namespace: &self.namespace, registry }.matches_cflow_stack(tree, stack)
            }
            // no cflow constraint: the dynamic qualifier is vacuously true
            None => Ok(true),
        }
    }

    /// Resolve every reference transitively and check kind consistency.
    /// Returns the expression's primary pointcut kind, when it has one.
    /// Errors here are configuration errors and must surface at bind time.
    pub fn validate(&self, registry: &NamespaceRegistry) -> Result<Option<PointcutKind>> {
        let mut kinds = HashSet::new();
        let mut path = Vec::new();
        collect_kinds(&self.root, &self.namespace, registry, &mut kinds, &mut path)?;
        if kinds.len() > 1 {
            let mut names: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
            names.sort();
            return Err(Error::expression(format!(
                "expression '{}' mixes pointcut kinds: {}",
                self.expression,
                names.join(", ")
            )));
        }
        Ok(kinds.into_iter().next())
    }
}

fn collect_kinds(
    node: &ExpressionNode,
    namespace: &str,
    registry: &NamespaceRegistry,
    kinds: &mut HashSet<PointcutKind>,
    path: &mut Vec<String>,
) -> Result<()> {
    match node {
        ExpressionNode::And(a, b) | ExpressionNode::Or(a, b) => {
            collect_kinds(a, namespace, registry, kinds, path)?;
            collect_kinds(b, namespace, registry, kinds, path)
        }
        ExpressionNode::Not(inner) => collect_kinds(inner, namespace, registry, kinds, path),
        ExpressionNode::Call(_) => {
            kinds.insert(PointcutKind::Call);
            Ok(())
        }
        ExpressionNode::Execution(_) => {
            kinds.insert(PointcutKind::Execution);
            Ok(())
        }
        ExpressionNode::Get(_) => {
            kinds.insert(PointcutKind::Get);
            Ok(())
        }
        ExpressionNode::Set(_) => {
            kinds.insert(PointcutKind::Set);
            Ok(())
        }
        ExpressionNode::Handler(_) => {
            kinds.insert(PointcutKind::Handler);
            Ok(())
        }
        ExpressionNode::Within(_) | ExpressionNode::WithinCode(_) | ExpressionNode::True => Ok(()),
        // a cflow subtree has its own kind universe; validate it separately
        ExpressionNode::Cflow(inner) | ExpressionNode::CflowBelow(inner) => {
            let mut inner_kinds = HashSet::new();
            collect_kinds(inner, namespace, registry, &mut inner_kinds, path)
        }
        ExpressionNode::Reference(name) => {
            let referenced = registry.resolve(namespace, name)?;
            let key = format!("{}::{}", referenced.namespace(), name);
            if path.contains(&key) {
                return Err(Error::expression(format!(
                    "circular pointcut reference through '{name}'"
                )));
            }
            path.push(key);
            let result = collect_kinds(
                referenced.root(),
                referenced.namespace(),
                registry,
                kinds,
                path,
            );
            path.pop();
            result
        }
    }
}

/// Parse `name` or `name(type arg, type arg, ...)` into the pointcut name
/// and its formal argument bindings.
pub fn parse_pointcut_signature(signature: &str) -> Result<(String, Vec<(String, String)>)> {
    let signature = signature.trim();
    let Some(open) = signature.find('(') else {
        if signature.is_empty() || !is_identifier(signature) {
            return Err(Error::expression(format!(
                "invalid pointcut signature '{signature}'"
            )));
        }
        return Ok((signature.to_string(), Vec::new()));
    };
    let name = signature[..open].trim();
    let rest = signature[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| Error::expression(format!("unbalanced parens in signature '{signature}'")))?;
    if name.is_empty() || !is_identifier(name) {
        return Err(Error::expression(format!(
            "invalid pointcut name in signature '{signature}'"
        )));
    }
    let mut arguments = Vec::new();
    for binding in rest.split(',') {
        let binding = binding.trim();
        if binding.is_empty() {
            continue;
        }
        let mut parts = binding.split_whitespace();
        let (Some(declared_type), Some(argument), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::expression(format!(
                "malformed argument binding '{binding}' in signature '{signature}'"
            )));
        };
        arguments.push((argument.to_string(), declared_type.to_string()));
    }
    Ok((name.to_string(), arguments))
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_parsing() {
        let (name, arguments) = parse_pointcut_signature("txPoints").unwrap();
        assert_eq!(name, "txPoints");
        assert!(arguments.is_empty());

        let (name, arguments) =
            parse_pointcut_signature("txPoints(java.lang.String caller, int depth)").unwrap();
        assert_eq!(name, "txPoints");
        assert_eq!(
            arguments,
            vec![
                ("caller".to_string(), "java.lang.String".to_string()),
                ("depth".to_string(), "int".to_string()),
            ]
        );

        assert!(parse_pointcut_signature("bad name(int x)").is_err());
        assert!(parse_pointcut_signature("p(int)").is_err());
        assert!(parse_pointcut_signature("p(int x").is_err());
    }

    #[test]
    fn test_argument_lookup() {
        let (_, info) = ExpressionInfo::parse_with_signature(
            "aspect",
            "pc(java.lang.String s)",
            "execution(* pkg.Target.foo(..))",
        )
        .unwrap();
        assert_eq!(info.argument_type("s"), Some("java.lang.String"));
        assert_eq!(info.argument_type("t"), None);
    }

    #[test]
    fn test_derived_trees_are_memoized() {
        let info = ExpressionInfo::parse(
            "aspect",
            "execution(* pkg.Target.foo(..)) && cflow(execution(* pkg.Gateway.accept(..)))",
        )
        .unwrap();
        let first = info.advised_class_tree() as *const ExpressionNode;
        let second = info.advised_class_tree() as *const ExpressionNode;
        assert_eq!(first, second);
        assert!(info.cflow_tree().is_some());
        assert!(ExpressionInfo::parse("aspect", "within(pkg..*)")
            .unwrap()
            .cflow_tree()
            .is_none());
    }
}
