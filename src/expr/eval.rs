//! Structural evaluation of expression trees
//!
//! Three evaluation modes share the same tree:
//!
//! - `matches`: the raw per-join-point predicate with strict kind checking;
//!   a `set(..)` leaf evaluated against a CALL context is an error, not a
//!   silent false.
//! - `matches_class_tree`: the relaxed evaluation of a derived advised-class
//!   filter tree (produced by [`super::info::ExpressionInfo`]).
//! - `matches_cflow_*`: class-level and stack-level evaluation of the
//!   control-flow-scoped sub-expression.
//!
//! `cflow`/`cflowbelow` nodes evaluate to true in the structural pass: their
//! truth is a dynamic property maintained by the dispatch layer's stack
//! bookkeeping, and the weaver ANDs that dynamic flag in at runtime.

use crate::common::error::{Error, Result};
use crate::reflect::ClassInfo;

use super::ast::ExpressionNode;
use super::context::{ExpressionContext, PointcutKind, ReflectiveInfo};
use super::namespace::NamespaceRegistry;

/// Evaluator bound to the namespace its expression was defined in; bare
/// pointcut references resolve there.
pub struct Evaluator<'a> {
    pub namespace: &'a str,
    pub registry: &'a NamespaceRegistry,
}

impl Evaluator<'_> {
    /// Strict structural match of a tree against a context.
    pub fn matches(&self, node: &ExpressionNode, context: &ExpressionContext) -> Result<bool> {
        match node {
            ExpressionNode::And(a, b) => Ok(self.matches(a, context)? && self.matches(b, context)?),
            ExpressionNode::Or(a, b) => Ok(self.matches(a, context)? || self.matches(b, context)?),
            ExpressionNode::Not(inner) => Ok(!self.matches(inner, context)?),
            ExpressionNode::True => Ok(true),

            ExpressionNode::Call(pattern) => {
                self.check_kind(PointcutKind::Call, "call", context)?;
                Ok(match &context.info {
                    ReflectiveInfo::Method(m) => pattern.matches_method(m),
                    ReflectiveInfo::Constructor(c) => pattern.matches_constructor(c),
                    _ => false,
                })
            }
            ExpressionNode::Execution(pattern) => {
                self.check_kind(PointcutKind::Execution, "execution", context)?;
                Ok(match &context.info {
                    ReflectiveInfo::Method(m) => pattern.matches_method(m),
                    ReflectiveInfo::Constructor(c) => pattern.matches_constructor(c),
                    _ => false,
                })
            }
            ExpressionNode::Get(pattern) => {
                self.check_kind(PointcutKind::Get, "get", context)?;
                Ok(match &context.info {
                    ReflectiveInfo::Field(f) => pattern.matches_field(f),
                    _ => false,
                })
            }
            ExpressionNode::Set(pattern) => {
                self.check_kind(PointcutKind::Set, "set", context)?;
                Ok(match &context.info {
                    ReflectiveInfo::Field(f) => pattern.matches_field(f),
                    _ => false,
                })
            }
            ExpressionNode::Handler(pattern) => {
                self.check_kind(PointcutKind::Handler, "handler", context)?;
                Ok(match &context.info {
                    ReflectiveInfo::Class(c) => pattern.matches_class(&c.name),
                    _ => false,
                })
            }

            // within/withincode test the enclosing context and are valid for
            // every join-point kind
            ExpressionNode::Within(pattern) => Ok(context
                .within
                .as_ref()
                .map(|w| pattern.matches_class(w.enclosing_class_name()))
                .unwrap_or(false)),
            ExpressionNode::WithinCode(pattern) => Ok(match &context.within {
                Some(ReflectiveInfo::Method(m)) => pattern.matches_method(m),
                Some(ReflectiveInfo::Constructor(c)) => pattern.matches_constructor(c),
                _ => false,
            }),

            ExpressionNode::Cflow(_) | ExpressionNode::CflowBelow(_) => Ok(true),

            ExpressionNode::Reference(name) => {
                let referenced = self.registry.resolve(self.namespace, name)?;
                let evaluator = Evaluator { namespace: referenced.namespace(), registry: self.registry };
                evaluator.matches(referenced.root(), context)
            }
        }
    }

    fn check_kind(
        &self,
        expected: PointcutKind,
        leaf: &str,
        context: &ExpressionContext,
    ) -> Result<()> {
        if context.kind == expected || context.kind == PointcutKind::Any {
            Ok(())
        } else {
            Err(Error::expression(format!(
                "kind mismatch: {leaf}(..) pointcut evaluated against {} context",
                context.kind
            )))
        }
    }

    /// Evaluate a derived advised-class filter tree against a class. Only
    /// node kinds the derivation produces can appear here.
    pub fn matches_class_tree(&self, node: &ExpressionNode, class: &ClassInfo) -> Result<bool> {
        match node {
            ExpressionNode::And(a, b) => {
                Ok(self.matches_class_tree(a, class)? && self.matches_class_tree(b, class)?)
            }
            ExpressionNode::Or(a, b) => {
                Ok(self.matches_class_tree(a, class)? || self.matches_class_tree(b, class)?)
            }
            ExpressionNode::Not(inner) => Ok(!self.matches_class_tree(inner, class)?),
            ExpressionNode::True => Ok(true),
            ExpressionNode::Within(pattern) => Ok(pattern.matches_class(&class.name)),
            ExpressionNode::Reference(name) => {
                let referenced = self.registry.resolve(self.namespace, name)?;
                let evaluator = Evaluator { namespace: referenced.namespace(), registry: self.registry };
                evaluator.matches_class_tree(referenced.advised_class_tree(), class)
            }
            other => Err(Error::internal(format!(
                "unexpected node in advised-class filter tree: {other:?}"
            ))),
        }
    }

    /// Does this class have to install cflow entry/exit bookkeeping, i.e.
    /// could any of its members be an activation of a cflow sub-expression?
    pub fn matches_cflow_class(&self, node: &ExpressionNode, class: &ClassInfo) -> Result<bool> {
        match node {
            // union over the tree shape: any reachable cflow subtree counts
            ExpressionNode::And(a, b) | ExpressionNode::Or(a, b) => {
                Ok(self.matches_cflow_class(a, class)? || self.matches_cflow_class(b, class)?)
            }
            ExpressionNode::Not(inner) => self.matches_cflow_class(inner, class),
            ExpressionNode::Cflow(inner) | ExpressionNode::CflowBelow(inner) => {
                let derived = super::info::derive_advised_class_tree(inner);
                self.matches_class_tree(&derived, class)
            }
            ExpressionNode::Reference(name) => {
                let referenced = self.registry.resolve(self.namespace, name)?;
                let evaluator = Evaluator { namespace: referenced.namespace(), registry: self.registry };
                match referenced.cflow_tree() {
                    Some(tree) => evaluator.matches_cflow_class(tree, class),
                    None => Ok(false),
                }
            }
            _ => Ok(false),
        }
    }

    /// Evaluate cflow semantics against an activation stack. Non-cflow
    /// leaves are tested against the innermost (current) activation.
    pub fn matches_cflow_stack(&self, node: &ExpressionNode, stack: &CflowStack) -> Result<bool> {
        match node {
            ExpressionNode::And(a, b) => {
                Ok(self.matches_cflow_stack(a, stack)? && self.matches_cflow_stack(b, stack)?)
            }
            ExpressionNode::Or(a, b) => {
                Ok(self.matches_cflow_stack(a, stack)? || self.matches_cflow_stack(b, stack)?)
            }
            ExpressionNode::Not(inner) => Ok(!self.matches_cflow_stack(inner, stack)?),
            ExpressionNode::True => Ok(true),

            // cflow: any activation on the stack, the current one included
            ExpressionNode::Cflow(inner) => {
                for frame in stack.frames() {
                    if self.matches_frame(inner, frame)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            // cflowbelow: strictly-enclosing activations only
            ExpressionNode::CflowBelow(inner) => {
                let frames = stack.frames();
                let Some((_, enclosing)) = frames.split_last() else {
                    return Ok(false);
                };
                for frame in enclosing {
                    if self.matches_frame(inner, frame)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }

            ExpressionNode::Reference(name) => {
                let referenced = self.registry.resolve(self.namespace, name)?;
                let evaluator = Evaluator { namespace: referenced.namespace(), registry: self.registry };
                evaluator.matches_cflow_stack(referenced.root(), stack)
            }

            other => match stack.current() {
                Some(frame) => self.matches(other, frame),
                None => Ok(false),
            },
        }
    }

    /// An activation of a different kind than a leaf expects is simply not a
    /// match for that leaf; bind-time validation already rejected genuinely
    /// malformed expressions.
    fn matches_frame(&self, node: &ExpressionNode, frame: &ExpressionContext) -> Result<bool> {
        match self.matches(node, frame) {
            Ok(matched) => Ok(matched),
            Err(Error::Expression { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }
}

/// An outermost→innermost stack of join-point activations, the runtime
/// bookkeeping counterpart the dispatch layer maintains per thread.
#[derive(Debug, Default)]
pub struct CflowStack {
    frames: Vec<ExpressionContext>,
}

impl CflowStack {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Record entering a join point's dynamic extent.
    pub fn enter(&mut self, context: ExpressionContext) {
        self.frames.push(context);
    }

    /// Record leaving the innermost join point.
    pub fn exit(&mut self) {
        self.frames.pop();
    }

    pub fn frames(&self) -> &[ExpressionContext] {
        &self.frames
    }

    /// The innermost activation, when any.
    pub fn current(&self) -> Option<&ExpressionContext> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::classfile::flag::access_flags::*;
    use crate::expr::info::ExpressionInfo;
    use crate::reflect::{FieldInfo, MethodInfo};

    fn method(name: &str, params: &[&str], return_type: &str, declaring: &str) -> Arc<MethodInfo> {
        Arc::new(MethodInfo {
            name: name.to_string(),
            modifiers: ACC_PUBLIC,
            parameters: params.iter().map(|p| p.to_string()).collect(),
            return_type: return_type.to_string(),
            exceptions: Vec::new(),
            declaring_class: declaring.to_string(),
            annotations: Vec::new(),
        })
    }

    fn field(name: &str, type_name: &str, modifiers: u16, declaring: &str) -> Arc<FieldInfo> {
        Arc::new(FieldInfo {
            name: name.to_string(),
            type_name: type_name.to_string(),
            modifiers,
            declaring_class: declaring.to_string(),
            annotations: Vec::new(),
        })
    }

    fn matches(expression: &str, context: &ExpressionContext) -> Result<bool> {
        let registry = NamespaceRegistry::new();
        ExpressionInfo::parse("test", expression)
            .unwrap()
            .matches(context, &registry)
    }

    #[test]
    fn test_call_scenario() {
        let context = ExpressionContext::call(method("foo", &[], "void", "pkg.Target"), None);
        assert!(matches("call(void pkg.Target.foo())", &context).unwrap());
        assert!(!matches("call(void pkg.Target.bar())", &context).unwrap());
        assert!(!matches("call(int pkg.Target.foo())", &context).unwrap());
        assert!(!matches("call(void pkg.Other.foo())", &context).unwrap());
    }

    #[test]
    fn test_within_scenario() {
        let registry = NamespaceRegistry::new();
        let info = ExpressionInfo::parse("test", "within(pkg..*)").unwrap();
        for class in ["pkg.Target", "pkg.sub.Target"] {
            let context =
                ExpressionContext::within_class(Arc::new(crate::reflect::ClassInfo::named(class)));
            assert!(info.matches(&context, &registry).unwrap(), "{class}");
        }
        let context = ExpressionContext::within_class(Arc::new(
            crate::reflect::ClassInfo::named("otherpkg.Target"),
        ));
        assert!(!info.matches(&context, &registry).unwrap());
    }

    #[test]
    fn test_set_scenario() {
        let public_field = field("count", "int", ACC_PUBLIC, "pkg.Target");
        let context = ExpressionContext::set(public_field, None);
        assert!(matches("set(public int pkg.Target.count)", &context).unwrap());

        let private_field = field("count", "int", ACC_PRIVATE, "pkg.Target");
        let context = ExpressionContext::set(private_field, None);
        assert!(!matches("set(public int pkg.Target.count)", &context).unwrap());
    }

    #[test]
    fn test_kind_mismatch_is_an_error() {
        let context = ExpressionContext::call(method("foo", &[], "void", "pkg.Target"), None);
        let result = matches("set(public int pkg.Target.count)", &context);
        assert!(matches!(result, Err(Error::Expression { .. })));
        // within is kind-neutral and combines with any primary leaf
        let combined = matches("call(void pkg.Target.foo()) && within(pkg..*)", &context);
        assert_eq!(combined.unwrap(), false);
    }

    #[test]
    fn test_within_constrains_composites() {
        let within = ReflectiveInfo::Method(method("caller", &[], "void", "pkg.Caller"));
        let context = ExpressionContext::call(
            method("foo", &[], "void", "pkg.Target"),
            Some(within),
        );
        assert!(matches("call(void pkg.Target.foo()) && within(pkg..*)", &context).unwrap());
        assert!(!matches("call(void pkg.Target.foo()) && within(test..*)", &context).unwrap());
        assert!(
            matches("call(void pkg.Target.foo()) && withincode(void pkg.Caller.caller())", &context)
                .unwrap()
        );
    }

    #[test]
    fn test_named_references_are_substitutable() {
        let registry = NamespaceRegistry::new();
        registry.register(
            "aspect",
            "inPkg",
            ExpressionInfo::parse("aspect", "within(pkg..*)").unwrap(),
        );
        let inline = ExpressionInfo::parse("aspect", "call(void pkg.Target.foo()) && within(pkg..*)")
            .unwrap();
        let referenced =
            ExpressionInfo::parse("aspect", "call(void pkg.Target.foo()) && inPkg").unwrap();
        let negated = ExpressionInfo::parse("aspect", "call(void pkg.Target.foo()) && !inPkg").unwrap();

        for class in ["pkg.Caller", "other.Caller"] {
            let within = ReflectiveInfo::Method(method("caller", &[], "void", class));
            let context =
                ExpressionContext::call(method("foo", &[], "void", "pkg.Target"), Some(within));
            let expected = inline.matches(&context, &registry).unwrap();
            assert_eq!(referenced.matches(&context, &registry).unwrap(), expected);
            assert_eq!(negated.matches(&context, &registry).unwrap(), !expected);
        }
        assert!(referenced.validate(&registry).is_ok());
    }

    #[test]
    fn test_unresolved_reference_fails_at_validation() {
        let registry = NamespaceRegistry::new();
        let info = ExpressionInfo::parse("aspect", "call(void pkg.T.foo()) && missing").unwrap();
        assert!(info.validate(&registry).is_err());
    }

    #[test]
    fn test_kind_mixing_rejected_at_validation() {
        let registry = NamespaceRegistry::new();
        let mixed = ExpressionInfo::parse(
            "aspect",
            "call(void pkg.T.foo()) || set(public int pkg.T.count)",
        )
        .unwrap();
        assert!(mixed.validate(&registry).is_err());
        // a cflow subtree keeps its own kind universe
        let nested = ExpressionInfo::parse(
            "aspect",
            "set(public int pkg.T.count) && cflow(execution(* pkg.Gateway.accept(..)))",
        )
        .unwrap();
        assert_eq!(nested.validate(&registry).unwrap(), Some(PointcutKind::Set));
    }

    #[test]
    fn test_cflow_nodes_are_true_structurally() {
        let within = ReflectiveInfo::Method(method("caller", &[], "void", "pkg.Caller"));
        let context =
            ExpressionContext::call(method("foo", &[], "void", "pkg.Target"), Some(within));
        assert!(matches(
            "call(void pkg.Target.foo()) && cflow(execution(* pkg.Gateway.accept(..)))",
            &context
        )
        .unwrap());
    }

    #[test]
    fn test_cflow_stack_semantics() {
        let registry = NamespaceRegistry::new();
        let info = ExpressionInfo::parse(
            "aspect",
            "cflow(execution(* pkg.Gateway.accept(..)))",
        )
        .unwrap();
        let below = ExpressionInfo::parse(
            "aspect",
            "cflowbelow(execution(* pkg.Gateway.accept(..)))",
        )
        .unwrap();

        let accept = ExpressionContext::execution(
            method("accept", &["int"], "void", "pkg.Gateway"),
            None,
        );
        let nested = ExpressionContext::execution(
            method("serve", &[], "void", "pkg.Worker"),
            None,
        );

        let mut stack = CflowStack::new();
        assert!(!info.matches_cflow_stack(&stack, &registry).unwrap());

        // the activation of X itself satisfies cflow(X) but not cflowbelow(X)
        stack.enter(accept.clone());
        assert!(info.matches_cflow_stack(&stack, &registry).unwrap());
        assert!(!below.matches_cflow_stack(&stack, &registry).unwrap());

        // any context nested strictly inside satisfies both
        stack.enter(nested);
        assert!(info.matches_cflow_stack(&stack, &registry).unwrap());
        assert!(below.matches_cflow_stack(&stack, &registry).unwrap());

        stack.exit();
        stack.exit();
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_advised_class_filter() {
        let registry = NamespaceRegistry::new();
        let info = ExpressionInfo::parse(
            "aspect",
            "execution(* pkg.Target.*(..)) && !within(test..*)",
        )
        .unwrap();
        let target = crate::reflect::ClassInfo::named("pkg.Target");
        let other = crate::reflect::ClassInfo::named("other.Thing");
        assert!(info.matches_class(&target, &registry).unwrap());
        assert!(!info.matches_class(&other, &registry).unwrap());

        // call leaves do not constrain the hosting class
        let call = ExpressionInfo::parse("aspect", "call(void pkg.Target.foo())").unwrap();
        assert!(call.matches_class(&other, &registry).unwrap());

        // negation over member-level subtrees admits conservatively
        let negated = ExpressionInfo::parse("aspect", "!execution(* pkg.Target.*(..))").unwrap();
        assert!(negated.matches_class(&target, &registry).unwrap());
    }

    #[test]
    fn test_cflow_class_filter() {
        let registry = NamespaceRegistry::new();
        let info = ExpressionInfo::parse(
            "aspect",
            "execution(* pkg.Worker.serve(..)) && cflow(execution(* pkg.Gateway.accept(..)))",
        )
        .unwrap();
        let gateway = crate::reflect::ClassInfo::named("pkg.Gateway");
        let worker = crate::reflect::ClassInfo::named("pkg.Worker");
        assert!(info.matches_cflow_class(&gateway, &registry).unwrap());
        assert!(!info.matches_cflow_class(&worker, &registry).unwrap());

        let plain = ExpressionInfo::parse("aspect", "execution(* pkg.Worker.serve(..))").unwrap();
        assert!(!plain.matches_cflow_class(&gateway, &registry).unwrap());
    }
}
