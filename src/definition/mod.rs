//! System definitions and the registry the weaver queries
//!
//! A [`SystemDefinition`] is the resolved form of one deployment descriptor:
//! package admission rules plus the advice and introduction bindings, each
//! carrying a parsed expression. The [`DefinitionRegistry`] holds every
//! definition registered for a weaving scope and answers the
//! "does any binding match this context" queries driving the transformers.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::error::{Error, Result};
use crate::expr::{ExpressionContext, ExpressionInfo, NamespaceRegistry, PointcutKind};
use crate::reflect::ClassInfo;

/// Relative position of an advice around its join point. Ordering and
/// stacking of several advices is the dispatch layer's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdviceKind {
    Before,
    After,
    Around,
}

/// One advice binding: a named advice of an aspect attached to a pointcut.
#[derive(Debug)]
pub struct AdviceBinding {
    pub name: String,
    pub aspect: String,
    pub kind: AdviceKind,
    pub expression: Arc<ExpressionInfo>,
    /// Primary pointcut kind computed at bind time; bindings are only
    /// evaluated against contexts of their own kind.
    primary_kind: Option<PointcutKind>,
}

impl AdviceBinding {
    pub fn primary_kind(&self) -> Option<PointcutKind> {
        self.primary_kind
    }

    fn applies_to(&self, kind: PointcutKind) -> bool {
        match self.primary_kind {
            Some(primary) => primary == kind || kind == PointcutKind::Any,
            // a kind-neutral expression (pure within/withincode) applies to
            // every structural kind
            None => true,
        }
    }
}

/// One introduced method signature, delegated to the mixin instance at
/// runtime.
#[derive(Debug, Clone)]
pub struct IntroducedMethod {
    pub name: String,
    pub descriptor: String,
}

/// An introduction binding: an interface (and optionally its mixin-backed
/// implementation) added to every class the expression admits.
#[derive(Debug)]
pub struct IntroductionBinding {
    pub name: String,
    pub interface: String,
    pub methods: Vec<IntroducedMethod>,
    pub expression: Arc<ExpressionInfo>,
}

/// Resolved definition of one weaving scope: admission rules and bindings.
/// Exclusion takes precedence over inclusion; an empty include set admits
/// everything not excluded.
#[derive(Debug, Default)]
pub struct SystemDefinition {
    uuid: String,
    include_prefixes: Vec<String>,
    exclude_prefixes: Vec<String>,
    advice_bindings: Vec<AdviceBinding>,
    introduction_bindings: Vec<IntroductionBinding>,
}

impl SystemDefinition {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into(), ..Default::default() }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn add_include_prefix(&mut self, prefix: impl Into<String>) {
        self.include_prefixes.push(normalize_prefix(prefix.into()));
    }

    pub fn add_exclude_prefix(&mut self, prefix: impl Into<String>) {
        self.exclude_prefixes.push(normalize_prefix(prefix.into()));
    }

    /// Is a class admitted into this definition's weaving scope.
    pub fn in_include_scope(&self, class_name: &str) -> bool {
        let probe = format!("{class_name}.");
        if self.exclude_prefixes.iter().any(|prefix| probe.starts_with(prefix.as_str())) {
            return false;
        }
        self.include_prefixes.is_empty()
            || self.include_prefixes.iter().any(|prefix| probe.starts_with(prefix.as_str()))
    }

    /// Add an advice binding, validating its expression eagerly: unresolved
    /// references and kind mixes surface here, at bind time.
    pub fn add_advice_binding(
        &mut self,
        name: impl Into<String>,
        aspect: impl Into<String>,
        kind: AdviceKind,
        expression: ExpressionInfo,
        namespaces: &NamespaceRegistry,
    ) -> Result<()> {
        let primary_kind = expression.validate(namespaces)?;
        self.advice_bindings.push(AdviceBinding {
            name: name.into(),
            aspect: aspect.into(),
            kind,
            expression: Arc::new(expression),
            primary_kind,
        });
        Ok(())
    }

    pub fn add_introduction_binding(
        &mut self,
        name: impl Into<String>,
        interface: impl Into<String>,
        methods: Vec<IntroducedMethod>,
        expression: ExpressionInfo,
        namespaces: &NamespaceRegistry,
    ) -> Result<()> {
        expression.validate(namespaces)?;
        self.introduction_bindings.push(IntroductionBinding {
            name: name.into(),
            interface: interface.into(),
            methods,
            expression: Arc::new(expression),
        });
        Ok(())
    }

    pub fn advice_bindings(&self) -> &[AdviceBinding] {
        &self.advice_bindings
    }

    pub fn introduction_bindings(&self) -> &[IntroductionBinding] {
        &self.introduction_bindings
    }

    fn aspect_names(&self) -> impl Iterator<Item = &str> {
        self.advice_bindings.iter().map(|b| b.aspect.as_str())
    }
}

fn normalize_prefix(mut prefix: String) -> String {
    if !prefix.ends_with('.') {
        prefix.push('.');
    }
    prefix
}

/// Per-scope registry of system definitions. Registration is monotonic and
/// first-wins: neither a definition uuid nor an aspect name is ever
/// overridden by a later registration.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: Mutex<Vec<Arc<SystemDefinition>>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self { definitions: Mutex::new(Vec::new()) }
    }

    pub fn register(&self, definition: SystemDefinition) -> Result<Arc<SystemDefinition>> {
        let mut definitions = self.definitions.lock();
        if let Some(existing) = definitions.iter().find(|d| d.uuid() == definition.uuid()) {
            log::debug!(
                "definition '{}' already registered, keeping first registration",
                definition.uuid()
            );
            return Ok(existing.clone());
        }
        for registered in definitions.iter() {
            for aspect in definition.aspect_names() {
                if registered.aspect_names().any(|name| name == aspect) {
                    log::debug!(
                        "aspect '{aspect}' already registered by definition '{}', \
                         later bindings for it are ignored",
                        registered.uuid()
                    );
                }
            }
        }
        let definition = Arc::new(definition);
        definitions.push(definition.clone());
        Ok(definition)
    }

    pub fn definitions(&self) -> Vec<Arc<SystemDefinition>> {
        self.definitions.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.lock().is_empty()
    }

    /// Is the class inside the include scope of at least one definition.
    pub fn in_include_scope(&self, class_name: &str) -> bool {
        self.definitions.lock().iter().any(|d| d.in_include_scope(class_name))
    }

    /// Does any registered binding of the given kind match this context.
    /// A single join point may be matched by several independent bindings;
    /// this query only answers whether at least one does.
    pub fn matches_any(
        &self,
        context: &ExpressionContext,
        namespaces: &NamespaceRegistry,
    ) -> Result<bool> {
        for definition in self.definitions.lock().iter() {
            for binding in definition.advice_bindings() {
                if !binding.applies_to(context.kind) {
                    continue;
                }
                if binding.expression.matches(context, namespaces)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Cheap class-level pre-filter: could any binding of this kind advise
    /// a member of the class.
    pub fn advises_class(
        &self,
        class: &ClassInfo,
        kind: PointcutKind,
        namespaces: &NamespaceRegistry,
    ) -> Result<bool> {
        for definition in self.definitions.lock().iter() {
            if !definition.in_include_scope(&class.name) {
                continue;
            }
            for binding in definition.advice_bindings() {
                if !binding.applies_to(kind) {
                    continue;
                }
                if binding.expression.matches_class(class, namespaces)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Must the class install cflow entry/exit bookkeeping for any binding.
    pub fn requires_cflow_bookkeeping(
        &self,
        class: &ClassInfo,
        namespaces: &NamespaceRegistry,
    ) -> Result<bool> {
        for definition in self.definitions.lock().iter() {
            for binding in definition.advice_bindings() {
                if binding.expression.matches_cflow_class(class, namespaces)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Introduction bindings whose type expression admits the class.
    pub fn introductions_for(
        &self,
        class: &ClassInfo,
        namespaces: &NamespaceRegistry,
    ) -> Result<Vec<(Arc<SystemDefinition>, usize)>> {
        let mut matched = Vec::new();
        for definition in self.definitions.lock().iter() {
            if !definition.in_include_scope(&class.name) {
                continue;
            }
            for (index, binding) in definition.introduction_bindings().iter().enumerate() {
                let context =
                    ExpressionContext::within_class(Arc::new(class.clone()));
                if binding.expression.matches(&context, namespaces)? {
                    matched.push((definition.clone(), index));
                }
            }
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_exclude_precedence() {
        let mut definition = SystemDefinition::new("test");
        assert!(definition.in_include_scope("any.Class"));

        definition.add_exclude_prefix("pkg.internal");
        assert!(!definition.in_include_scope("pkg.internal.Secret"));
        assert!(definition.in_include_scope("pkg.Target"));

        definition.add_include_prefix("pkg");
        assert!(definition.in_include_scope("pkg.Target"));
        assert!(!definition.in_include_scope("other.Target"));
        // exclude still beats include
        assert!(!definition.in_include_scope("pkg.internal.Secret"));
        // prefix matching is on package segments, not raw characters
        assert!(!definition.in_include_scope("pkgx.Target"));
    }

    #[test]
    fn test_bind_time_validation() {
        let namespaces = NamespaceRegistry::new();
        let mut definition = SystemDefinition::new("test");
        let unresolved = ExpressionInfo::parse("aspect", "missingPointcut").unwrap();
        assert!(definition
            .add_advice_binding("a", "aspect", AdviceKind::Before, unresolved, &namespaces)
            .is_err());
        let valid = ExpressionInfo::parse("aspect", "execution(* pkg.*.foo(..))").unwrap();
        assert!(definition
            .add_advice_binding("a", "aspect", AdviceKind::Before, valid, &namespaces)
            .is_ok());
        assert_eq!(
            definition.advice_bindings()[0].primary_kind(),
            Some(PointcutKind::Execution)
        );
    }

    #[test]
    fn test_registry_first_registration_wins() {
        let registry = DefinitionRegistry::new();
        let namespaces = NamespaceRegistry::new();
        let mut first = SystemDefinition::new("scope");
        first.add_include_prefix("pkg");
        let expression = ExpressionInfo::parse("aspect", "execution(* pkg.*.foo(..))").unwrap();
        first
            .add_advice_binding("a", "aspect", AdviceKind::Before, expression, &namespaces)
            .unwrap();
        let first = registry.register(first).unwrap();

        let second = registry.register(SystemDefinition::new("scope")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.definitions().len(), 1);
    }

    #[test]
    fn test_cflow_bookkeeping_classes() {
        let registry = DefinitionRegistry::new();
        let namespaces = NamespaceRegistry::new();
        let mut definition = SystemDefinition::new("scope");
        definition
            .add_advice_binding(
                "a",
                "aspect",
                AdviceKind::Around,
                ExpressionInfo::parse(
                    "aspect",
                    "execution(* pkg.Worker.serve(..)) && cflow(execution(* pkg.Gateway.accept(..)))",
                )
                .unwrap(),
                &namespaces,
            )
            .unwrap();
        registry.register(definition).unwrap();

        let gateway = ClassInfo::named("pkg.Gateway");
        let worker = ClassInfo::named("pkg.Worker");
        assert!(registry.requires_cflow_bookkeeping(&gateway, &namespaces).unwrap());
        assert!(!registry.requires_cflow_bookkeeping(&worker, &namespaces).unwrap());
    }

    #[test]
    fn test_matches_any_by_kind_bucket() {
        let registry = DefinitionRegistry::new();
        let namespaces = NamespaceRegistry::new();
        let mut definition = SystemDefinition::new("scope");
        definition
            .add_advice_binding(
                "a",
                "aspect",
                AdviceKind::Around,
                ExpressionInfo::parse("aspect", "execution(* pkg.Target.foo(..))").unwrap(),
                &namespaces,
            )
            .unwrap();
        registry.register(definition).unwrap();

        let method = Arc::new(crate::reflect::MethodInfo {
            name: "foo".to_string(),
            modifiers: crate::classfile::flag::access_flags::ACC_PUBLIC,
            parameters: Vec::new(),
            return_type: "void".to_string(),
            exceptions: Vec::new(),
            declaring_class: "pkg.Target".to_string(),
            annotations: Vec::new(),
        });
        let execution = ExpressionContext::execution(method.clone(), None);
        assert!(registry.matches_any(&execution, &namespaces).unwrap());

        // a CALL context never reaches the execution binding, so the strict
        // kind check cannot trip on it
        let call = ExpressionContext::call(method, None);
        assert!(!registry.matches_any(&call, &namespaces).unwrap());
    }
}
