//! Named-pointcut namespaces
//!
//! One namespace per defining aspect; the registry is owned by the weaving
//! session (no ambient static state). Registration is monotonic: the first
//! expression registered under a (namespace, name) pair wins.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::error::{Error, Result};

use super::info::ExpressionInfo;

#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    spaces: Mutex<HashMap<String, HashMap<String, Arc<ExpressionInfo>>>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self { spaces: Mutex::new(HashMap::new()) }
    }

    /// Register a named pointcut. A name already taken in its namespace is
    /// kept as first registered; the attempt is reported at debug level.
    pub fn register(
        &self,
        namespace: &str,
        name: &str,
        info: ExpressionInfo,
    ) -> Arc<ExpressionInfo> {
        let mut spaces = self.spaces.lock();
        let space = spaces.entry(namespace.to_string()).or_default();
        if let Some(existing) = space.get(name) {
            log::debug!(
                "pointcut '{name}' already registered in namespace '{namespace}', keeping first registration"
            );
            return existing.clone();
        }
        let info = Arc::new(info);
        space.insert(name.to_string(), info.clone());
        info
    }

    /// Resolve a reference: `name` in the defining namespace, or
    /// `other.ns.name` with an explicit namespace qualifier. A missing
    /// reference is a configuration error, not a silent false.
    pub fn resolve(&self, default_namespace: &str, reference: &str) -> Result<Arc<ExpressionInfo>> {
        let spaces = self.spaces.lock();
        let lookup = |namespace: &str, name: &str| -> Option<Arc<ExpressionInfo>> {
            spaces.get(namespace).and_then(|space| space.get(name)).cloned()
        };
        let found = match reference.rsplit_once('.') {
            Some((namespace, name)) => {
                lookup(namespace, name).or_else(|| lookup(default_namespace, reference))
            }
            None => lookup(default_namespace, reference),
        };
        found.ok_or_else(|| {
            Error::expression(format!(
                "unresolved pointcut reference '{reference}' (namespace '{default_namespace}')"
            ))
        })
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.spaces
            .lock()
            .get(namespace)
            .map(|space| space.contains_key(name))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(namespace: &str, expression: &str) -> ExpressionInfo {
        ExpressionInfo::parse(namespace, expression).unwrap()
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = NamespaceRegistry::new();
        registry.register("aspect", "pc", info("aspect", "within(pkg..*)"));
        assert!(registry.resolve("aspect", "pc").is_ok());
        assert!(registry.resolve("aspect", "missing").is_err());
    }

    #[test]
    fn test_qualified_resolution() {
        let registry = NamespaceRegistry::new();
        registry.register("other", "pc", info("other", "within(pkg..*)"));
        assert!(registry.resolve("aspect", "other.pc").is_ok());
        assert!(registry.resolve("aspect", "pc").is_err());
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = NamespaceRegistry::new();
        let first = registry.register("aspect", "pc", info("aspect", "within(pkg..*)"));
        let second = registry.register("aspect", "pc", info("aspect", "within(other..*)"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.expression(), "within(pkg..*)");
    }
}
