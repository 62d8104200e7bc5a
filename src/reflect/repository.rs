//! Loader-scoped metadata cache
//!
//! One repository per weaving scope. The lock is coarse: class loading
//! volume is modest next to class-load latency, and avoiding duplicate
//! metadata construction for the same class matters more than throughput.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::info::ClassInfo;

#[derive(Debug, Default)]
pub struct ClassInfoRepository {
    classes: Mutex<HashMap<String, Arc<ClassInfo>>>,
}

impl ClassInfoRepository {
    pub fn new() -> Self {
        Self { classes: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClassInfo>> {
        self.classes.lock().get(name).cloned()
    }

    /// Check-then-insert under one lock: the first record published for a
    /// qualified name wins, concurrent makers never race in two entries.
    pub fn get_or_insert_with<F>(&self, name: &str, make: F) -> Arc<ClassInfo>
    where
        F: FnOnce() -> ClassInfo,
    {
        let mut classes = self.classes.lock();
        if let Some(existing) = classes.get(name) {
            return existing.clone();
        }
        let info = Arc::new(make());
        classes.insert(name.to_string(), info.clone());
        info
    }

    pub fn insert(&self, info: ClassInfo) -> Arc<ClassInfo> {
        let name = info.name.clone();
        let mut classes = self.classes.lock();
        classes.entry(name).or_insert_with(|| Arc::new(info)).clone()
    }

    /// Explicit invalidation on class redefinition/unload.
    pub fn remove(&self, name: &str) -> bool {
        self.classes.lock().remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.classes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.lock().is_empty()
    }

    /// Lazily resolve the superclass record of a cached class.
    pub fn superclass_of(&self, info: &ClassInfo) -> Option<Arc<ClassInfo>> {
        info.super_name.as_deref().and_then(|name| self.get(name))
    }

    /// Lazily resolve the implemented-interface records of a cached class.
    pub fn interfaces_of(&self, info: &ClassInfo) -> Vec<Arc<ClassInfo>> {
        info.interfaces.iter().filter_map(|name| self.get(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_insert_wins() {
        let repository = ClassInfoRepository::new();
        let first = repository.get_or_insert_with("pkg.Target", || {
            let mut info = ClassInfo::named("pkg.Target");
            info.annotations.push("pkg.First".to_string());
            info
        });
        let second = repository.get_or_insert_with("pkg.Target", || {
            let mut info = ClassInfo::named("pkg.Target");
            info.annotations.push("pkg.Second".to_string());
            info
        });
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.has_annotation("pkg.First"));
    }

    #[test]
    fn test_remove_invalidates() {
        let repository = ClassInfoRepository::new();
        repository.insert(ClassInfo::named("pkg.Target"));
        assert!(repository.get("pkg.Target").is_some());
        assert!(repository.remove("pkg.Target"));
        assert!(repository.get("pkg.Target").is_none());
        assert!(!repository.remove("pkg.Target"));
    }

    #[test]
    fn test_lazy_super_resolution() {
        let repository = ClassInfoRepository::new();
        let mut child = ClassInfo::named("pkg.Child");
        child.super_name = Some("pkg.Parent".to_string());
        let child = repository.insert(child);
        assert!(repository.superclass_of(&child).is_none());
        repository.insert(ClassInfo::named("pkg.Parent"));
        assert_eq!(repository.superclass_of(&child).unwrap().name, "pkg.Parent");
    }
}
