//! Reflective metadata records
//!
//! All names are canonical dotted Java names regardless of the source
//! encoding; the internal `/`-separated form is normalized on construction.
//! Records are immutable once published through the repository; members
//! carry their declaring class as a non-owning name back-reference.

use std::sync::Arc;

use crate::classfile::defs::CONSTRUCTOR_METHOD_NAME;
use crate::classfile::flag::access_flags::*;

/// Normalize an internal (`/`-separated) class name to dotted form.
pub fn normalize_class_name(name: &str) -> String {
    name.replace('/', ".")
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub modifiers: u16,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<Arc<FieldInfo>>,
    pub methods: Vec<Arc<MethodInfo>>,
    pub constructors: Vec<Arc<ConstructorInfo>>,
    pub annotations: Vec<String>,
}

impl ClassInfo {
    /// A minimal record for a class only known by name (e.g. the declaring
    /// class of a call target that has not been loaded through this scope).
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: normalize_class_name(&name.into()),
            modifiers: ACC_PUBLIC,
            super_name: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn package_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(dot) => &self.name[..dot],
            None => "",
        }
    }

    pub fn is_interface(&self) -> bool {
        self.modifiers & ACC_INTERFACE != 0
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a == name)
    }
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub modifiers: u16,
    pub parameters: Vec<String>,
    pub return_type: String,
    pub exceptions: Vec<String>,
    pub declaring_class: String,
    pub annotations: Vec<String>,
}

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.modifiers & ACC_STATIC != 0
    }

    pub fn is_synthetic(&self) -> bool {
        self.modifiers & (ACC_SYNTHETIC | ACC_BRIDGE) != 0
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a == name)
    }
}

/// Constructors use the JVM sentinel name `<init>`; pointcut patterns refer
/// to them as `new`.
#[derive(Debug, Clone)]
pub struct ConstructorInfo {
    pub modifiers: u16,
    pub parameters: Vec<String>,
    pub exceptions: Vec<String>,
    pub declaring_class: String,
    pub annotations: Vec<String>,
}

impl ConstructorInfo {
    pub fn sentinel_name(&self) -> &'static str {
        CONSTRUCTOR_METHOD_NAME
    }

    pub fn is_synthetic(&self) -> bool {
        self.modifiers & (ACC_SYNTHETIC | ACC_BRIDGE) != 0
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a == name)
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub type_name: String,
    pub modifiers: u16,
    pub declaring_class: String,
    pub annotations: Vec<String>,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.modifiers & ACC_STATIC != 0
    }

    pub fn is_synthetic(&self) -> bool {
        self.modifiers & ACC_SYNTHETIC != 0
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_normalization() {
        assert_eq!(normalize_class_name("pkg/sub/Target"), "pkg.sub.Target");
        let info = ClassInfo::named("pkg/Target");
        assert_eq!(info.name, "pkg.Target");
        assert_eq!(info.package_name(), "pkg");
        assert_eq!(ClassInfo::named("Target").package_name(), "");
    }
}
