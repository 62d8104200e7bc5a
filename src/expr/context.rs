//! Per-query match contexts

use std::fmt;
use std::sync::Arc;

use crate::reflect::{ClassInfo, ConstructorInfo, FieldInfo, MethodInfo};

/// The join-point kind a context was built for. `Any` relaxes leaf kind
/// checks and exists for derived-filter evaluation and diagnostics tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointcutKind {
    Call,
    Execution,
    Get,
    Set,
    Handler,
    Within,
    WithinCode,
    Any,
}

impl fmt::Display for PointcutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PointcutKind::Call => "CALL",
            PointcutKind::Execution => "EXECUTION",
            PointcutKind::Get => "GET",
            PointcutKind::Set => "SET",
            PointcutKind::Handler => "HANDLER",
            PointcutKind::Within => "WITHIN",
            PointcutKind::WithinCode => "WITHINCODE",
            PointcutKind::Any => "ANY",
        };
        write!(f, "{text}")
    }
}

/// The reflective info a predicate is tested against.
#[derive(Debug, Clone)]
pub enum ReflectiveInfo {
    Method(Arc<MethodInfo>),
    Constructor(Arc<ConstructorInfo>),
    Field(Arc<FieldInfo>),
    Class(Arc<ClassInfo>),
}

impl ReflectiveInfo {
    /// Name of the class this info belongs to: the declaring class for
    /// members, the class itself otherwise.
    pub fn enclosing_class_name(&self) -> &str {
        match self {
            ReflectiveInfo::Method(m) => &m.declaring_class,
            ReflectiveInfo::Constructor(c) => &c.declaring_class,
            ReflectiveInfo::Field(f) => &f.declaring_class,
            ReflectiveInfo::Class(c) => &c.name,
        }
    }
}

/// The per-query tuple: kind, primary info, enclosing info. Created fresh
/// per match query and never persisted.
#[derive(Debug, Clone)]
pub struct ExpressionContext {
    pub kind: PointcutKind,
    pub info: ReflectiveInfo,
    pub within: Option<ReflectiveInfo>,
}

impl ExpressionContext {
    pub fn new(kind: PointcutKind, info: ReflectiveInfo, within: Option<ReflectiveInfo>) -> Self {
        Self { kind, info, within }
    }

    pub fn call(callee: Arc<MethodInfo>, within: Option<ReflectiveInfo>) -> Self {
        Self::new(PointcutKind::Call, ReflectiveInfo::Method(callee), within)
    }

    pub fn constructor_call(callee: Arc<ConstructorInfo>, within: Option<ReflectiveInfo>) -> Self {
        Self::new(PointcutKind::Call, ReflectiveInfo::Constructor(callee), within)
    }

    pub fn execution(method: Arc<MethodInfo>, within: Option<ReflectiveInfo>) -> Self {
        Self::new(PointcutKind::Execution, ReflectiveInfo::Method(method), within)
    }

    pub fn constructor_execution(
        constructor: Arc<ConstructorInfo>,
        within: Option<ReflectiveInfo>,
    ) -> Self {
        Self::new(PointcutKind::Execution, ReflectiveInfo::Constructor(constructor), within)
    }

    pub fn get(field: Arc<FieldInfo>, within: Option<ReflectiveInfo>) -> Self {
        Self::new(PointcutKind::Get, ReflectiveInfo::Field(field), within)
    }

    pub fn set(field: Arc<FieldInfo>, within: Option<ReflectiveInfo>) -> Self {
        Self::new(PointcutKind::Set, ReflectiveInfo::Field(field), within)
    }

    pub fn handler(exception_type: Arc<ClassInfo>, within: Option<ReflectiveInfo>) -> Self {
        Self::new(PointcutKind::Handler, ReflectiveInfo::Class(exception_type), within)
    }

    pub fn within_class(class: Arc<ClassInfo>) -> Self {
        let info = ReflectiveInfo::Class(class);
        Self::new(PointcutKind::Within, info.clone(), Some(info))
    }
}
