//! Join-point classification filters
//!
//! Structural skips applied before any expression is consulted: synthetic
//! and bridge members, framework-generated members, static initializers and
//! classes outside the include scope never become join-point candidates.

use crate::classfile::defs::{CONSTRUCTOR_METHOD_NAME, STATIC_INITIALIZER_METHOD_NAME};
use crate::classfile::flag::access_flags::*;
use crate::consts::{CONSTRUCTOR_BODY_PREFIX, ORIGINAL_METHOD_PREFIX, SYNTHETIC_MEMBER_PREFIX};

/// Members the framework generated itself, in this or an earlier pass.
pub fn is_framework_member(name: &str) -> bool {
    name.starts_with(SYNTHETIC_MEMBER_PREFIX)
}

/// Companions holding an original body moved aside by execution weaving.
/// They keep hosting call/field join points.
pub fn is_moved_body(name: &str) -> bool {
    name.starts_with(ORIGINAL_METHOD_PREFIX) || name.starts_with(CONSTRUCTOR_BODY_PREFIX)
}

/// The member name a moved body logically belongs to.
pub fn logical_member_name(name: &str) -> &str {
    if name.starts_with(CONSTRUCTOR_BODY_PREFIX) {
        CONSTRUCTOR_METHOD_NAME
    } else {
        name.strip_prefix(ORIGINAL_METHOD_PREFIX).unwrap_or(name)
    }
}

pub fn is_synthetic(access_flags: u16) -> bool {
    access_flags & (ACC_SYNTHETIC | ACC_BRIDGE) != 0
}

/// May this method host call/field join points (it has a scannable body)?
pub fn has_scannable_body(access_flags: u16, name: &str) -> bool {
    access_flags & (ACC_ABSTRACT | ACC_NATIVE) == 0
        && (!is_framework_member(name) || is_moved_body(name))
}

/// Is this method an execution join-point candidate?
pub fn is_execution_candidate(access_flags: u16, name: &str) -> bool {
    access_flags & (ACC_ABSTRACT | ACC_NATIVE) == 0
        && !is_framework_member(name)
        && !is_synthetic(access_flags)
        && name != CONSTRUCTOR_METHOD_NAME
        && name != STATIC_INITIALIZER_METHOD_NAME
}

/// Is this callee member eligible as a call/field join-point target?
pub fn is_advisable_target(name: &str) -> bool {
    !is_framework_member(name) && name != STATIC_INITIALIZER_METHOD_NAME
}

/// Classes of the runtime dispatch layer are never join-point targets; a
/// woven body calls into them by construction.
pub fn is_runtime_class(dotted_name: &str) -> bool {
    dotted_name.starts_with("org.jweave.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_members_are_skipped() {
        assert!(is_framework_member("jweave$call$Target_foo$00000001"));
        assert!(is_framework_member("jweave$original$foo"));
        assert!(!is_framework_member("foo"));
    }

    #[test]
    fn test_moved_bodies_stay_scannable() {
        assert!(has_scannable_body(ACC_PUBLIC | ACC_SYNTHETIC, "jweave$original$foo"));
        assert!(has_scannable_body(ACC_PRIVATE | ACC_SYNTHETIC, "jweave$init$body$0000002a"));
        assert!(!has_scannable_body(ACC_PUBLIC, "jweave$call$Target_foo$00000001"));
        assert_eq!(logical_member_name("jweave$original$foo"), "foo");
        assert_eq!(logical_member_name("jweave$init$body$0000002a"), "<init>");
        assert_eq!(logical_member_name("foo"), "foo");
    }

    #[test]
    fn test_execution_candidates() {
        assert!(is_execution_candidate(ACC_PUBLIC, "foo"));
        assert!(!is_execution_candidate(ACC_PUBLIC | ACC_ABSTRACT, "foo"));
        assert!(!is_execution_candidate(ACC_PUBLIC | ACC_NATIVE, "foo"));
        assert!(!is_execution_candidate(ACC_PUBLIC | ACC_BRIDGE, "foo"));
        assert!(!is_execution_candidate(ACC_PUBLIC | ACC_SYNTHETIC, "foo"));
        assert!(!is_execution_candidate(ACC_PUBLIC | ACC_SYNTHETIC, "jweave$original$foo"));
        assert!(!is_execution_candidate(ACC_PUBLIC, "<init>"));
        assert!(!is_execution_candidate(ACC_STATIC, "<clinit>"));
    }
}
