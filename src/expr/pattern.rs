//! Wildcard, type and parameter pattern matching
//!
//! Matching is case-sensitive and exact on non-wildcarded characters. Array
//! dimensionality is exact: `int[]` neither matches `int` nor `int[][]`.

use crate::classfile::descriptor::is_primitive;
use crate::reflect::{ConstructorInfo, FieldInfo, MethodInfo};

use super::ast::{FieldPattern, MethodPattern, ModifierPattern, ParamEntry, Segment, TypePattern};

/// `*`-glob match over one name segment.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_at(&pattern, &text)
}

fn glob_match_at(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            (0..=text.len()).any(|skip| glob_match_at(&pattern[1..], &text[skip..]))
        }
        Some(c) => text.first() == Some(c) && glob_match_at(&pattern[1..], &text[1..]),
    }
}

impl Segment {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Segment::Any => true,
            Segment::DeepAny => true,
            Segment::Glob(glob) => glob_match(glob, text),
        }
    }
}

/// Match a dotted-segment pattern against name parts; `..` absorbs zero or
/// more segments.
pub fn segments_match(patterns: &[Segment], parts: &[&str]) -> bool {
    match patterns.first() {
        None => parts.is_empty(),
        Some(Segment::DeepAny) => {
            (0..=parts.len()).any(|skip| segments_match(&patterns[1..], &parts[skip..]))
        }
        Some(segment) => match parts.first() {
            Some(part) => segment.matches(part) && segments_match(&patterns[1..], &parts[1..]),
            None => false,
        },
    }
}

impl TypePattern {
    /// Match against a canonical dotted type name with `[]` suffixes.
    pub fn matches_type(&self, type_name: &str) -> bool {
        let mut base = type_name;
        let mut dims = 0usize;
        while let Some(stripped) = base.strip_suffix("[]") {
            dims += 1;
            base = stripped;
        }
        if dims != self.dims {
            return false;
        }
        if self.segments.is_empty() {
            return true;
        }
        // A single non-deep segment is matched leniently: `*` covers any
        // type, and a dot-free pattern like `String` also covers the simple
        // name of a qualified non-primitive type.
        if self.segments.len() == 1 {
            match &self.segments[0] {
                Segment::Any | Segment::DeepAny => return true,
                Segment::Glob(glob) => {
                    if glob_match(glob, base) {
                        return true;
                    }
                    if !is_primitive(base) {
                        if let Some(dot) = base.rfind('.') {
                            return glob_match(glob, &base[dot + 1..]);
                        }
                    }
                    return false;
                }
            }
        }
        let parts: Vec<&str> = base.split('.').collect();
        segments_match(&self.segments, &parts)
    }

    /// Match against a class name (classes are never array types).
    pub fn matches_class(&self, class_name: &str) -> bool {
        self.dims == 0 && self.matches_type(class_name)
    }
}

/// Parameter list matching: one optional `..` entry absorbs the middle,
/// fixed entries must align positionally from the left and from the right.
pub fn parameters_match(entries: &[ParamEntry], actual: &[String]) -> bool {
    match entries.iter().position(|e| matches!(e, ParamEntry::Ellipsis)) {
        None => {
            entries.len() == actual.len()
                && entries.iter().zip(actual).all(|(entry, actual_type)| match entry {
                    ParamEntry::Type(pattern) => pattern.matches_type(actual_type),
                    ParamEntry::Ellipsis => unreachable!(),
                })
        }
        Some(position) => {
            let prefix = &entries[..position];
            let suffix = &entries[position + 1..];
            if actual.len() < prefix.len() + suffix.len() {
                return false;
            }
            let fits = |patterns: &[ParamEntry], types: &[String]| {
                patterns.iter().zip(types).all(|(entry, actual_type)| match entry {
                    ParamEntry::Type(pattern) => pattern.matches_type(actual_type),
                    ParamEntry::Ellipsis => false,
                })
            };
            fits(prefix, &actual[..prefix.len()]) && fits(suffix, &actual[actual.len() - suffix.len()..])
        }
    }
}

impl ModifierPattern {
    /// Every required modifier present, every negated modifier absent;
    /// unspecified modifiers are unconstrained.
    pub fn matches(&self, flags: u16) -> bool {
        flags & self.required == self.required && flags & self.forbidden == 0
    }
}

/// All listed markers present: set containment, nothing more.
pub fn annotations_match(required: &[String], actual: &[String]) -> bool {
    required.iter().all(|name| actual.iter().any(|a| a == name))
}

impl MethodPattern {
    pub fn matches_method(&self, method: &MethodInfo) -> bool {
        self.modifiers.matches(method.modifiers)
            && annotations_match(&self.annotations, &method.annotations)
            && self.name.matches(&method.name)
            && self
                .return_type
                .as_ref()
                .map(|pattern| pattern.matches_type(&method.return_type))
                .unwrap_or(false)
            && self.declaring_type.matches_class(&method.declaring_class)
            && parameters_match(&self.parameters, &method.parameters)
    }

    /// Constructors match under the pattern name `new` and carry no return
    /// type clause.
    pub fn matches_constructor(&self, constructor: &ConstructorInfo) -> bool {
        self.return_type.is_none()
            && self.modifiers.matches(constructor.modifiers)
            && annotations_match(&self.annotations, &constructor.annotations)
            && self.name.matches("new")
            && self.declaring_type.matches_class(&constructor.declaring_class)
            && parameters_match(&self.parameters, &constructor.parameters)
    }
}

impl FieldPattern {
    pub fn matches_field(&self, field: &FieldInfo) -> bool {
        self.modifiers.matches(field.modifiers)
            && annotations_match(&self.annotations, &field.annotations)
            && self.name.matches(&field.name)
            && self.field_type.matches_type(&field.type_name)
            && self.declaring_type.matches_class(&field.declaring_class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::flag::access_flags::*;

    fn type_pattern(text: &str) -> TypePattern {
        let mut base = text;
        let mut dims = 0;
        while let Some(stripped) = base.strip_suffix("[]") {
            dims += 1;
            base = stripped;
        }
        // consecutive dots mark a deep-wildcard segment
        let mut segments = Vec::new();
        for part in base.split('.') {
            if part.is_empty() {
                if segments.last() != Some(&Segment::DeepAny) {
                    segments.push(Segment::DeepAny);
                }
            } else {
                segments.push(Segment::from_word(part));
            }
        }
        TypePattern { segments, dims }
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("get*", "getName"));
        assert!(glob_match("*Name*", "firstNameField"));
        assert!(glob_match("foo", "foo"));
        assert!(!glob_match("foo", "Foo"));
        assert!(!glob_match("get*", "setName"));
        assert!(glob_match("*", ""));
    }

    #[test]
    fn test_deep_segments() {
        let pattern = type_pattern("pkg..*");
        assert!(pattern.matches_class("pkg.Target"));
        assert!(pattern.matches_class("pkg.sub.deep.Target"));
        assert!(!pattern.matches_class("pkg"));
        assert!(!pattern.matches_class("otherpkg.Target"));
    }

    #[test]
    fn test_array_dims_are_exact() {
        let one = type_pattern("int[]");
        assert!(one.matches_type("int[]"));
        assert!(!one.matches_type("int"));
        assert!(!one.matches_type("int[][]"));
        let two = type_pattern("java.lang.String[][]");
        assert!(two.matches_type("java.lang.String[][]"));
        assert!(!two.matches_type("java.lang.String[]"));
    }

    #[test]
    fn test_simple_name_leniency() {
        let pattern = type_pattern("String");
        assert!(pattern.matches_type("java.lang.String"));
        assert!(pattern.matches_type("String"));
        let primitive = type_pattern("int");
        assert!(primitive.matches_type("int"));
        assert!(!primitive.matches_type("pkg.int"));
        // qualified patterns stay exact
        assert!(!type_pattern("lang.String").matches_type("java.lang.String"));
    }

    fn types(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_interior_ellipsis_alignment() {
        let entries = vec![
            ParamEntry::Type(type_pattern("String")),
            ParamEntry::Ellipsis,
            ParamEntry::Type(type_pattern("byte")),
        ];
        assert!(parameters_match(&entries, &types(&["java.lang.String", "byte"])));
        assert!(parameters_match(&entries, &types(&["java.lang.String", "int", "byte"])));
        assert!(parameters_match(
            &entries,
            &types(&["java.lang.String", "int", "long", "byte"])
        ));
        assert!(!parameters_match(&entries, &types(&[])));
        assert!(!parameters_match(&entries, &types(&["java.lang.String"])));
        assert!(!parameters_match(&entries, &types(&["byte", "java.lang.String"])));
        assert!(!parameters_match(&entries, &types(&["java.lang.String", "byte", "int"])));
    }

    #[test]
    fn test_ellipsis_alone_matches_any_arity() {
        let entries = vec![ParamEntry::Ellipsis];
        assert!(parameters_match(&entries, &types(&[])));
        assert!(parameters_match(&entries, &types(&["int", "long", "pkg.T"])));
    }

    #[test]
    fn test_exact_list_requires_exact_arity() {
        let entries = vec![ParamEntry::Type(type_pattern("int"))];
        assert!(parameters_match(&entries, &types(&["int"])));
        assert!(!parameters_match(&entries, &types(&[])));
        assert!(!parameters_match(&entries, &types(&["int", "int"])));
    }

    #[test]
    fn test_modifier_monotonicity() {
        let member = ACC_PUBLIC | ACC_STATIC;
        let unconstrained = ModifierPattern::default();
        assert!(unconstrained.matches(member));

        // adding a satisfied positive constraint keeps it matching
        let positive = ModifierPattern { required: ACC_PUBLIC, forbidden: 0 };
        assert!(positive.matches(member));
        let both = ModifierPattern { required: ACC_PUBLIC | ACC_STATIC, forbidden: 0 };
        assert!(both.matches(member));

        // constraining on an absent modifier breaks the match
        let absent = ModifierPattern { required: ACC_FINAL, forbidden: 0 };
        assert!(!absent.matches(member));

        // negation inverts
        let forbid_present = ModifierPattern { required: 0, forbidden: ACC_STATIC };
        assert!(!forbid_present.matches(member));
        let forbid_absent = ModifierPattern { required: 0, forbidden: ACC_FINAL };
        assert!(forbid_absent.matches(member));
    }

    #[test]
    fn test_annotation_containment() {
        let actual = vec!["pkg.Tx".to_string(), "pkg.Audit".to_string()];
        assert!(annotations_match(&[], &actual));
        assert!(annotations_match(&["pkg.Tx".to_string()], &actual));
        assert!(annotations_match(&["pkg.Tx".to_string(), "pkg.Audit".to_string()], &actual));
        // requiring two markers fails when the member has only one of them
        assert!(!annotations_match(
            &["pkg.Tx".to_string(), "pkg.Missing".to_string()],
            &actual
        ));
    }
}
