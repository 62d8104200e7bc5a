//! Utilities to build and parse method/field descriptors
//!
//! Type names on the reflective side are canonical dotted Java names with
//! `[]` suffixes for arrays (`int`, `java.lang.String`, `byte[][]`);
//! descriptors are the JVM's erased binary form.

use crate::common::error::{Error, Result};

pub const PRIMITIVE_NAMES: &[&str] =
    &["boolean", "byte", "char", "short", "int", "long", "float", "double", "void"];

pub fn is_primitive(name: &str) -> bool {
    PRIMITIVE_NAMES.contains(&name)
}

/// Convert a dotted type name (with optional `[]` suffixes) to a descriptor.
pub fn type_to_descriptor(name: &str) -> String {
    let mut base = name;
    let mut descriptor = String::new();
    while let Some(stripped) = base.strip_suffix("[]") {
        descriptor.push('[');
        base = stripped;
    }
    let element = match base {
        "int" => "I",
        "long" => "J",
        "float" => "F",
        "double" => "D",
        "boolean" => "Z",
        "char" => "C",
        "byte" => "B",
        "short" => "S",
        "void" => "V",
        _ => {
            descriptor.push('L');
            descriptor.push_str(&base.replace('.', "/"));
            descriptor.push(';');
            return descriptor;
        }
    };
    descriptor.push_str(element);
    descriptor
}

/// Parse one type descriptor into a dotted name with `[]` suffixes.
pub fn descriptor_to_type(descriptor: &str) -> Result<String> {
    let mut chars = descriptor.chars().peekable();
    let name = read_type(&mut chars, descriptor)?;
    if chars.next().is_some() {
        return Err(Error::class_format(format!("trailing characters in descriptor '{descriptor}'")));
    }
    Ok(name)
}

fn read_type(chars: &mut std::iter::Peekable<std::str::Chars>, whole: &str) -> Result<String> {
    let mut dims = 0usize;
    while chars.peek() == Some(&'[') {
        chars.next();
        dims += 1;
    }
    let first = chars
        .next()
        .ok_or_else(|| Error::class_format(format!("truncated descriptor '{whole}'")))?;
    let mut name = match first {
        'Z' => "boolean".to_string(),
        'B' => "byte".to_string(),
        'C' => "char".to_string(),
        'S' => "short".to_string(),
        'I' => "int".to_string(),
        'J' => "long".to_string(),
        'F' => "float".to_string(),
        'D' => "double".to_string(),
        'V' => "void".to_string(),
        'L' => {
            let mut object = String::new();
            loop {
                match chars.next() {
                    Some(';') => break,
                    Some(c) => object.push(c),
                    None => {
                        return Err(Error::class_format(format!(
                            "unterminated object type in descriptor '{whole}'"
                        )))
                    }
                }
            }
            object.replace('/', ".")
        }
        other => {
            return Err(Error::class_format(format!(
                "unknown type descriptor character '{other}' in '{whole}'"
            )))
        }
    };
    for _ in 0..dims {
        name.push_str("[]");
    }
    Ok(name)
}

/// Parse a method descriptor into (parameter type names, return type name).
pub fn parse_method_descriptor(descriptor: &str) -> Result<(Vec<String>, String)> {
    let rest = descriptor
        .strip_prefix('(')
        .ok_or_else(|| Error::class_format(format!("method descriptor '{descriptor}' lacks '('")))?;
    let close = rest
        .find(')')
        .ok_or_else(|| Error::class_format(format!("method descriptor '{descriptor}' lacks ')'")))?;
    let (params_str, return_str) = (&rest[..close], &rest[close + 1..]);

    let mut parameters = Vec::new();
    let mut chars = params_str.chars().peekable();
    while chars.peek().is_some() {
        parameters.push(read_type(&mut chars, descriptor)?);
    }
    let return_type = descriptor_to_type(return_str)?;
    Ok((parameters, return_type))
}

/// Build a method descriptor from dotted type names.
pub fn method_descriptor(parameters: &[String], return_type: &str) -> String {
    let mut descriptor = String::from("(");
    for parameter in parameters {
        descriptor.push_str(&type_to_descriptor(parameter));
    }
    descriptor.push(')');
    descriptor.push_str(&type_to_descriptor(return_type));
    descriptor
}

/// Operand slots a value of this type occupies (`long`/`double` take two).
pub fn slot_size(name: &str) -> u16 {
    match name {
        "long" | "double" => 2,
        "void" => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trip() {
        for name in ["int", "void", "java.lang.String", "byte[][]", "pkg.Target[]"] {
            assert_eq!(descriptor_to_type(&type_to_descriptor(name)).unwrap(), name);
        }
        assert_eq!(type_to_descriptor("java.lang.String"), "Ljava/lang/String;");
        assert_eq!(type_to_descriptor("int[]"), "[I");
    }

    #[test]
    fn test_method_descriptor_round_trip() {
        let parameters = vec!["java.lang.String".to_string(), "int[]".to_string(), "long".to_string()];
        let descriptor = method_descriptor(&parameters, "boolean");
        assert_eq!(descriptor, "(Ljava/lang/String;[IJ)Z");
        let (parsed, ret) = parse_method_descriptor(&descriptor).unwrap();
        assert_eq!(parsed, parameters);
        assert_eq!(ret, "boolean");
    }

    #[test]
    fn test_malformed_descriptors_rejected() {
        assert!(descriptor_to_type("Ljava/lang/String").is_err());
        assert!(descriptor_to_type("Q").is_err());
        assert!(parse_method_descriptor("()").is_err());
        assert!(parse_method_descriptor("I)V").is_err());
    }
}
