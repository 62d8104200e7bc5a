//! Classfile-backed metadata extraction
//!
//! Pure data mapping from the classfile model into the reflective records.
//! Alternative back-ends (e.g. reflection over live classes) can produce the
//! same records without touching this module.

use std::sync::Arc;

use crate::classfile::defs::{CONSTRUCTOR_METHOD_NAME, STATIC_INITIALIZER_METHOD_NAME};
use crate::classfile::descriptor::{descriptor_to_type, parse_method_descriptor};
use crate::classfile::{AttributeInfo, ClassFile, ConstantPool};
use crate::common::error::{Error, Result};

use super::info::{normalize_class_name, ClassInfo, ConstructorInfo, FieldInfo, MethodInfo};

/// Extract the reflective record for a parsed class.
pub fn class_info_from_class_file(class_file: &ClassFile) -> Result<ClassInfo> {
    let pool = &class_file.constant_pool;
    let name = normalize_class_name(class_file.internal_name()?);
    let super_name = class_file.super_internal_name()?.map(normalize_class_name);
    let mut interfaces = Vec::with_capacity(class_file.interfaces.len());
    for &interface in &class_file.interfaces {
        interfaces.push(normalize_class_name(pool.class_name(interface)?));
    }

    let mut fields = Vec::new();
    for field in &class_file.fields {
        let field_name = pool.utf8(field.name_index)?.to_string();
        let type_name = descriptor_to_type(pool.utf8(field.descriptor_index)?)?;
        fields.push(Arc::new(FieldInfo {
            name: field_name,
            type_name,
            modifiers: field.access_flags,
            declaring_class: name.clone(),
            annotations: annotation_names(pool, &field.attributes)?,
        }));
    }

    let mut methods = Vec::new();
    let mut constructors = Vec::new();
    for method in &class_file.methods {
        let method_name = pool.utf8(method.name_index)?;
        if method_name == STATIC_INITIALIZER_METHOD_NAME {
            continue;
        }
        let descriptor = pool.utf8(method.descriptor_index)?;
        let (parameters, return_type) = parse_method_descriptor(descriptor)?;
        let exceptions = declared_exceptions(pool, &method.attributes)?;
        let annotations = annotation_names(pool, &method.attributes)?;
        if method_name == CONSTRUCTOR_METHOD_NAME {
            constructors.push(Arc::new(ConstructorInfo {
                modifiers: method.access_flags,
                parameters,
                exceptions,
                declaring_class: name.clone(),
                annotations,
            }));
        } else {
            methods.push(Arc::new(MethodInfo {
                name: method_name.to_string(),
                modifiers: method.access_flags,
                parameters,
                return_type,
                exceptions,
                declaring_class: name.clone(),
                annotations,
            }));
        }
    }

    Ok(ClassInfo {
        name,
        modifiers: class_file.access_flags,
        super_name,
        interfaces,
        fields,
        methods,
        constructors,
        annotations: annotation_names(pool, &class_file.attributes)?,
    })
}

fn declared_exceptions(pool: &ConstantPool, attributes: &[AttributeInfo]) -> Result<Vec<String>> {
    let Some(attribute) = find_attribute(pool, attributes, "Exceptions") else {
        return Ok(Vec::new());
    };
    let info = &attribute.info;
    if info.len() < 2 {
        return Err(Error::class_format("truncated Exceptions attribute"));
    }
    let count = u16::from_be_bytes([info[0], info[1]]) as usize;
    if info.len() != 2 + count * 2 {
        return Err(Error::class_format("malformed Exceptions attribute"));
    }
    let mut exceptions = Vec::with_capacity(count);
    for entry in 0..count {
        let index = u16::from_be_bytes([info[2 + entry * 2], info[3 + entry * 2]]);
        exceptions.push(normalize_class_name(pool.class_name(index)?));
    }
    Ok(exceptions)
}

/// Collect marker annotation type names from the runtime annotation
/// attributes. Only the type names matter for matching; element values are
/// skipped structurally.
fn annotation_names(pool: &ConstantPool, attributes: &[AttributeInfo]) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for attribute_name in ["RuntimeVisibleAnnotations", "RuntimeInvisibleAnnotations"] {
        if let Some(attribute) = find_attribute(pool, attributes, attribute_name) {
            collect_annotation_names(pool, &attribute.info, &mut names)?;
        }
    }
    Ok(names)
}

fn find_attribute<'a>(
    pool: &ConstantPool,
    attributes: &'a [AttributeInfo],
    name: &str,
) -> Option<&'a AttributeInfo> {
    attributes
        .iter()
        .find(|a| pool.utf8(a.name_index).map(|n| n == name).unwrap_or(false))
}

fn collect_annotation_names(
    pool: &ConstantPool,
    info: &[u8],
    names: &mut Vec<String>,
) -> Result<()> {
    let mut offset = 0usize;
    let count = read_u16(info, &mut offset)? as usize;
    for _ in 0..count {
        skip_annotation(pool, info, &mut offset, Some(&mut *names))?;
    }
    Ok(())
}

fn skip_annotation(
    pool: &ConstantPool,
    info: &[u8],
    offset: &mut usize,
    names: Option<&mut Vec<String>>,
) -> Result<()> {
    let type_index = read_u16(info, offset)?;
    if let Some(names) = names {
        let descriptor = pool.utf8(type_index)?;
        names.push(descriptor_to_type(descriptor)?);
    }
    let pair_count = read_u16(info, offset)? as usize;
    for _ in 0..pair_count {
        read_u16(info, offset)?; // element name
        skip_element_value(pool, info, offset)?;
    }
    Ok(())
}

fn skip_element_value(pool: &ConstantPool, info: &[u8], offset: &mut usize) -> Result<()> {
    let tag = *info
        .get(*offset)
        .ok_or_else(|| Error::class_format("truncated annotation element value"))?;
    *offset += 1;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => {
            read_u16(info, offset)?;
        }
        b'e' => {
            read_u16(info, offset)?;
            read_u16(info, offset)?;
        }
        b'@' => skip_annotation(pool, info, offset, None)?,
        b'[' => {
            let count = read_u16(info, offset)? as usize;
            for _ in 0..count {
                skip_element_value(pool, info, offset)?;
            }
        }
        other => {
            return Err(Error::class_format(format!(
                "unknown annotation element tag '{}'",
                other as char
            )))
        }
    }
    Ok(())
}

fn read_u16(info: &[u8], offset: &mut usize) -> Result<u16> {
    if *offset + 2 > info.len() {
        return Err(Error::class_format("truncated annotation attribute"));
    }
    let value = u16::from_be_bytes([info[*offset], info[*offset + 1]]);
    *offset += 2;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::flag::access_flags::*;
    use crate::classfile::method::MethodInfo as RawMethod;

    fn sample_class() -> ClassFile {
        let mut class_file = ClassFile::new();
        class_file.access_flags = ACC_PUBLIC | ACC_SUPER;
        class_file.this_class = class_file.constant_pool.add_class("pkg/Target");
        class_file.super_class = class_file.constant_pool.add_class("java/lang/Object");

        let name_index = class_file.constant_pool.add_utf8("foo");
        let descriptor_index = class_file.constant_pool.add_utf8("(Ljava/lang/String;I)V");
        class_file
            .methods
            .push(RawMethod::new(ACC_PUBLIC, name_index, descriptor_index));

        let init_index = class_file.constant_pool.add_utf8("<init>");
        let void_index = class_file.constant_pool.add_utf8("()V");
        class_file.methods.push(RawMethod::new(ACC_PUBLIC, init_index, void_index));

        let clinit_index = class_file.constant_pool.add_utf8("<clinit>");
        class_file.methods.push(RawMethod::new(ACC_STATIC, clinit_index, void_index));

        let field_name = class_file.constant_pool.add_utf8("count");
        let field_descriptor = class_file.constant_pool.add_utf8("I");
        class_file
            .fields
            .push(crate::classfile::FieldInfo::new(ACC_PRIVATE, field_name, field_descriptor));
        class_file
    }

    #[test]
    fn test_extraction_maps_members() {
        let info = class_info_from_class_file(&sample_class()).unwrap();
        assert_eq!(info.name, "pkg.Target");
        assert_eq!(info.super_name.as_deref(), Some("java.lang.Object"));
        assert_eq!(info.methods.len(), 1);
        assert_eq!(info.constructors.len(), 1);
        let method = &info.methods[0];
        assert_eq!(method.name, "foo");
        assert_eq!(method.parameters, vec!["java.lang.String".to_string(), "int".to_string()]);
        assert_eq!(method.return_type, "void");
        assert_eq!(method.declaring_class, "pkg.Target");
        let field = &info.fields[0];
        assert_eq!(field.name, "count");
        assert_eq!(field.type_name, "int");
    }

    #[test]
    fn test_annotation_names_extracted() {
        let mut class_file = sample_class();
        let attribute_name = class_file.constant_pool.add_utf8("RuntimeVisibleAnnotations");
        let type_index = class_file.constant_pool.add_utf8("Lpkg/Marker;");
        let mut payload = 1u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&type_index.to_be_bytes());
        payload.extend_from_slice(&0u16.to_be_bytes());
        class_file.attributes.push(AttributeInfo::new(attribute_name, payload));

        let info = class_info_from_class_file(&class_file).unwrap();
        assert!(info.has_annotation("pkg.Marker"));
    }
}
