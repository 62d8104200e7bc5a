//! Candidate-site descriptions and reflective synthesis
//!
//! Call and field transformers resolve constant-pool member references into
//! reflective records. When the target class has already passed through the
//! metadata cache its real record is used; otherwise a record is synthesized
//! from the reference itself (descriptor erasure is all a reference carries).

use std::sync::Arc;

use crate::classfile::code::{read_u16, Instruction, InstructionIter};
use crate::classfile::descriptor::{descriptor_to_type, parse_method_descriptor};
use crate::classfile::flag::access_flags::*;
use crate::classfile::ConstantPool;
use crate::common::error::Result;
use crate::reflect::info::normalize_class_name;
use crate::reflect::{ClassInfo, ClassInfoRepository, ConstructorInfo, FieldInfo, MethodInfo};

/// One member-reference instruction found in a method body.
#[derive(Debug)]
pub struct MemberRefSite {
    pub pc: usize,
    pub opcode: u8,
    /// Dotted owner class name.
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// Scan a code array for instructions in `wanted`, resolving their member
/// references. Sites whose pool entries cannot be resolved are logged and
/// skipped rather than failing the method.
pub fn collect_member_sites(
    code: &[u8],
    pool: &ConstantPool,
    wanted: &[u8],
) -> Result<Vec<MemberRefSite>> {
    let mut sites = Vec::new();
    for instruction in InstructionIter::new(code) {
        let Instruction { pc, opcode, length: _ } = instruction?;
        if !wanted.contains(&opcode) {
            continue;
        }
        let index = read_u16(code, pc + 1);
        match pool.member_ref(index) {
            Ok((owner, name, descriptor)) => sites.push(MemberRefSite {
                pc,
                opcode,
                owner: normalize_class_name(owner),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            }),
            Err(e) => {
                log::warn!("skipping unresolvable member reference at pc {pc}: {e}");
            }
        }
    }
    Ok(sites)
}

/// Reflective record for a class known at least by name.
pub fn class_info_for(repository: &ClassInfoRepository, dotted_name: &str) -> Arc<ClassInfo> {
    repository
        .get(dotted_name)
        .unwrap_or_else(|| Arc::new(ClassInfo::named(dotted_name)))
}

/// Reflective record for a call target. Prefers the cached record of the
/// owner class; falls back to a descriptor-derived one (assumed public).
pub fn callee_method_info(
    repository: &ClassInfoRepository,
    owner: &str,
    name: &str,
    descriptor: &str,
    is_static_call: bool,
) -> Result<Arc<MethodInfo>> {
    let (parameters, return_type) = parse_method_descriptor(descriptor)?;
    if let Some(class) = repository.get(owner) {
        if let Some(method) = class
            .methods
            .iter()
            .find(|m| m.name == name && m.parameters == parameters)
        {
            return Ok(method.clone());
        }
    }
    let mut modifiers = ACC_PUBLIC;
    if is_static_call {
        modifiers |= ACC_STATIC;
    }
    Ok(Arc::new(MethodInfo {
        name: name.to_string(),
        modifiers,
        parameters,
        return_type,
        exceptions: Vec::new(),
        declaring_class: owner.to_string(),
        annotations: Vec::new(),
    }))
}

/// Reflective record for a constructor-call target.
pub fn callee_constructor_info(
    repository: &ClassInfoRepository,
    owner: &str,
    descriptor: &str,
) -> Result<Arc<ConstructorInfo>> {
    let (parameters, _) = parse_method_descriptor(descriptor)?;
    if let Some(class) = repository.get(owner) {
        if let Some(constructor) = class.constructors.iter().find(|c| c.parameters == parameters) {
            return Ok(constructor.clone());
        }
    }
    Ok(Arc::new(ConstructorInfo {
        modifiers: ACC_PUBLIC,
        parameters,
        exceptions: Vec::new(),
        declaring_class: owner.to_string(),
        annotations: Vec::new(),
    }))
}

/// Reflective record for a field-access target.
pub fn accessed_field_info(
    repository: &ClassInfoRepository,
    owner: &str,
    name: &str,
    descriptor: &str,
    is_static_access: bool,
) -> Result<Arc<FieldInfo>> {
    if let Some(class) = repository.get(owner) {
        if let Some(field) = class.fields.iter().find(|f| f.name == name) {
            return Ok(field.clone());
        }
    }
    let mut modifiers = ACC_PUBLIC;
    if is_static_access {
        modifiers |= ACC_STATIC;
    }
    Ok(Arc::new(FieldInfo {
        name: name.to_string(),
        type_name: descriptor_to_type(descriptor)?,
        modifiers,
        declaring_class: owner.to_string(),
        annotations: Vec::new(),
    }))
}

/// Reflective record of the member enclosing a site, looked up in the class
/// under transformation.
pub fn enclosing_member_info(
    class_info: &ClassInfo,
    name: &str,
    descriptor: &str,
) -> Result<crate::expr::ReflectiveInfo> {
    use crate::expr::ReflectiveInfo;
    let (parameters, return_type) = parse_method_descriptor(descriptor)?;
    if name == crate::classfile::defs::CONSTRUCTOR_METHOD_NAME {
        if let Some(constructor) =
            class_info.constructors.iter().find(|c| c.parameters == parameters)
        {
            return Ok(ReflectiveInfo::Constructor(constructor.clone()));
        }
        return Ok(ReflectiveInfo::Constructor(Arc::new(ConstructorInfo {
            modifiers: ACC_PUBLIC,
            parameters,
            exceptions: Vec::new(),
            declaring_class: class_info.name.clone(),
            annotations: Vec::new(),
        })));
    }
    if let Some(method) = class_info
        .methods
        .iter()
        .find(|m| m.name == name && m.parameters == parameters)
    {
        return Ok(ReflectiveInfo::Method(method.clone()));
    }
    Ok(ReflectiveInfo::Method(Arc::new(MethodInfo {
        name: name.to_string(),
        modifiers: ACC_PUBLIC,
        parameters,
        return_type,
        exceptions: Vec::new(),
        declaring_class: class_info.name.clone(),
        annotations: Vec::new(),
    })))
}
