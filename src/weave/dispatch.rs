//! Dispatch code emission
//!
//! Builds the bodies of generated wrapper methods as raw code vectors
//! against the constant pool: argument boxing into an `Object[]` carrier,
//! the stable site hash, the lazily-cached declaring-`Class` reference, the
//! call into the runtime join-point manager, and the marshalling of its
//! `Object` result back to the original static return type (checkcast for
//! references, unbox-or-default-value for primitives).

use crate::classfile::attribute::CodeAttribute;
use crate::classfile::descriptor::{method_descriptor, slot_size, type_to_descriptor};
use crate::classfile::field::FieldInfo;
use crate::classfile::flag::access_flags::*;
use crate::classfile::method::MethodInfo;
use crate::classfile::opcodes::*;
use crate::classfile::{ClassFile, ConstantPool};
use crate::common::error::Result;
use crate::consts::{
    CLASS_CACHE_FIELD_PREFIX, DISPATCH_METHOD_DESCRIPTOR, DISPATCH_METHOD_NAME,
    RUNTIME_MANAGER_CLASS,
};

/// Straight-line code assembly with forward-branch patching.
pub struct CodeBuilder {
    bytes: Vec<u8>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn pc(&self) -> usize {
        self.bytes.len()
    }

    pub fn op(&mut self, opcode: u8) {
        self.bytes.push(opcode);
    }

    pub fn op_u8(&mut self, opcode: u8, operand: u8) {
        self.bytes.push(opcode);
        self.bytes.push(operand);
    }

    pub fn op_u16(&mut self, opcode: u8, operand: u16) {
        self.bytes.push(opcode);
        self.bytes.extend_from_slice(&operand.to_be_bytes());
    }

    /// Smallest encoding of an int constant push.
    pub fn push_int(&mut self, pool: &mut ConstantPool, value: i32) {
        match value {
            -1..=5 => self.op((ICONST_0 as i32 + value) as u8),
            -128..=127 => self.op_u8(BIPUSH, value as i8 as u8),
            -32768..=32767 => self.op_u16(SIPUSH, value as i16 as u16),
            _ => {
                let index = pool.add_integer(value);
                self.op_u16(LDC_W, index);
            }
        }
    }

    /// Emit a forward branch with a placeholder offset; patch with `bind`.
    pub fn branch(&mut self, opcode: u8) -> usize {
        let pc = self.pc();
        self.op_u16(opcode, 0);
        pc
    }

    /// Patch a forward branch to target the current pc.
    pub fn bind(&mut self, branch_pc: usize) {
        let offset = (self.pc() - branch_pc) as i16;
        self.bytes[branch_pc + 1..branch_pc + 3].copy_from_slice(&offset.to_be_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for CodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn load_opcode(type_name: &str) -> u8 {
    match type_name {
        "int" | "boolean" | "byte" | "char" | "short" => ILOAD,
        "long" => LLOAD,
        "float" => FLOAD,
        "double" => DLOAD,
        _ => ALOAD,
    }
}

pub fn return_opcode(type_name: &str) -> u8 {
    match type_name {
        "void" => RETURN,
        "int" | "boolean" | "byte" | "char" | "short" => IRETURN,
        "long" => LRETURN,
        "float" => FRETURN,
        "double" => DRETURN,
        _ => ARETURN,
    }
}

pub fn emit_load(builder: &mut CodeBuilder, type_name: &str, slot: u16) {
    let opcode = load_opcode(type_name);
    if slot <= u8::MAX as u16 {
        builder.op_u8(opcode, slot as u8);
    } else {
        builder.op(WIDE);
        builder.op_u16(opcode, slot);
    }
}

struct BoxInfo {
    class: &'static str,
    value_of_descriptor: &'static str,
    unbox_name: &'static str,
    unbox_descriptor: &'static str,
    default_opcode: u8,
}

fn box_info(type_name: &str) -> Option<BoxInfo> {
    let info = match type_name {
        "boolean" => BoxInfo {
            class: "java/lang/Boolean",
            value_of_descriptor: "(Z)Ljava/lang/Boolean;",
            unbox_name: "booleanValue",
            unbox_descriptor: "()Z",
            default_opcode: ICONST_0,
        },
        "byte" => BoxInfo {
            class: "java/lang/Byte",
            value_of_descriptor: "(B)Ljava/lang/Byte;",
            unbox_name: "byteValue",
            unbox_descriptor: "()B",
            default_opcode: ICONST_0,
        },
        "char" => BoxInfo {
            class: "java/lang/Character",
            value_of_descriptor: "(C)Ljava/lang/Character;",
            unbox_name: "charValue",
            unbox_descriptor: "()C",
            default_opcode: ICONST_0,
        },
        "short" => BoxInfo {
            class: "java/lang/Short",
            value_of_descriptor: "(S)Ljava/lang/Short;",
            unbox_name: "shortValue",
            unbox_descriptor: "()S",
            default_opcode: ICONST_0,
        },
        "int" => BoxInfo {
            class: "java/lang/Integer",
            value_of_descriptor: "(I)Ljava/lang/Integer;",
            unbox_name: "intValue",
            unbox_descriptor: "()I",
            default_opcode: ICONST_0,
        },
        "long" => BoxInfo {
            class: "java/lang/Long",
            value_of_descriptor: "(J)Ljava/lang/Long;",
            unbox_name: "longValue",
            unbox_descriptor: "()J",
            default_opcode: LCONST_0,
        },
        "float" => BoxInfo {
            class: "java/lang/Float",
            value_of_descriptor: "(F)Ljava/lang/Float;",
            unbox_name: "floatValue",
            unbox_descriptor: "()F",
            default_opcode: FCONST_0,
        },
        "double" => BoxInfo {
            class: "java/lang/Double",
            value_of_descriptor: "(D)Ljava/lang/Double;",
            unbox_name: "doubleValue",
            unbox_descriptor: "()D",
            default_opcode: DCONST_0,
        },
        _ => return None,
    };
    Some(info)
}

/// Internal name usable as a `checkcast` operand: slash form for classes,
/// descriptor form for arrays.
fn checkcast_name(type_name: &str) -> String {
    if type_name.ends_with("[]") {
        type_to_descriptor(type_name)
    } else {
        type_name.replace('.', "/")
    }
}

/// Collapse a type or member name into a token usable inside a synthetic
/// member name.
pub fn sanitize_name_token(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect()
}

/// Stable per-site hash: member name plus erased signature, independent of
/// instruction position, so re-weaving after unrelated edits elsewhere in
/// the class keeps the identifier.
pub fn join_point_hash(name: &str, descriptor: &str) -> i32 {
    let mut hash: i32 = 17;
    for byte in name.bytes().chain(descriptor.bytes()) {
        hash = hash.wrapping_mul(31).wrapping_add(byte as i32);
    }
    hash
}

/// Deterministic wrapper method name for a rewritten site.
pub fn wrapper_method_name(prefix: &str, owner: &str, name: &str, descriptor: &str) -> String {
    let simple = owner.rsplit('.').next().unwrap_or(owner);
    let unique = join_point_hash(name, descriptor)
        .wrapping_add(join_point_hash(owner, "")) as u32;
    format!("{prefix}{}_{}${unique:08x}", sanitize_name_token(simple), sanitize_name_token(name))
}

/// Get (creating on first use) the synthetic static field caching the
/// `Class` reference of a declaring type.
pub fn ensure_class_cache_field(class_file: &mut ClassFile, target_dotted: &str) -> String {
    let field_name = format!("{CLASS_CACHE_FIELD_PREFIX}{}", sanitize_name_token(target_dotted));
    if !class_file.has_field(&field_name) {
        let name_index = class_file.constant_pool.add_utf8(&field_name);
        let descriptor_index = class_file.constant_pool.add_utf8("Ljava/lang/Class;");
        class_file.fields.push(FieldInfo::new(
            ACC_PRIVATE | ACC_STATIC | ACC_SYNTHETIC,
            name_index,
            descriptor_index,
        ));
    }
    field_name
}

/// Leave the declaring `Class` on the stack, materializing the cache field
/// on first use.
pub fn emit_load_cached_class(
    builder: &mut CodeBuilder,
    class_file: &mut ClassFile,
    target_dotted: &str,
) -> Result<()> {
    let this_internal = class_file.internal_name()?.to_string();
    let field_name = ensure_class_cache_field(class_file, target_dotted);
    let pool = &mut class_file.constant_pool;
    let field_ref = pool.add_field_ref(&this_internal, &field_name, "Ljava/lang/Class;");
    let for_name =
        pool.add_method_ref("java/lang/Class", "forName", "(Ljava/lang/String;)Ljava/lang/Class;");
    let name_string = pool.add_string(target_dotted);

    builder.op_u16(GETSTATIC, field_ref);
    builder.op(DUP);
    let initialized = builder.branch(IFNONNULL);
    builder.op(POP);
    builder.op_u16(LDC_W, name_string);
    builder.op_u16(INVOKESTATIC, for_name);
    builder.op(DUP);
    builder.op_u16(PUTSTATIC, field_ref);
    builder.bind(initialized);
    Ok(())
}

/// Box the local-variable parameters into a fresh `Object[]`.
pub fn emit_args_array(
    builder: &mut CodeBuilder,
    pool: &mut ConstantPool,
    parameters: &[String],
    mut slot: u16,
) {
    builder.push_int(pool, parameters.len() as i32);
    let object = pool.add_class("java/lang/Object");
    builder.op_u16(ANEWARRAY, object);
    for (index, parameter) in parameters.iter().enumerate() {
        builder.op(DUP);
        builder.push_int(pool, index as i32);
        emit_load(builder, parameter, slot);
        if let Some(info) = box_info(parameter) {
            let value_of = pool.add_method_ref(info.class, "valueOf", info.value_of_descriptor);
            builder.op_u16(INVOKESTATIC, value_of);
        }
        builder.op(AASTORE);
        slot += slot_size(parameter);
    }
}

/// Marshal the dispatch result (an `Object` on the stack) back to the site's
/// static return type and return it. A null result for a primitive return
/// degrades to the type's zero value instead of throwing.
pub fn emit_unbox_return(builder: &mut CodeBuilder, pool: &mut ConstantPool, return_type: &str) {
    if return_type == "void" {
        builder.op(POP);
        builder.op(RETURN);
        return;
    }
    match box_info(return_type) {
        None => {
            let cast = pool.add_class(&checkcast_name(return_type));
            builder.op_u16(CHECKCAST, cast);
            builder.op(ARETURN);
        }
        Some(info) => {
            builder.op(DUP);
            let non_null = builder.branch(IFNONNULL);
            builder.op(POP);
            builder.op(info.default_opcode);
            builder.op(return_opcode(return_type));
            builder.bind(non_null);
            let cast = pool.add_class(info.class);
            builder.op_u16(CHECKCAST, cast);
            let unbox = pool.add_method_ref(info.class, info.unbox_name, info.unbox_descriptor);
            builder.op_u16(INVOKEVIRTUAL, unbox);
            builder.op(return_opcode(return_type));
        }
    }
}

/// What a generated dispatch body forwards to the runtime manager.
pub struct DispatchSpec<'a> {
    pub join_point_id: u32,
    pub site_hash: i32,
    /// Dotted receiver type held in local 0, absent for static targets.
    pub receiver: Option<&'a str>,
    pub parameters: &'a [String],
    pub return_type: &'a str,
    /// Dotted declaring type, cached as a synthetic `Class` field.
    pub declaring_class: &'a str,
}

/// Build a complete dispatch body:
/// `dispatch(id, hash, target, args, declaringClass)` plus result
/// marshalling.
pub fn build_dispatch_code(class_file: &mut ClassFile, spec: &DispatchSpec) -> Result<CodeAttribute> {
    let mut builder = CodeBuilder::new();
    let base_slot = if spec.receiver.is_some() { 1 } else { 0 };
    {
        let pool = &mut class_file.constant_pool;
        builder.push_int(pool, spec.join_point_id as i32);
        builder.push_int(pool, spec.site_hash);
        if spec.receiver.is_some() {
            builder.op_u8(ALOAD, 0);
        } else {
            builder.op(ACONST_NULL);
        }
        emit_args_array(&mut builder, pool, spec.parameters, base_slot);
    }
    emit_load_cached_class(&mut builder, class_file, spec.declaring_class)?;
    let pool = &mut class_file.constant_pool;
    let dispatch =
        pool.add_method_ref(RUNTIME_MANAGER_CLASS, DISPATCH_METHOD_NAME, DISPATCH_METHOD_DESCRIPTOR);
    builder.op_u16(INVOKESTATIC, dispatch);
    emit_unbox_return(&mut builder, pool, spec.return_type);

    let max_locals =
        base_slot + spec.parameters.iter().map(|p| slot_size(p)).sum::<u16>();
    Ok(CodeAttribute::new(10, max_locals.max(1), builder.into_bytes()))
}

/// Build a direct passthrough body invoking `method_name` on this class with
/// the same arguments: the empty-placeholder shape of execution wrappers.
pub fn build_passthrough_code(
    class_file: &mut ClassFile,
    method_name: &str,
    parameters: &[String],
    return_type: &str,
    is_static: bool,
) -> Result<CodeAttribute> {
    let this_internal = class_file.internal_name()?.to_string();
    let descriptor = method_descriptor(parameters, return_type);
    let mut builder = CodeBuilder::new();
    let mut slot = 0u16;
    if !is_static {
        builder.op_u8(ALOAD, 0);
        slot = 1;
    }
    for parameter in parameters {
        emit_load(&mut builder, parameter, slot);
        slot += slot_size(parameter);
    }
    let pool = &mut class_file.constant_pool;
    let target = pool.add_method_ref(&this_internal, method_name, &descriptor);
    builder.op_u16(if is_static { INVOKESTATIC } else { INVOKEVIRTUAL }, target);
    builder.op(return_opcode(return_type));

    let max_stack = slot.max(slot_size(return_type)).max(1);
    Ok(CodeAttribute::new(max_stack, slot.max(1), builder.into_bytes()))
}

/// Append a synthetic method with the given body.
pub fn add_synthetic_method(
    class_file: &mut ClassFile,
    name: &str,
    descriptor: &str,
    access_flags: u16,
    code: &CodeAttribute,
) {
    let name_index = class_file.constant_pool.add_utf8(name);
    let descriptor_index = class_file.constant_pool.add_utf8(descriptor);
    let mut method = MethodInfo::new(access_flags, name_index, descriptor_index);
    method.set_code(&mut class_file.constant_pool, code);
    class_file.methods.push(method);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_int_encodings() {
        let mut pool = ConstantPool::new();
        let mut builder = CodeBuilder::new();
        builder.push_int(&mut pool, 3);
        builder.push_int(&mut pool, -1);
        builder.push_int(&mut pool, 100);
        builder.push_int(&mut pool, 1000);
        builder.push_int(&mut pool, 100_000);
        let bytes = builder.into_bytes();
        assert_eq!(bytes[0], ICONST_0 + 3);
        assert_eq!(bytes[1], ICONST_M1);
        assert_eq!(bytes[2], BIPUSH);
        assert_eq!(bytes[4], SIPUSH);
        assert_eq!(bytes[7], LDC_W);
    }

    #[test]
    fn test_branch_patching() {
        let mut builder = CodeBuilder::new();
        builder.op(DUP);
        let branch = builder.branch(IFNONNULL);
        builder.op(POP);
        builder.op(ICONST_0);
        builder.bind(branch);
        builder.op(IRETURN);
        let bytes = builder.into_bytes();
        // offset from the ifnonnull pc (1) to the bind point (6)
        assert_eq!(&bytes[2..4], &5i16.to_be_bytes());
    }

    #[test]
    fn test_site_hash_depends_on_signature_only() {
        let a = join_point_hash("foo", "(I)V");
        assert_eq!(a, join_point_hash("foo", "(I)V"));
        assert_ne!(a, join_point_hash("foo", "(J)V"));
        assert_ne!(a, join_point_hash("bar", "(I)V"));
    }

    fn class_with_name(name: &str) -> ClassFile {
        let mut class_file = ClassFile::new();
        class_file.this_class = class_file.constant_pool.add_class(name);
        class_file
    }

    #[test]
    fn test_cache_field_created_once() {
        let mut class_file = class_with_name("pkg/Target");
        let first = ensure_class_cache_field(&mut class_file, "pkg.Other");
        let second = ensure_class_cache_field(&mut class_file, "pkg.Other");
        assert_eq!(first, second);
        assert_eq!(class_file.fields.len(), 1);
        ensure_class_cache_field(&mut class_file, "pkg.Different");
        assert_eq!(class_file.fields.len(), 2);
    }

    #[test]
    fn test_dispatch_code_shapes() {
        let mut class_file = class_with_name("pkg/Target");
        let parameters = vec!["java.lang.String".to_string(), "long".to_string()];
        let spec = DispatchSpec {
            join_point_id: 4,
            site_hash: join_point_hash("foo", "(Ljava/lang/String;J)I"),
            receiver: Some("pkg.Target"),
            parameters: &parameters,
            return_type: "int",
            declaring_class: "pkg.Target",
        };
        let code = build_dispatch_code(&mut class_file, &spec).unwrap();
        // receiver + String + two long slots
        assert_eq!(code.max_locals, 4);
        assert_eq!(*code.code.last().unwrap(), IRETURN);
        // the null-default fallback path is present
        assert!(code.code.windows(2).any(|w| w == [POP, ICONST_0]));

        let void_spec = DispatchSpec {
            join_point_id: 5,
            site_hash: 0,
            receiver: None,
            parameters: &[],
            return_type: "void",
            declaring_class: "pkg.Target",
        };
        let code = build_dispatch_code(&mut class_file, &void_spec).unwrap();
        assert_eq!(*code.code.last().unwrap(), RETURN);
        assert!(code.code.contains(&ACONST_NULL));
    }

    #[test]
    fn test_passthrough_code_shape() {
        let mut class_file = class_with_name("pkg/Target");
        let parameters = vec!["int".to_string()];
        let code =
            build_passthrough_code(&mut class_file, "jweave$original$foo", &parameters, "int", false)
                .unwrap();
        assert_eq!(code.code[0], ALOAD);
        assert_eq!(*code.code.last().unwrap(), IRETURN);
        assert_eq!(code.max_locals, 2);
    }
}
