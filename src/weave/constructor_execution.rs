//! Constructor-execution advising
//!
//! `<init>` cannot be renamed, so the body is split after the mandatory
//! `super`/`this` call: the remainder moves into a synthetic per-descriptor
//! body method, and the `<init>` tail becomes either the placeholder
//! passthrough or the advised dispatch, under the same marker-attribute
//! state machine as method execution. Constructors whose control flow or
//! exception table crosses the split point are logged and left unwoven.

use crate::classfile::attribute::{CodeAttribute, ExceptionTableEntry};
use crate::classfile::code::{branch_targets, read_u16, Instruction, InstructionIter};
use crate::classfile::defs::CONSTRUCTOR_METHOD_NAME;
use crate::classfile::descriptor::{parse_method_descriptor, slot_size};
use crate::classfile::flag::access_flags::*;
use crate::classfile::opcodes::*;
use crate::classfile::{ClassFile, ConstantPool};
use crate::common::error::{Error, Result};
use crate::consts::{
    CONSTRUCTOR_BODY_PREFIX, WRAPPER_STATE_ADVISED, WRAPPER_STATE_PLACEHOLDER,
};
use crate::expr::{ExpressionContext, PointcutKind, ReflectiveInfo};

use super::dispatch::{
    add_synthetic_method, build_dispatch_code, emit_load, join_point_hash, CodeBuilder, DispatchSpec,
};
use super::method_execution::{set_wrapper_state, wrapper_state};
use super::site::enclosing_member_info;
use super::{TransformContext, Transformer, WeaveState, WeaveSystem};

fn body_method_name(descriptor: &str) -> String {
    let unique = join_point_hash(CONSTRUCTOR_METHOD_NAME, descriptor) as u32;
    format!("{CONSTRUCTOR_BODY_PREFIX}{unique:08x}")
}

/// Find the pc just past the mandatory `super`/`this` call: the first
/// `invokespecial <init>` not paired with a preceding `new`.
fn find_split_point(code: &[u8], pool: &ConstantPool) -> Result<Option<usize>> {
    let mut pending_new = 0usize;
    for instruction in InstructionIter::new(code) {
        let Instruction { pc, opcode, length } = instruction?;
        match opcode {
            NEW => pending_new += 1,
            INVOKESPECIAL => {
                let index = read_u16(code, pc + 1);
                let Ok((_, name, _)) = pool.member_ref(index) else {
                    continue;
                };
                if name != CONSTRUCTOR_METHOD_NAME {
                    continue;
                }
                if pending_new > 0 {
                    pending_new -= 1;
                } else {
                    return Ok(Some(pc + length));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Check that no branch and no exception-table entry crosses the split
/// point, and partition the entries into (prefix, shifted tail).
fn partition_at_split(
    code: &CodeAttribute,
    split: usize,
) -> Result<(Vec<ExceptionTableEntry>, Vec<ExceptionTableEntry>)> {
    for (source, target) in branch_targets(&code.code)? {
        if (source < split) != (target < split) {
            return Err(Error::class_format(format!(
                "branch from pc {source} to {target} crosses the initializer split at {split}"
            )));
        }
    }
    let mut prefix_entries = Vec::new();
    let mut tail_entries = Vec::new();
    for entry in &code.exception_table {
        let (start, end, handler) =
            (entry.start_pc as usize, entry.end_pc as usize, entry.handler_pc as usize);
        if end <= split && handler < split {
            prefix_entries.push(entry.clone());
        } else if start >= split && handler >= split {
            tail_entries.push(ExceptionTableEntry::new(
                (start - split) as u16,
                (end - split) as u16,
                (handler - split) as u16,
                entry.catch_type,
            ));
        } else {
            return Err(Error::class_format(format!(
                "exception handler range {start}..{end} crosses the initializer split at {split}"
            )));
        }
    }
    Ok((prefix_entries, tail_entries))
}

/// Split the constructor into companion + placeholder, if not already done.
fn ensure_split(class_file: &mut ClassFile, index: usize) -> Result<Option<bool>> {
    let descriptor = {
        let method = &class_file.methods[index];
        class_file.method_descriptor(method)?.to_string()
    };
    let companion = body_method_name(&descriptor);
    if class_file.find_method(&companion, &descriptor).is_some() {
        return Ok(Some(false));
    }
    let Some(code) = class_file.methods[index].code(&class_file.constant_pool)? else {
        return Ok(None);
    };
    let Some(split) = find_split_point(&code.code, &class_file.constant_pool)? else {
        log::warn!("constructor {descriptor} has no super call, skipping execution weaving");
        return Ok(None);
    };
    let (prefix_entries, tail_entries) = partition_at_split(&code, split)?;

    let mut companion_code =
        CodeAttribute::new(code.max_stack, code.max_locals, code.code[split..].to_vec());
    companion_code.exception_table = tail_entries;
    add_synthetic_method(
        class_file,
        &companion,
        &descriptor,
        ACC_PRIVATE | ACC_SYNTHETIC,
        &companion_code,
    );

    let (parameters, _) = parse_method_descriptor(&descriptor)?;
    let wrapper_code = build_init_placeholder(
        class_file,
        code.code[..split].to_vec(),
        prefix_entries,
        code.max_stack,
        code.max_locals,
        &companion,
        &descriptor,
        &parameters,
    )?;
    class_file.methods[index].set_code(&mut class_file.constant_pool, &wrapper_code);
    set_wrapper_state(class_file, index, WRAPPER_STATE_PLACEHOLDER);
    Ok(Some(true))
}

/// Placeholder `<init>` body: super-call prefix, then a direct call into the
/// companion.
#[allow(clippy::too_many_arguments)]
fn build_init_placeholder(
    class_file: &mut ClassFile,
    prefix: Vec<u8>,
    prefix_entries: Vec<ExceptionTableEntry>,
    max_stack: u16,
    max_locals: u16,
    companion: &str,
    descriptor: &str,
    parameters: &[String],
) -> Result<CodeAttribute> {
    let this_internal = class_file.internal_name()?.to_string();
    let mut builder = CodeBuilder::new();
    builder.op_u8(ALOAD, 0);
    let mut slot = 1u16;
    for parameter in parameters {
        emit_load(&mut builder, parameter, slot);
        slot += slot_size(parameter);
    }
    let target =
        class_file.constant_pool.add_method_ref(&this_internal, companion, descriptor);
    builder.op_u16(INVOKESPECIAL, target);
    builder.op(RETURN);

    let mut code = prefix;
    code.extend_from_slice(&builder.into_bytes());
    let mut attribute = CodeAttribute::new(max_stack.max(slot), max_locals, code);
    attribute.exception_table = prefix_entries;
    Ok(attribute)
}

/// Rebuild the current `<init>` body from its prefix plus a fresh tail.
fn rebuild_init(
    class_file: &mut ClassFile,
    state: &mut WeaveState,
    index: usize,
    this_name: &str,
    advised: bool,
) -> Result<()> {
    let descriptor = {
        let method = &class_file.methods[index];
        class_file.method_descriptor(method)?.to_string()
    };
    let Some(code) = class_file.methods[index].code(&class_file.constant_pool)? else {
        return Err(Error::class_format("woven constructor lost its Code attribute"));
    };
    let Some(split) = find_split_point(&code.code, &class_file.constant_pool)? else {
        return Err(Error::class_format("woven constructor lost its super call"));
    };
    let prefix = code.code[..split].to_vec();
    let prefix_entries: Vec<ExceptionTableEntry> = code
        .exception_table
        .iter()
        .filter(|e| (e.end_pc as usize) <= split && (e.handler_pc as usize) < split)
        .cloned()
        .collect();
    let (parameters, _) = parse_method_descriptor(&descriptor)?;

    let attribute = if advised {
        let spec = DispatchSpec {
            join_point_id: state.next_join_point_index(),
            site_hash: join_point_hash(CONSTRUCTOR_METHOD_NAME, &descriptor),
            receiver: Some(this_name),
            parameters: &parameters,
            return_type: "void",
            declaring_class: this_name,
        };
        let dispatch = build_dispatch_code(class_file, &spec)?;
        let mut bytes = prefix;
        bytes.extend_from_slice(&dispatch.code);
        let mut attribute =
            CodeAttribute::new(code.max_stack.max(10), code.max_locals, bytes);
        attribute.exception_table = prefix_entries;
        attribute
    } else {
        let companion = body_method_name(&descriptor);
        build_init_placeholder(
            class_file,
            prefix,
            prefix_entries,
            code.max_stack,
            code.max_locals,
            &companion,
            &descriptor,
            &parameters,
        )?
    };
    class_file.methods[index].set_code(&mut class_file.constant_pool, &attribute);
    set_wrapper_state(
        class_file,
        index,
        if advised { WRAPPER_STATE_ADVISED } else { WRAPPER_STATE_PLACEHOLDER },
    );
    state.mark_advised();
    Ok(())
}

pub struct ConstructorExecutionTransformer;

impl Transformer for ConstructorExecutionTransformer {
    fn name(&self) -> &'static str {
        "constructor-execution"
    }

    fn transform(&self, context: &mut TransformContext, system: &WeaveSystem) -> Result<()> {
        let class_info = context.class_info()?.clone();
        let class_advised = system
            .definitions
            .advises_class(&class_info, PointcutKind::Execution, system.namespaces)?;
        let this_name = class_info.name.clone();
        let (class_file, state) = context.split_mut()?;

        for index in 0..class_file.methods.len() {
            let (method_name, method_descriptor_text, access_flags) = {
                let method = &class_file.methods[index];
                (
                    class_file.method_name(method)?.to_string(),
                    class_file.method_descriptor(method)?.to_string(),
                    method.access_flags,
                )
            };
            if method_name != CONSTRUCTOR_METHOD_NAME
                || access_flags & (ACC_ABSTRACT | ACC_NATIVE | ACC_SYNTHETIC) != 0
            {
                continue;
            }
            let current_state = wrapper_state(class_file, index);
            if !class_advised && current_state.is_none() {
                continue;
            }

            let within = ReflectiveInfo::Class(class_info.clone());
            let ReflectiveInfo::Constructor(constructor_info) = enclosing_member_info(
                &class_info,
                CONSTRUCTOR_METHOD_NAME,
                &method_descriptor_text,
            )?
            else {
                continue;
            };
            let match_context =
                ExpressionContext::constructor_execution(constructor_info, Some(within));
            let matched = match system.definitions.matches_any(&match_context, system.namespaces) {
                Ok(matched) => matched,
                Err(e) => {
                    log::warn!("{this_name}.<init>: execution match failure: {e}");
                    continue;
                }
            };

            match (current_state, matched) {
                (None, true) => {
                    let split = match ensure_split(class_file, index) {
                        Ok(Some(_)) => true,
                        Ok(None) => false,
                        Err(e) => {
                            log::warn!("{this_name}.<init>: cannot split constructor: {e}");
                            false
                        }
                    };
                    if !split {
                        continue;
                    }
                    state.mark_advised();
                    if let Err(e) = rebuild_init(class_file, state, index, &this_name, true) {
                        log::warn!("{this_name}.<init>: constructor weaving failed: {e}");
                        continue;
                    }
                    log::debug!("{this_name}.<init>{method_descriptor_text}: advised execution");
                }
                (Some(current), true) if current == WRAPPER_STATE_PLACEHOLDER => {
                    if let Err(e) = rebuild_init(class_file, state, index, &this_name, true) {
                        log::warn!("{this_name}.<init>: constructor weaving failed: {e}");
                        continue;
                    }
                }
                (Some(current), false) if current == WRAPPER_STATE_ADVISED => {
                    if let Err(e) = rebuild_init(class_file, state, index, &this_name, false) {
                        log::warn!("{this_name}.<init>: constructor unweaving failed: {e}");
                        continue;
                    }
                    log::debug!("{this_name}.<init>{method_descriptor_text}: restored placeholder");
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_point_after_super_call() {
        let mut pool = ConstantPool::new();
        let super_init = pool.add_method_ref("java/lang/Object", "<init>", "()V");
        let inner = pool.add_class("pkg/Inner");
        let inner_init = pool.add_method_ref("pkg/Inner", "<init>", "()V");

        // this(); body allocates new Inner()
        let mut code = vec![ALOAD_0, INVOKESPECIAL];
        code.extend_from_slice(&super_init.to_be_bytes());
        code.push(NEW);
        code.extend_from_slice(&inner.to_be_bytes());
        code.push(DUP);
        code.push(INVOKESPECIAL);
        code.extend_from_slice(&inner_init.to_be_bytes());
        code.push(POP);
        code.push(RETURN);
        assert_eq!(find_split_point(&code, &pool).unwrap(), Some(4));
    }

    #[test]
    fn test_nested_allocation_in_super_arguments() {
        let mut pool = ConstantPool::new();
        let helper = pool.add_class("pkg/Helper");
        let helper_init = pool.add_method_ref("pkg/Helper", "<init>", "()V");
        let super_init = pool.add_method_ref("pkg/Super", "<init>", "(Lpkg/Helper;)V");

        // super(new Helper())
        let mut code = vec![ALOAD_0, NEW];
        code.extend_from_slice(&helper.to_be_bytes());
        code.push(DUP);
        code.push(INVOKESPECIAL);
        code.extend_from_slice(&helper_init.to_be_bytes());
        code.push(INVOKESPECIAL);
        code.extend_from_slice(&super_init.to_be_bytes());
        code.push(RETURN);
        // the Helper <init> pairs with its NEW; only the super call splits
        assert_eq!(find_split_point(&code, &pool).unwrap(), Some(11));
    }

    #[test]
    fn test_crossing_branch_rejects_split() {
        let mut code = CodeAttribute::new(1, 1, vec![GOTO, 0, 4, NOP, RETURN]);
        assert!(partition_at_split(&code, 3).is_err());
        code.code = vec![NOP, NOP, NOP, GOTO, 0, 1, RETURN];
        assert!(partition_at_split(&code, 3).is_ok());
    }

    #[test]
    fn test_exception_entries_partition() {
        let mut code = CodeAttribute::new(1, 1, vec![NOP; 10]);
        code.exception_table.push(ExceptionTableEntry::new(4, 6, 8, 1));
        let (prefix, tail) = partition_at_split(&code, 4).unwrap();
        assert!(prefix.is_empty());
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].start_pc, 0);
        assert_eq!(tail[0].handler_pc, 4);

        code.exception_table[0] = ExceptionTableEntry::new(2, 6, 8, 1);
        assert!(partition_at_split(&code, 4).is_err());
    }
}
