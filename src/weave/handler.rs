//! Exception-handler advising
//!
//! For a matched catch block, a dispatch stub is appended at the end of the
//! code array and the exception-table entry's handler_pc is redirected to
//! it: the stub duplicates the caught exception, calls the runtime handler
//! dispatch, and jumps back to the original handler. Appending never shifts
//! existing offsets. Already-redirected entries are recognized by the shape
//! of their target block.

use crate::classfile::code::{read_u16, Instruction, InstructionIter};
use crate::classfile::opcodes::*;
use crate::classfile::ConstantPool;
use crate::common::error::Result;
use crate::consts::{
    HANDLER_DISPATCH_METHOD_DESCRIPTOR, HANDLER_DISPATCH_METHOD_NAME, RUNTIME_MANAGER_CLASS,
};
use crate::expr::{ExpressionContext, PointcutKind};
use crate::reflect::info::normalize_class_name;

use super::dispatch::{emit_load_cached_class, CodeBuilder};
use super::filter;
use super::site::{class_info_for, enclosing_member_info};
use super::{TransformContext, Transformer, WeaveSystem};

/// Does the code at `handler_pc` already start with one of our dispatch
/// stubs (dup, push, cached class, handler dispatch)?
fn is_woven_handler(code: &[u8], pool: &ConstantPool, handler_pc: usize) -> bool {
    if code.get(handler_pc) != Some(&DUP) {
        return false;
    }
    let mut iter = InstructionIter::new(&code[handler_pc..]);
    for _ in 0..12 {
        let Some(Ok(Instruction { pc, opcode, length: _ })) = iter.next() else {
            return false;
        };
        if opcode == INVOKESTATIC {
            let index = read_u16(&code[handler_pc..], pc + 1);
            if let Ok((owner, name, _)) = pool.member_ref(index) {
                if owner == RUNTIME_MANAGER_CLASS && name == HANDLER_DISPATCH_METHOD_NAME {
                    return true;
                }
            }
        }
    }
    false
}

pub struct HandlerTransformer;

impl Transformer for HandlerTransformer {
    fn name(&self) -> &'static str {
        "handler"
    }

    fn transform(&self, context: &mut TransformContext, system: &WeaveSystem) -> Result<()> {
        let class_info = context.class_info()?.clone();
        if !system
            .definitions
            .advises_class(&class_info, PointcutKind::Handler, system.namespaces)?
        {
            return Ok(());
        }
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
            if !filter::has_scannable_body(access_flags, &method_name) {
                continue;
            }
            let Some(mut code) = class_file.methods[index].code(&class_file.constant_pool)? else {
                continue;
            };
            if code.exception_table.is_empty() {
                continue;
            }
            let within = enclosing_member_info(
                &class_info,
                filter::logical_member_name(&method_name),
                &method_descriptor_text,
            )?;

            let mut changed = false;
            for entry_index in 0..code.exception_table.len() {
                let (handler_pc, catch_type) = {
                    let entry = &code.exception_table[entry_index];
                    (entry.handler_pc as usize, entry.catch_type)
                };
                // catch_type 0 is the catch-all range of finally blocks
                if catch_type == 0 {
                    continue;
                }
                let exception_name = match class_file.constant_pool.class_name(catch_type) {
                    Ok(name) => normalize_class_name(name),
                    Err(e) => {
                        log::warn!(
                            "{this_name}.{method_name}: unresolvable catch type in entry \
                             {entry_index}: {e}"
                        );
                        continue;
                    }
                };
                if is_woven_handler(&code.code, &class_file.constant_pool, handler_pc) {
                    continue;
                }
                let exception_info = class_info_for(system.repository, &exception_name);
                let match_context =
                    ExpressionContext::handler(exception_info, Some(within.clone()));
                match system.definitions.matches_any(&match_context, system.namespaces) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        log::warn!(
                            "{this_name}.{method_name}: match failure for handler of \
                             {exception_name}: {e}"
                        );
                        continue;
                    }
                }

                let stub_pc = code.code.len();
                if stub_pc > u16::MAX as usize - 64 {
                    log::warn!(
                        "{this_name}.{method_name}: code too large to advise handler of \
                         {exception_name}"
                    );
                    continue;
                }

                let mut builder = CodeBuilder::new();
                builder.op(DUP);
                builder.push_int(
                    &mut class_file.constant_pool,
                    state.next_join_point_index() as i32,
                );
                emit_load_cached_class(&mut builder, class_file, &this_name)?;
                let dispatch = class_file.constant_pool.add_method_ref(
                    RUNTIME_MANAGER_CLASS,
                    HANDLER_DISPATCH_METHOD_NAME,
                    HANDLER_DISPATCH_METHOD_DESCRIPTOR,
                );
                builder.op_u16(INVOKESTATIC, dispatch);
                // back into the original handler, exception still on stack
                let stub = builder.into_bytes();
                let goto_pc = stub_pc + stub.len();
                let offset = handler_pc as i64 - goto_pc as i64;
                code.code.extend_from_slice(&stub);
                code.code.push(GOTO_W);
                code.code.extend_from_slice(&(offset as i32).to_be_bytes());

                code.exception_table[entry_index].handler_pc = stub_pc as u16;
                code.max_stack = (code.max_stack + 3).max(6);
                changed = true;
                state.mark_advised();
                log::debug!(
                    "{this_name}.{method_name}: advised handler of {exception_name} at pc \
                     {handler_pc}"
                );
            }
            if changed {
                code.remove_attribute(&class_file.constant_pool, "StackMapTable");
                class_file.methods[index].set_code(&mut class_file.constant_pool, &code);
            }
        }
        Ok(())
    }
}
