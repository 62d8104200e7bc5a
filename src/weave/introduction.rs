//! Mixin and interface introduction
//!
//! Implementation introduction adds public delegation methods that obtain
//! the runtime-managed mixin instance and forward to it through the
//! introduced interface; interface introduction then adds the interface
//! itself to the class's implements table. The implementation stage runs
//! first so the augmented type is complete once the interface appears.

use crate::classfile::descriptor::{parse_method_descriptor, slot_size};
use crate::classfile::flag::access_flags::*;
use crate::classfile::opcodes::*;
use crate::classfile::attribute::CodeAttribute;
use crate::classfile::ClassFile;
use crate::common::error::Result;
use crate::consts::{
    MIXIN_FACTORY_METHOD_DESCRIPTOR, MIXIN_FACTORY_METHOD_NAME, RUNTIME_MANAGER_CLASS,
};
use crate::definition::IntroductionBinding;

use super::dispatch::{
    add_synthetic_method, emit_load, emit_load_cached_class, return_opcode, CodeBuilder,
};
use super::{TransformContext, Transformer, WeaveSystem};

/// Delegation body: `JoinPointManager.mixinFor(name, Class)` cast to the
/// interface, arguments forwarded, result returned as-is.
fn build_delegation_code(
    class_file: &mut ClassFile,
    binding_name: &str,
    interface_internal: &str,
    method_name: &str,
    descriptor: &str,
    this_name: &str,
) -> Result<CodeAttribute> {
    let (parameters, return_type) = parse_method_descriptor(descriptor)?;
    let mut builder = CodeBuilder::new();
    {
        let pool = &mut class_file.constant_pool;
        let name_string = pool.add_string(binding_name);
        builder.op_u16(LDC_W, name_string);
    }
    emit_load_cached_class(&mut builder, class_file, this_name)?;
    let pool = &mut class_file.constant_pool;
    let factory = pool.add_method_ref(
        RUNTIME_MANAGER_CLASS,
        MIXIN_FACTORY_METHOD_NAME,
        MIXIN_FACTORY_METHOD_DESCRIPTOR,
    );
    builder.op_u16(INVOKESTATIC, factory);
    let interface_index = pool.add_class(interface_internal);
    builder.op_u16(CHECKCAST, interface_index);

    let mut slot = 1u16;
    for parameter in &parameters {
        emit_load(&mut builder, parameter, slot);
        slot += slot_size(parameter);
    }
    let target = pool.add_interface_method_ref(interface_internal, method_name, descriptor);
    builder.op(INVOKEINTERFACE);
    let index_bytes = target.to_be_bytes();
    builder.op(index_bytes[0]);
    builder.op(index_bytes[1]);
    builder.op(slot as u8); // receiver + argument slots
    builder.op(0);
    builder.op(return_opcode(&return_type));

    let max_stack = (slot + 2).max(slot_size(&return_type) + 2);
    Ok(CodeAttribute::new(max_stack, slot.max(1), builder.into_bytes()))
}

fn matched_bindings<'a>(
    context: &TransformContext,
    system: &'a WeaveSystem,
) -> Result<Vec<(std::sync::Arc<crate::definition::SystemDefinition>, usize)>> {
    let class_info = context.class_info()?;
    system.definitions.introductions_for(class_info, system.namespaces)
}

pub struct AddImplementationTransformer;

impl Transformer for AddImplementationTransformer {
    fn name(&self) -> &'static str {
        "add-implementation"
    }

    fn transform(&self, context: &mut TransformContext, system: &WeaveSystem) -> Result<()> {
        let matched = matched_bindings(context, system)?;
        if matched.is_empty() {
            return Ok(());
        }
        let this_name = context.class_info()?.name.clone();
        let (class_file, state) = context.split_mut()?;

        for (definition, binding_index) in matched {
            let binding: &IntroductionBinding =
                &definition.introduction_bindings()[binding_index];
            let interface_internal = binding.interface.replace('.', "/");
            for method in &binding.methods {
                if class_file.find_method(&method.name, &method.descriptor).is_some() {
                    continue;
                }
                let code = match build_delegation_code(
                    class_file,
                    &binding.name,
                    &interface_internal,
                    &method.name,
                    &method.descriptor,
                    &this_name,
                ) {
                    Ok(code) => code,
                    Err(e) => {
                        log::warn!(
                            "{this_name}: cannot introduce {}.{}: {e}",
                            binding.interface,
                            method.name
                        );
                        continue;
                    }
                };
                add_synthetic_method(
                    class_file,
                    &method.name,
                    &method.descriptor,
                    ACC_PUBLIC,
                    &code,
                );
                state.mark_advised();
                log::debug!(
                    "{this_name}: introduced {}.{}{}",
                    binding.interface,
                    method.name,
                    method.descriptor
                );
            }
        }
        Ok(())
    }
}

pub struct AddInterfaceTransformer;

impl Transformer for AddInterfaceTransformer {
    fn name(&self) -> &'static str {
        "add-interface"
    }

    fn transform(&self, context: &mut TransformContext, system: &WeaveSystem) -> Result<()> {
        let matched = matched_bindings(context, system)?;
        if matched.is_empty() {
            return Ok(());
        }
        let this_name = context.class_info()?.name.clone();
        let (class_file, state) = context.split_mut()?;

        for (definition, binding_index) in matched {
            let binding = &definition.introduction_bindings()[binding_index];
            let interface_internal = binding.interface.replace('.', "/");
            if class_file.has_interface(&interface_internal) {
                continue;
            }
            let interface_index = class_file.constant_pool.add_class(&interface_internal);
            class_file.interfaces.push(interface_index);
            state.mark_advised();
            log::debug!("{this_name}: now implements {}", binding.interface);
        }
        Ok(())
    }
}
