//! Method-call advising
//!
//! Matched `invokevirtual`/`invokestatic`/`invokeinterface` sites are
//! redirected in place to a synthetic static dispatch wrapper in the calling
//! class. The replacement never changes instruction widths
//! (`invokeinterface` leaves two `nop`s behind), so jump offsets and
//! exception tables in the surrounding code stay valid.

use crate::classfile::defs::CONSTRUCTOR_METHOD_NAME;
use crate::classfile::descriptor::{method_descriptor, parse_method_descriptor};
use crate::classfile::flag::access_flags::*;
use crate::classfile::opcodes::*;
use crate::common::error::Result;
use crate::consts::{CALL_WRAPPER_PREFIX, WRAPPER_MARKER_ATTRIBUTE};
use crate::expr::{ExpressionContext, PointcutKind};

use super::dispatch::{
    add_synthetic_method, build_dispatch_code, join_point_hash, wrapper_method_name, DispatchSpec,
};
use super::filter;
use super::site::{callee_method_info, collect_member_sites, enclosing_member_info};
use super::{TransformContext, Transformer, WeaveSystem};

pub struct MethodCallTransformer;

impl Transformer for MethodCallTransformer {
    fn name(&self) -> &'static str {
        "method-call"
    }

    fn transform(&self, context: &mut TransformContext, system: &WeaveSystem) -> Result<()> {
        let class_info = context.class_info()?.clone();
        if !system
            .definitions
            .advises_class(&class_info, PointcutKind::Call, system.namespaces)?
        {
            return Ok(());
        }
        let this_name = class_info.name.clone();
        let this_internal = this_name.replace('.', "/");
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
            // wrapper bodies (placeholder or advised) are framework code
            if class_file.methods[index]
                .find_attribute(&class_file.constant_pool, WRAPPER_MARKER_ATTRIBUTE)
                .is_some()
            {
                continue;
            }
            let Some(mut code) = class_file.methods[index].code(&class_file.constant_pool)? else {
                continue;
            };
            let sites = collect_member_sites(
                &code.code,
                &class_file.constant_pool,
                &[INVOKEVIRTUAL, INVOKESTATIC, INVOKEINTERFACE],
            )?;
            if sites.is_empty() {
                continue;
            }
            let within = enclosing_member_info(
                &class_info,
                filter::logical_member_name(&method_name),
                &method_descriptor_text,
            )?;

            let mut changed = false;
            for site in sites {
                if site.name == CONSTRUCTOR_METHOD_NAME
                    || !filter::is_advisable_target(&site.name)
                    || site.owner.starts_with('[')
                    || filter::is_runtime_class(&site.owner)
                    || !system.definitions.in_include_scope(&site.owner)
                {
                    continue;
                }
                let callee = match callee_method_info(
                    system.repository,
                    &site.owner,
                    &site.name,
                    &site.descriptor,
                    site.opcode == INVOKESTATIC,
                ) {
                    Ok(callee) => callee,
                    Err(e) => {
                        log::warn!(
                            "{this_name}.{method_name}: skipping call site at pc {}: {e}",
                            site.pc
                        );
                        continue;
                    }
                };
                let match_context = ExpressionContext::call(callee, Some(within.clone()));
                match system.definitions.matches_any(&match_context, system.namespaces) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        log::warn!(
                            "{this_name}.{method_name}: match failure at call site pc {}: {e}",
                            site.pc
                        );
                        continue;
                    }
                }

                let (parameters, return_type) = match parse_method_descriptor(&site.descriptor) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        log::warn!(
                            "{this_name}.{method_name}: bad descriptor at call site pc {}: {e}",
                            site.pc
                        );
                        continue;
                    }
                };
                let receiver = match site.opcode {
                    INVOKESTATIC => None,
                    _ => Some(site.owner.as_str()),
                };
                let mut wrapper_parameters = Vec::new();
                if receiver.is_some() {
                    wrapper_parameters.push(site.owner.clone());
                }
                wrapper_parameters.extend(parameters.iter().cloned());
                let wrapper_descriptor = method_descriptor(&wrapper_parameters, &return_type);
                let wrapper_name = wrapper_method_name(
                    CALL_WRAPPER_PREFIX,
                    &site.owner,
                    &site.name,
                    &site.descriptor,
                );

                if class_file.find_method(&wrapper_name, &wrapper_descriptor).is_none() {
                    let spec = DispatchSpec {
                        join_point_id: state.next_join_point_index(),
                        site_hash: join_point_hash(&site.name, &site.descriptor),
                        receiver,
                        parameters: &parameters,
                        return_type: &return_type,
                        declaring_class: &site.owner,
                    };
                    let body = match build_dispatch_code(class_file, &spec) {
                        Ok(body) => body,
                        Err(e) => {
                            log::warn!(
                                "{this_name}.{method_name}: wrapper generation failed for call to \
                                 {}.{}: {e}",
                                site.owner,
                                site.name
                            );
                            continue;
                        }
                    };
                    add_synthetic_method(
                        class_file,
                        &wrapper_name,
                        &wrapper_descriptor,
                        ACC_PRIVATE | ACC_STATIC | ACC_SYNTHETIC,
                        &body,
                    );
                }

                let wrapper_ref = class_file.constant_pool.add_method_ref(
                    &this_internal,
                    &wrapper_name,
                    &wrapper_descriptor,
                );
                code.code[site.pc] = INVOKESTATIC;
                code.code[site.pc + 1..site.pc + 3].copy_from_slice(&wrapper_ref.to_be_bytes());
                if site.opcode == INVOKEINTERFACE {
                    code.code[site.pc + 3] = NOP;
                    code.code[site.pc + 4] = NOP;
                }
                changed = true;
                state.mark_advised();
                log::debug!(
                    "{this_name}.{method_name}: advised call to {}.{} at pc {}",
                    site.owner,
                    site.name,
                    site.pc
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
