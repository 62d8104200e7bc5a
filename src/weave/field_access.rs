//! Field get/set advising
//!
//! `getfield`/`putfield`/`getstatic`/`putstatic` are all three bytes wide,
//! as is the `invokestatic` that replaces them, so sites are rewritten in
//! place against generated accessor wrappers.

use crate::classfile::descriptor::{descriptor_to_type, method_descriptor};
use crate::classfile::flag::access_flags::*;
use crate::classfile::opcodes::*;
use crate::common::error::Result;
use crate::consts::{GET_WRAPPER_PREFIX, SET_WRAPPER_PREFIX, WRAPPER_MARKER_ATTRIBUTE};
use crate::expr::{ExpressionContext, PointcutKind};

use super::dispatch::{
    add_synthetic_method, build_dispatch_code, join_point_hash, wrapper_method_name, DispatchSpec,
};
use super::filter;
use super::site::{accessed_field_info, collect_member_sites, enclosing_member_info};
use super::{TransformContext, Transformer, WeaveSystem};

pub struct FieldAccessTransformer;

impl Transformer for FieldAccessTransformer {
    fn name(&self) -> &'static str {
        "field-access"
    }

    fn transform(&self, context: &mut TransformContext, system: &WeaveSystem) -> Result<()> {
        let class_info = context.class_info()?.clone();
        let get_advised = system
            .definitions
            .advises_class(&class_info, PointcutKind::Get, system.namespaces)?;
        let set_advised = system
            .definitions
            .advises_class(&class_info, PointcutKind::Set, system.namespaces)?;
        if !get_advised && !set_advised {
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
                &[GETFIELD, PUTFIELD, GETSTATIC, PUTSTATIC],
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
                let is_set = matches!(site.opcode, PUTFIELD | PUTSTATIC);
                let is_static = matches!(site.opcode, GETSTATIC | PUTSTATIC);
                if (is_set && !set_advised) || (!is_set && !get_advised) {
                    continue;
                }
                if !filter::is_advisable_target(&site.name)
                    || filter::is_runtime_class(&site.owner)
                    || !system.definitions.in_include_scope(&site.owner)
                {
                    continue;
                }
                let field = match accessed_field_info(
                    system.repository,
                    &site.owner,
                    &site.name,
                    &site.descriptor,
                    is_static,
                ) {
                    Ok(field) => field,
                    Err(e) => {
                        log::warn!(
                            "{this_name}.{method_name}: skipping field site at pc {}: {e}",
                            site.pc
                        );
                        continue;
                    }
                };
                if field.is_synthetic() {
                    continue;
                }
                let match_context = if is_set {
                    ExpressionContext::set(field, Some(within.clone()))
                } else {
                    ExpressionContext::get(field, Some(within.clone()))
                };
                match system.definitions.matches_any(&match_context, system.namespaces) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        log::warn!(
                            "{this_name}.{method_name}: match failure at field site pc {}: {e}",
                            site.pc
                        );
                        continue;
                    }
                }

                let field_type = match descriptor_to_type(&site.descriptor) {
                    Ok(field_type) => field_type,
                    Err(e) => {
                        log::warn!(
                            "{this_name}.{method_name}: bad field descriptor at pc {}: {e}",
                            site.pc
                        );
                        continue;
                    }
                };
                let receiver = if is_static { None } else { Some(site.owner.as_str()) };
                // get wrappers return the field value with no extra
                // arguments; set wrappers take the new value and return void
                let value_parameters: Vec<String> =
                    if is_set { vec![field_type.clone()] } else { Vec::new() };
                let return_type = if is_set { "void".to_string() } else { field_type.clone() };
                let mut wrapper_parameters = Vec::new();
                if receiver.is_some() {
                    wrapper_parameters.push(site.owner.clone());
                }
                wrapper_parameters.extend(value_parameters.iter().cloned());
                let wrapper_descriptor = method_descriptor(&wrapper_parameters, &return_type);
                let prefix = if is_set { SET_WRAPPER_PREFIX } else { GET_WRAPPER_PREFIX };
                let wrapper_name =
                    wrapper_method_name(prefix, &site.owner, &site.name, &site.descriptor);

                if class_file.find_method(&wrapper_name, &wrapper_descriptor).is_none() {
                    let spec = DispatchSpec {
                        join_point_id: state.next_join_point_index(),
                        site_hash: join_point_hash(&site.name, &site.descriptor),
                        receiver,
                        parameters: &value_parameters,
                        return_type: &return_type,
                        declaring_class: &site.owner,
                    };
                    let body = match build_dispatch_code(class_file, &spec) {
                        Ok(body) => body,
                        Err(e) => {
                            log::warn!(
                                "{this_name}.{method_name}: wrapper generation failed for field \
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
                changed = true;
                state.mark_advised();
                log::debug!(
                    "{this_name}.{method_name}: advised {} of {}.{} at pc {}",
                    if is_set { "set" } else { "get" },
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
