//! Method-execution advising
//!
//! Wrapper-method weaving: the original body moves to a synthetic prefixed
//! companion, and the method under its original name becomes a wrapper in
//! one of two states, tracked by a marker attribute:
//!
//! - *placeholder*: a direct passthrough to the companion, created
//!   preemptively so the method table stays stable across dynamic re-weaves
//! - *advised*: the dispatch body
//!
//! Weaving toggles between the states by swapping bodies, never by adding
//! members, so applying the same definition set twice is a no-op and
//! removing a pointcut symmetrically restores the placeholder shape.

use crate::classfile::attribute::make_wrapper_marker_attribute;
use crate::classfile::descriptor::parse_method_descriptor;
use crate::classfile::flag::access_flags::*;
use crate::classfile::method::MethodInfo as RawMethod;
use crate::classfile::ClassFile;
use crate::common::error::Result;
use crate::consts::{
    ORIGINAL_METHOD_PREFIX, WRAPPER_MARKER_ATTRIBUTE, WRAPPER_STATE_ADVISED,
    WRAPPER_STATE_PLACEHOLDER,
};
use crate::expr::{ExpressionContext, PointcutKind, ReflectiveInfo};

use super::dispatch::{build_dispatch_code, build_passthrough_code, join_point_hash, DispatchSpec};
use super::filter;
use super::site::enclosing_member_info;
use super::{TransformContext, Transformer, WeaveState, WeaveSystem};

/// Current wrapper state of a method, read from its marker attribute.
pub(crate) fn wrapper_state(class_file: &ClassFile, index: usize) -> Option<u8> {
    class_file.methods[index]
        .find_attribute(&class_file.constant_pool, WRAPPER_MARKER_ATTRIBUTE)
        .and_then(|attribute| attribute.info.first().copied())
}

pub(crate) fn set_wrapper_state(class_file: &mut ClassFile, index: usize, state: u8) {
    let attribute = make_wrapper_marker_attribute(&mut class_file.constant_pool, state);
    class_file.methods[index].set_attribute(
        &class_file.constant_pool,
        WRAPPER_MARKER_ATTRIBUTE,
        attribute,
    );
}

/// Split the method into prefixed companion + placeholder wrapper, if not
/// already done. Returns whether the class shape changed.
pub(crate) fn ensure_wrapped(class_file: &mut ClassFile, index: usize) -> Result<bool> {
    let (name, descriptor, access_flags, descriptor_index) = {
        let method = &class_file.methods[index];
        (
            class_file.method_name(method)?.to_string(),
            class_file.method_descriptor(method)?.to_string(),
            method.access_flags,
            method.descriptor_index,
        )
    };
    let prefixed = format!("{ORIGINAL_METHOD_PREFIX}{name}");
    if class_file.find_method(&prefixed, &descriptor).is_some() {
        return Ok(false);
    }
    let Some(code_attribute) = class_file.methods[index]
        .find_attribute(&class_file.constant_pool, "Code")
        .cloned()
    else {
        return Ok(false);
    };

    // companion under the prefixed name, carrying the original body
    let prefixed_name_index = class_file.constant_pool.add_utf8(&prefixed);
    let mut companion =
        RawMethod::new(access_flags | ACC_SYNTHETIC, prefixed_name_index, descriptor_index);
    companion.attributes.push(code_attribute);
    class_file.methods.push(companion);

    // the original name becomes the placeholder wrapper
    let (parameters, return_type) = parse_method_descriptor(&descriptor)?;
    let is_static = access_flags & ACC_STATIC != 0;
    let passthrough =
        build_passthrough_code(class_file, &prefixed, &parameters, &return_type, is_static)?;
    class_file.methods[index].set_code(&mut class_file.constant_pool, &passthrough);
    set_wrapper_state(class_file, index, WRAPPER_STATE_PLACEHOLDER);
    Ok(true)
}

/// Swap the wrapper at `index` to its advised (dispatch) body.
fn advise(
    class_file: &mut ClassFile,
    state: &mut WeaveState,
    index: usize,
    this_name: &str,
) -> Result<()> {
    let (name, descriptor, access_flags) = {
        let method = &class_file.methods[index];
        (
            class_file.method_name(method)?.to_string(),
            class_file.method_descriptor(method)?.to_string(),
            method.access_flags,
        )
    };
    let (parameters, return_type) = parse_method_descriptor(&descriptor)?;
    let is_static = access_flags & ACC_STATIC != 0;
    let spec = DispatchSpec {
        join_point_id: state.next_join_point_index(),
        site_hash: join_point_hash(&name, &descriptor),
        receiver: if is_static { None } else { Some(this_name) },
        parameters: &parameters,
        return_type: &return_type,
        declaring_class: this_name,
    };
    let body = build_dispatch_code(class_file, &spec)?;
    class_file.methods[index].set_code(&mut class_file.constant_pool, &body);
    set_wrapper_state(class_file, index, WRAPPER_STATE_ADVISED);
    state.mark_advised();
    Ok(())
}

/// Swap the wrapper at `index` back to the empty-placeholder shape.
fn unweave(
    class_file: &mut ClassFile,
    state: &mut WeaveState,
    index: usize,
) -> Result<()> {
    let (name, descriptor, access_flags) = {
        let method = &class_file.methods[index];
        (
            class_file.method_name(method)?.to_string(),
            class_file.method_descriptor(method)?.to_string(),
            method.access_flags,
        )
    };
    let prefixed = format!("{ORIGINAL_METHOD_PREFIX}{name}");
    let (parameters, return_type) = parse_method_descriptor(&descriptor)?;
    let is_static = access_flags & ACC_STATIC != 0;
    let passthrough =
        build_passthrough_code(class_file, &prefixed, &parameters, &return_type, is_static)?;
    class_file.methods[index].set_code(&mut class_file.constant_pool, &passthrough);
    set_wrapper_state(class_file, index, WRAPPER_STATE_PLACEHOLDER);
    state.mark_advised();
    Ok(())
}

pub struct MethodExecutionTransformer;

impl Transformer for MethodExecutionTransformer {
    fn name(&self) -> &'static str {
        "method-execution"
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
            if !filter::is_execution_candidate(access_flags, &method_name) {
                continue;
            }
            let current_state = wrapper_state(class_file, index);
            if !class_advised && current_state.is_none() {
                continue;
            }

            let within = ReflectiveInfo::Class(class_info.clone());
            let ReflectiveInfo::Method(method_info) = enclosing_member_info(
                &class_info,
                &method_name,
                &method_descriptor_text,
            )?
            else {
                continue;
            };
            let match_context = ExpressionContext::execution(method_info, Some(within));
            let matched = match system.definitions.matches_any(&match_context, system.namespaces) {
                Ok(matched) => matched,
                Err(e) => {
                    log::warn!("{this_name}.{method_name}: execution match failure: {e}");
                    continue;
                }
            };

            match (current_state, matched) {
                (None, true) => {
                    if let Err(e) = ensure_wrapped(class_file, index).and_then(|created| {
                        if created {
                            state.mark_advised();
                        }
                        advise(class_file, state, index, &this_name)
                    }) {
                        log::warn!("{this_name}.{method_name}: execution weaving failed: {e}");
                        continue;
                    }
                    log::debug!("{this_name}.{method_name}: advised execution");
                }
                (Some(current), true) if current == WRAPPER_STATE_PLACEHOLDER => {
                    if let Err(e) = advise(class_file, state, index, &this_name) {
                        log::warn!("{this_name}.{method_name}: execution weaving failed: {e}");
                        continue;
                    }
                    log::debug!("{this_name}.{method_name}: advised prepared execution");
                }
                (Some(current), false) if current == WRAPPER_STATE_ADVISED => {
                    if let Err(e) = unweave(class_file, state, index) {
                        log::warn!("{this_name}.{method_name}: unweaving failed: {e}");
                        continue;
                    }
                    log::debug!("{this_name}.{method_name}: restored placeholder");
                }
                // advised + still matched, placeholder + still unmatched,
                // or nothing to do: re-weaving is a no-op
                _ => {}
            }
        }
        Ok(())
    }
}
