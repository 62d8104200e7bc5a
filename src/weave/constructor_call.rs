//! Constructor-call advising
//!
//! A matched `new X` site is the pair of a `new`+`dup` and the
//! `invokespecial <init>` that initializes it. The pair is located by a
//! NEW-tracking scan (nested allocations resolve innermost-first); the
//! `new`/`dup` bytes become `nop`s and the `invokespecial` is redirected to
//! a wrapper returning the constructed instance. Sites whose shape cannot
//! be established are logged and skipped.

use crate::classfile::code::{read_u16, Instruction, InstructionIter};
use crate::classfile::defs::CONSTRUCTOR_METHOD_NAME;
use crate::classfile::descriptor::{method_descriptor, parse_method_descriptor};
use crate::classfile::flag::access_flags::*;
use crate::classfile::opcodes::*;
use crate::classfile::ConstantPool;
use crate::common::error::Result;
use crate::consts::{CTOR_WRAPPER_PREFIX, WRAPPER_MARKER_ATTRIBUTE};
use crate::expr::{ExpressionContext, PointcutKind};
use crate::reflect::info::normalize_class_name;

use super::dispatch::{
    add_synthetic_method, build_dispatch_code, join_point_hash, wrapper_method_name, DispatchSpec,
};
use super::filter;
use super::site::{callee_constructor_info, enclosing_member_info};
use super::{TransformContext, Transformer, WeaveSystem};

/// One resolved constructor-call site: the allocation pair plus the
/// initializer call.
struct CtorCallSite {
    new_pc: usize,
    invoke_pc: usize,
    owner: String,
    descriptor: String,
}

/// Pair `new` instructions with their `invokespecial <init>` calls. The
/// first unpaired `<init>` call inside a constructor body is the mandatory
/// `super`/`this` call and is not a site.
fn collect_ctor_sites(code: &[u8], pool: &ConstantPool) -> Result<Vec<CtorCallSite>> {
    let mut pending_new: Vec<(usize, String)> = Vec::new();
    let mut sites = Vec::new();
    for instruction in InstructionIter::new(code) {
        let Instruction { pc, opcode, length: _ } = instruction?;
        match opcode {
            NEW => {
                let class_index = read_u16(code, pc + 1);
                match pool.class_name(class_index) {
                    Ok(name) => pending_new.push((pc, normalize_class_name(name))),
                    Err(e) => log::warn!("unresolvable NEW operand at pc {pc}: {e}"),
                }
            }
            INVOKESPECIAL => {
                let index = read_u16(code, pc + 1);
                let Ok((owner, name, descriptor)) = pool.member_ref(index) else {
                    continue;
                };
                if name != CONSTRUCTOR_METHOD_NAME {
                    continue;
                }
                let owner = normalize_class_name(owner);
                let Some((new_pc, new_class)) = pending_new.pop() else {
                    // the enclosing constructor's own super/this call
                    continue;
                };
                if new_class != owner {
                    log::warn!(
                        "allocation at pc {new_pc} ({new_class}) does not pair with <init> of \
                         {owner} at pc {pc}, skipping site"
                    );
                    continue;
                }
                sites.push(CtorCallSite {
                    new_pc,
                    invoke_pc: pc,
                    owner,
                    descriptor: descriptor.to_string(),
                });
            }
            _ => {}
        }
    }
    Ok(sites)
}

pub struct ConstructorCallTransformer;

impl Transformer for ConstructorCallTransformer {
    fn name(&self) -> &'static str {
        "constructor-call"
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
            // placeholder/advised constructor tails are framework code, but
            // their super-call prefix never contains an advisable site
            if method_name != CONSTRUCTOR_METHOD_NAME
                && class_file.methods[index]
                    .find_attribute(&class_file.constant_pool, WRAPPER_MARKER_ATTRIBUTE)
                    .is_some()
            {
                continue;
            }
            let Some(mut code) = class_file.methods[index].code(&class_file.constant_pool)? else {
                continue;
            };
            let sites = collect_ctor_sites(&code.code, &class_file.constant_pool)?;
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
                if filter::is_runtime_class(&site.owner)
                    || !system.definitions.in_include_scope(&site.owner)
                {
                    continue;
                }
                // allocation must be the javac `new` + immediate `dup` shape
                if code.code.get(site.new_pc + 3) != Some(&DUP) {
                    log::warn!(
                        "{this_name}.{method_name}: allocation of {} at pc {} lacks the \
                         new/dup shape, skipping site",
                        site.owner,
                        site.new_pc
                    );
                    continue;
                }
                let callee = match callee_constructor_info(
                    system.repository,
                    &site.owner,
                    &site.descriptor,
                ) {
                    Ok(callee) => callee,
                    Err(e) => {
                        log::warn!(
                            "{this_name}.{method_name}: skipping constructor site at pc {}: {e}",
                            site.invoke_pc
                        );
                        continue;
                    }
                };
                let match_context =
                    ExpressionContext::constructor_call(callee, Some(within.clone()));
                match system.definitions.matches_any(&match_context, system.namespaces) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        log::warn!(
                            "{this_name}.{method_name}: match failure at constructor site pc {}: {e}",
                            site.invoke_pc
                        );
                        continue;
                    }
                }

                let (parameters, _) = match parse_method_descriptor(&site.descriptor) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        log::warn!(
                            "{this_name}.{method_name}: bad constructor descriptor at pc {}: {e}",
                            site.invoke_pc
                        );
                        continue;
                    }
                };
                let wrapper_descriptor = method_descriptor(&parameters, &site.owner);
                let wrapper_name = wrapper_method_name(
                    CTOR_WRAPPER_PREFIX,
                    &site.owner,
                    CONSTRUCTOR_METHOD_NAME,
                    &site.descriptor,
                );

                if class_file.find_method(&wrapper_name, &wrapper_descriptor).is_none() {
                    let spec = DispatchSpec {
                        join_point_id: state.next_join_point_index(),
                        site_hash: join_point_hash(CONSTRUCTOR_METHOD_NAME, &site.descriptor),
                        receiver: None,
                        parameters: &parameters,
                        return_type: &site.owner,
                        declaring_class: &site.owner,
                    };
                    let body = match build_dispatch_code(class_file, &spec) {
                        Ok(body) => body,
                        Err(e) => {
                            log::warn!(
                                "{this_name}.{method_name}: wrapper generation failed for new {}: {e}",
                                site.owner
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
                for nop_pc in site.new_pc..site.new_pc + 4 {
                    code.code[nop_pc] = NOP;
                }
                code.code[site.invoke_pc] = INVOKESTATIC;
                code.code[site.invoke_pc + 1..site.invoke_pc + 3]
                    .copy_from_slice(&wrapper_ref.to_be_bytes());
                changed = true;
                state.mark_advised();
                log::debug!(
                    "{this_name}.{method_name}: advised constructor call to {} at pc {}",
                    site.owner,
                    site.invoke_pc
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_allocations_pair_innermost_first() {
        let mut pool = ConstantPool::new();
        let outer = pool.add_class("pkg/Outer");
        let inner = pool.add_class("pkg/Inner");
        let outer_init = pool.add_method_ref("pkg/Outer", "<init>", "(Lpkg/Inner;)V");
        let inner_init = pool.add_method_ref("pkg/Inner", "<init>", "()V");

        // new Outer(new Inner())
        let mut code = Vec::new();
        code.push(NEW);
        code.extend_from_slice(&outer.to_be_bytes());
        code.push(DUP);
        code.push(NEW);
        code.extend_from_slice(&inner.to_be_bytes());
        code.push(DUP);
        code.push(INVOKESPECIAL);
        code.extend_from_slice(&inner_init.to_be_bytes());
        code.push(INVOKESPECIAL);
        code.extend_from_slice(&outer_init.to_be_bytes());
        code.push(RETURN);

        let sites = collect_ctor_sites(&code, &pool).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].owner, "pkg.Inner");
        assert_eq!(sites[0].new_pc, 4);
        assert_eq!(sites[1].owner, "pkg.Outer");
        assert_eq!(sites[1].new_pc, 0);
    }

    #[test]
    fn test_super_call_is_not_a_site() {
        let mut pool = ConstantPool::new();
        let super_init = pool.add_method_ref("java/lang/Object", "<init>", "()V");
        let code = [
            ALOAD_0,
            INVOKESPECIAL,
            super_init.to_be_bytes()[0],
            super_init.to_be_bytes()[1],
            RETURN,
        ];
        let sites = collect_ctor_sites(&code, &pool).unwrap();
        assert!(sites.is_empty());
    }
}
