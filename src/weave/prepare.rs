//! Bookkeeping preparation
//!
//! Runs first in the pipeline: every method an execution binding matches is
//! split into its prefixed companion plus the empty-placeholder wrapper
//! before any advising happens, so later passes (and later re-weaves) only
//! ever toggle wrapper bodies against a stable method table.

use crate::common::error::Result;
use crate::expr::{ExpressionContext, PointcutKind, ReflectiveInfo};

use super::filter;
use super::method_execution::ensure_wrapped;
use super::site::enclosing_member_info;
use super::{TransformContext, Transformer, WeaveSystem};

pub struct PrepareTransformer;

impl Transformer for PrepareTransformer {
    fn name(&self) -> &'static str {
        "prepare"
    }

    fn transform(&self, context: &mut TransformContext, system: &WeaveSystem) -> Result<()> {
        let class_info = context.class_info()?.clone();
        if !system
            .definitions
            .advises_class(&class_info, PointcutKind::Execution, system.namespaces)?
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
            if !filter::is_execution_candidate(access_flags, &method_name) {
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
            match system.definitions.matches_any(&match_context, system.namespaces) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    log::warn!("{this_name}.{method_name}: prepare match failure: {e}");
                    continue;
                }
            }
            match ensure_wrapped(class_file, index) {
                Ok(true) => {
                    state.mark_advised();
                    log::debug!("{this_name}.{method_name}: prepared placeholder wrapper");
                }
                Ok(false) => {}
                Err(e) => {
                    log::warn!("{this_name}.{method_name}: prepare failed: {e}");
                }
            }
        }
        Ok(())
    }
}
