//! Bytecode transformer pipeline
//!
//! An ordered sequence of independent transformers, one per join-point kind,
//! each rewriting matched sites to dispatch through the runtime join-point
//! manager. Instruction widths are always preserved (or code is appended at
//! the end), so unrelated offsets never shift and exception tables survive
//! call-site rewriting untouched.

pub mod constructor_call;
pub mod constructor_execution;
pub mod context;
pub mod dispatch;
pub mod field_access;
pub mod filter;
pub mod handler;
pub mod introduction;
pub mod method_call;
pub mod method_execution;
pub mod prepare;
pub mod session;
pub mod site;

use crate::common::error::Result;
use crate::definition::DefinitionRegistry;
use crate::expr::NamespaceRegistry;
use crate::reflect::ClassInfoRepository;

pub use context::{TransformContext, WeaveState};

/// The shared collaborators every transformer works against.
pub struct WeaveSystem<'a> {
    pub definitions: &'a DefinitionRegistry,
    pub namespaces: &'a NamespaceRegistry,
    pub repository: &'a ClassInfoRepository,
}

/// One stage of the pipeline.
pub trait Transformer {
    fn name(&self) -> &'static str;

    fn transform(&self, context: &mut TransformContext, system: &WeaveSystem) -> Result<()>;
}

/// The fixed stage order: bookkeeping preparation, field accesses, call
/// sites, executions, handlers, then introductions. The join-point-index
/// flush happens at emit time when any stage advised the class.
pub fn standard_pipeline() -> Vec<Box<dyn Transformer>> {
    vec![
        Box::new(prepare::PrepareTransformer),
        Box::new(field_access::FieldAccessTransformer),
        Box::new(method_call::MethodCallTransformer),
        Box::new(constructor_call::ConstructorCallTransformer),
        Box::new(method_execution::MethodExecutionTransformer),
        Box::new(constructor_execution::ConstructorExecutionTransformer),
        Box::new(handler::HandlerTransformer),
        Box::new(introduction::AddImplementationTransformer),
        Box::new(introduction::AddInterfaceTransformer),
    ]
}
