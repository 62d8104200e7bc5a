//! jweave: bytecode-level aspect weaver for JVM class files
//!
//! ## Architecture
//!
//! The weaver follows a fixed per-class pipeline:
//!
//! - **classfile**: reading, mutating and re-serializing `.class` binaries
//! - **reflect**: source-independent reflective metadata (classes, members,
//!   annotations) with a loader-scoped cache
//! - **expr**: the pointcut expression engine: lexer, parser, pattern
//!   matching and structural evaluation, plus the derived class-level filters
//! - **definition**: system definitions (include/exclude scope, advice and
//!   introduction bindings) and the registry the weaver queries
//! - **weave**: the transformer pipeline that rewrites matched join points
//!   into dispatch calls through the runtime join-point manager
//!
//! ## Weaving Flow
//!
//! ```text
//! class bytes → classfile parse → metadata extraction
//!                 ↓
//!         include/exclude admission
//!                 ↓
//!   per transformer: advised-class filter → site matching → rewrite
//!                 ↓
//!   join-point index flush → rewritten bytes (or original if unadvised)
//! ```

pub mod classfile;
pub mod common;
pub mod consts;
pub mod definition;
pub mod expr;
pub mod reflect;
pub mod weave;

pub use common::error::{Error, Result};
pub use weave::session::{WeaveOutcome, WeavingSession};

/// Weave a single class in one shot.
///
/// Convenience wrapper for callers that do not keep a session alive: builds
/// a throwaway [`WeavingSession`] around `definition`, runs the full
/// transformer pipeline and returns the rewritten bytes (or the original
/// bytes when nothing matched).
pub fn weave(
    class_name: &str,
    bytes: &[u8],
    definition: definition::SystemDefinition,
) -> Result<WeaveOutcome> {
    let session = WeavingSession::new();
    session.register_definition(definition)?;
    session.weave_class(class_name, bytes)
}
