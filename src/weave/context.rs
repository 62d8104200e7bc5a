//! Per-class transformation state

use std::sync::Arc;

use crate::classfile::attribute::{make_join_point_index_attribute, parse_join_point_index};
use crate::classfile::{class_file_to_bytes, parse_class_file, ClassFile};
use crate::common::error::{Error, Result};
use crate::consts::JOIN_POINT_INDEX_ATTRIBUTE;
use crate::reflect::ClassInfo;

use super::session::WeaveOutcome;

/// Join-point counter and advised flags, split from the classfile so a
/// transformer can hold both mutably.
#[derive(Debug, Default)]
pub struct WeaveState {
    join_point_index: u32,
    advised: bool,
    advised_any: bool,
}

impl WeaveState {
    /// Allocate the next join-point index. Indices are monotonic across
    /// weaving passes: the counter is seeded from the persisted class
    /// attribute, so re-weaving continues the sequence instead of colliding.
    pub fn next_join_point_index(&mut self) -> u32 {
        let index = self.join_point_index;
        self.join_point_index += 1;
        index
    }

    pub fn join_point_index(&self) -> u32 {
        self.join_point_index
    }

    pub fn mark_advised(&mut self) {
        self.advised = true;
        self.advised_any = true;
    }

    pub fn reset_advised(&mut self) {
        self.advised = false;
    }

    pub fn is_advised(&self) -> bool {
        self.advised
    }

    pub fn was_advised(&self) -> bool {
        self.advised_any
    }
}

/// The mutable per-class transformation context: original bytes, the lazily
/// materialized classfile, and the weave state. Exclusive to the thread
/// weaving this class; destroyed after emit.
pub struct TransformContext {
    class_name: String,
    initial_bytes: Vec<u8>,
    class_file: Option<ClassFile>,
    class_info: Option<Arc<ClassInfo>>,
    pub state: WeaveState,
}

impl TransformContext {
    pub fn new(class_name: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            class_name: class_name.into(),
            initial_bytes: bytes.to_vec(),
            class_file: None,
            class_info: None,
            state: WeaveState::default(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn initial_bytes(&self) -> &[u8] {
        &self.initial_bytes
    }

    /// Parse the class bytes if not yet done and seed the join-point index
    /// counter from the persisted attribute.
    pub fn materialize(&mut self) -> Result<()> {
        if self.class_file.is_some() {
            return Ok(());
        }
        let class_file = parse_class_file(&self.initial_bytes)?;
        if let Some(attribute) = class_file.find_attribute(JOIN_POINT_INDEX_ATTRIBUTE) {
            self.state.join_point_index = parse_join_point_index(&attribute.info)?;
        }
        self.class_file = Some(class_file);
        Ok(())
    }

    pub fn class_file_mut(&mut self) -> Result<&mut ClassFile> {
        self.materialize()?;
        match self.class_file.as_mut() {
            Some(class_file) => Ok(class_file),
            None => Err(Error::internal("classfile missing after materialization")),
        }
    }

    /// The classfile and the weave state, borrowed together.
    pub fn split_mut(&mut self) -> Result<(&mut ClassFile, &mut WeaveState)> {
        self.materialize()?;
        match self.class_file.as_mut() {
            Some(class_file) => Ok((class_file, &mut self.state)),
            None => Err(Error::internal("classfile missing after materialization")),
        }
    }

    pub fn set_class_info(&mut self, info: Arc<ClassInfo>) {
        self.class_info = Some(info);
    }

    /// Reflective record of the class under transformation. Querying it
    /// before the session extracted metadata is a sequencing bug.
    pub fn class_info(&self) -> Result<&Arc<ClassInfo>> {
        self.class_info.as_ref().ok_or_else(|| {
            Error::internal(format!(
                "class info for '{}' requested before metadata extraction",
                self.class_name
            ))
        })
    }

    /// Serialize the final state. The in-memory representation is only
    /// flushed when some stage advised the class; otherwise the original
    /// bytes pass through untouched. Serialization failures fall back to the
    /// original bytes; a class never leaves the pipeline corrupt.
    pub fn emit(mut self) -> WeaveOutcome {
        if !self.state.was_advised() {
            return WeaveOutcome { bytes: self.initial_bytes, advised: false };
        }
        let Some(class_file) = self.class_file.as_mut() else {
            return WeaveOutcome { bytes: self.initial_bytes, advised: false };
        };
        let attribute =
            make_join_point_index_attribute(&mut class_file.constant_pool, self.state.join_point_index);
        class_file.set_attribute(JOIN_POINT_INDEX_ATTRIBUTE, attribute);
        let bytes = class_file_to_bytes(class_file);
        WeaveOutcome { bytes, advised: true }
    }
}
