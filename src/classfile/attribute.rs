//! Attributes and exception table structures for Java class files

use crate::common::error::{Error, Result};
use crate::consts::{JOIN_POINT_INDEX_ATTRIBUTE, WRAPPER_MARKER_ATTRIBUTE};

use super::constpool::ConstantPool;

/// A named attribute with an opaque payload. Attributes the weaver does not
/// interpret round-trip through re-serialization unchanged.
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl AttributeInfo {
    pub fn new(name_index: u16, info: Vec<u8>) -> Self {
        Self { name_index, info }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.name_index.to_be_bytes());
        bytes.extend_from_slice(&(self.info.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.info);
        bytes
    }
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            code,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Parse the payload of a `Code` attribute.
    pub fn parse(info: &[u8]) -> Result<Self> {
        let need = |offset: usize, len: usize| -> Result<()> {
            if offset + len > info.len() {
                Err(Error::class_format("truncated Code attribute"))
            } else {
                Ok(())
            }
        };
        need(0, 8)?;
        let max_stack = u16::from_be_bytes([info[0], info[1]]);
        let max_locals = u16::from_be_bytes([info[2], info[3]]);
        let code_length = u32::from_be_bytes([info[4], info[5], info[6], info[7]]) as usize;
        need(8, code_length)?;
        let code = info[8..8 + code_length].to_vec();
        let mut offset = 8 + code_length;

        need(offset, 2)?;
        let table_length = u16::from_be_bytes([info[offset], info[offset + 1]]) as usize;
        offset += 2;
        let mut exception_table = Vec::with_capacity(table_length);
        for _ in 0..table_length {
            need(offset, 8)?;
            exception_table.push(ExceptionTableEntry::new(
                u16::from_be_bytes([info[offset], info[offset + 1]]),
                u16::from_be_bytes([info[offset + 2], info[offset + 3]]),
                u16::from_be_bytes([info[offset + 4], info[offset + 5]]),
                u16::from_be_bytes([info[offset + 6], info[offset + 7]]),
            ));
            offset += 8;
        }

        need(offset, 2)?;
        let attribute_count = u16::from_be_bytes([info[offset], info[offset + 1]]) as usize;
        offset += 2;
        let mut attributes = Vec::with_capacity(attribute_count);
        for _ in 0..attribute_count {
            need(offset, 6)?;
            let name_index = u16::from_be_bytes([info[offset], info[offset + 1]]);
            let length = u32::from_be_bytes([
                info[offset + 2],
                info[offset + 3],
                info[offset + 4],
                info[offset + 5],
            ]) as usize;
            offset += 6;
            need(offset, length)?;
            attributes.push(AttributeInfo::new(name_index, info[offset..offset + length].to_vec()));
            offset += length;
        }

        Ok(Self { max_stack, max_locals, code, exception_table, attributes })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.max_stack.to_be_bytes());
        bytes.extend_from_slice(&self.max_locals.to_be_bytes());
        bytes.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.code);
        bytes.extend_from_slice(&(self.exception_table.len() as u16).to_be_bytes());
        for entry in &self.exception_table {
            bytes.extend_from_slice(&entry.to_bytes());
        }
        bytes.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
        for attribute in &self.attributes {
            bytes.extend_from_slice(&attribute.to_bytes());
        }
        bytes
    }

    /// Drop a nested attribute by resolved name. Rewritten bodies shed their
    /// `StackMapTable` this way.
    pub fn remove_attribute(&mut self, pool: &ConstantPool, name: &str) {
        self.attributes
            .retain(|a| pool.utf8(a.name_index).map(|n| n != name).unwrap_or(true));
    }
}

#[derive(Debug, Clone)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

impl ExceptionTableEntry {
    pub fn new(start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) -> Self {
        Self { start_pc, end_pc, handler_pc, catch_type }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.start_pc.to_be_bytes());
        bytes.extend_from_slice(&self.end_pc.to_be_bytes());
        bytes.extend_from_slice(&self.handler_pc.to_be_bytes());
        bytes.extend_from_slice(&self.catch_type.to_be_bytes());
        bytes
    }
}

/// Build the class-level attribute persisting the join-point index counter.
pub fn make_join_point_index_attribute(pool: &mut ConstantPool, index: u32) -> AttributeInfo {
    let name_index = pool.add_utf8(JOIN_POINT_INDEX_ATTRIBUTE);
    AttributeInfo::new(name_index, index.to_be_bytes().to_vec())
}

/// Read the persisted join-point index out of a class attribute payload.
pub fn parse_join_point_index(info: &[u8]) -> Result<u32> {
    if info.len() != 4 {
        return Err(Error::class_format(format!(
            "join-point index attribute has {} bytes, expected 4",
            info.len()
        )));
    }
    Ok(u32::from_be_bytes([info[0], info[1], info[2], info[3]]))
}

/// Build the method-level wrapper marker attribute.
pub fn make_wrapper_marker_attribute(pool: &mut ConstantPool, state: u8) -> AttributeInfo {
    let name_index = pool.add_utf8(WRAPPER_MARKER_ATTRIBUTE);
    AttributeInfo::new(name_index, vec![state])
}
