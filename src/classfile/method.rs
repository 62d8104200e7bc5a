//! MethodInfo structure and serialization

use crate::common::error::Result;

use super::attribute::{AttributeInfo, CodeAttribute};
use super::constpool::ConstantPool;

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl MethodInfo {
    pub fn new(access_flags: u16, name_index: u16, descriptor_index: u16) -> Self {
        Self { access_flags, name_index, descriptor_index, attributes: Vec::new() }
    }

    pub fn find_attribute<'a>(&'a self, pool: &ConstantPool, name: &str) -> Option<&'a AttributeInfo> {
        self.attributes
            .iter()
            .find(|a| pool.utf8(a.name_index).map(|n| n == name).unwrap_or(false))
    }

    /// Replace (or add) an attribute by name, keeping all others.
    pub fn set_attribute(&mut self, pool: &ConstantPool, name: &str, attribute: AttributeInfo) {
        self.attributes
            .retain(|a| pool.utf8(a.name_index).map(|n| n != name).unwrap_or(true));
        self.attributes.push(attribute);
    }

    /// Parse this method's `Code` attribute, if present.
    pub fn code(&self, pool: &ConstantPool) -> Result<Option<CodeAttribute>> {
        match self.find_attribute(pool, "Code") {
            Some(attribute) => Ok(Some(CodeAttribute::parse(&attribute.info)?)),
            None => Ok(None),
        }
    }

    /// Write a mutated `Code` attribute back into this method.
    pub fn set_code(&mut self, pool: &mut ConstantPool, code: &CodeAttribute) {
        let name_index = pool.add_utf8("Code");
        let attribute = AttributeInfo::new(name_index, code.to_bytes());
        self.set_attribute(pool, "Code", attribute);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.access_flags.to_be_bytes());
        bytes.extend_from_slice(&self.name_index.to_be_bytes());
        bytes.extend_from_slice(&self.descriptor_index.to_be_bytes());
        bytes.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
        for attribute in &self.attributes {
            bytes.extend_from_slice(&attribute.to_bytes());
        }
        bytes
    }
}
