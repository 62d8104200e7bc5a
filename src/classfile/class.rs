//! Core classfile structure

use crate::common::error::Result;

use super::attribute::AttributeInfo;
use super::constpool::ConstantPool;
use super::defs::{major_versions, MAGIC};
use super::field::FieldInfo;
use super::method::MethodInfo;

#[derive(Debug)]
pub struct ClassFile {
    pub magic: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    pub fn new() -> Self {
        Self {
            magic: MAGIC,
            minor_version: 0,
            major_version: major_versions::JAVA_1_4,
            constant_pool: ConstantPool::new(),
            access_flags: 0,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Internal (`/`-separated) name of this class.
    pub fn internal_name(&self) -> Result<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of the superclass, absent for `java/lang/Object`.
    pub fn super_internal_name(&self) -> Result<Option<&str>> {
        if self.super_class == 0 {
            Ok(None)
        } else {
            self.constant_pool.class_name(self.super_class).map(Some)
        }
    }

    pub fn method_name(&self, method: &MethodInfo) -> Result<&str> {
        self.constant_pool.utf8(method.name_index)
    }

    pub fn method_descriptor(&self, method: &MethodInfo) -> Result<&str> {
        self.constant_pool.utf8(method.descriptor_index)
    }

    pub fn field_name(&self, field: &FieldInfo) -> Result<&str> {
        self.constant_pool.utf8(field.name_index)
    }

    pub fn field_descriptor(&self, field: &FieldInfo) -> Result<&str> {
        self.constant_pool.utf8(field.descriptor_index)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods.iter().position(|m| {
            self.constant_pool.utf8(m.name_index).map(|n| n == name).unwrap_or(false)
                && self
                    .constant_pool
                    .utf8(m.descriptor_index)
                    .map(|d| d == descriptor)
                    .unwrap_or(false)
        })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields
            .iter()
            .any(|f| self.constant_pool.utf8(f.name_index).map(|n| n == name).unwrap_or(false))
    }

    pub fn has_interface(&self, internal_name: &str) -> bool {
        self.interfaces
            .iter()
            .any(|&i| self.constant_pool.class_name(i).map(|n| n == internal_name).unwrap_or(false))
    }

    pub fn find_attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes
            .iter()
            .find(|a| self.constant_pool.utf8(a.name_index).map(|n| n == name).unwrap_or(false))
    }

    /// Replace (or add) a class-level attribute by name.
    pub fn set_attribute(&mut self, name: &str, attribute: AttributeInfo) {
        let pool = &self.constant_pool;
        self.attributes
            .retain(|a| pool.utf8(a.name_index).map(|n| n != name).unwrap_or(true));
        self.attributes.push(attribute);
    }
}

impl Default for ClassFile {
    fn default() -> Self {
        Self::new()
    }
}
