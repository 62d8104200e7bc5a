//! Classfile parser: bytes → mutable classfile structures

use crate::common::error::{Error, Result};

use super::attribute::AttributeInfo;
use super::class::ClassFile;
use super::constpool::{constant_tags::*, Constant, ConstantPool};
use super::defs::MAGIC;
use super::field::FieldInfo;
use super::method::MethodInfo;

/// Byte cursor over the raw class bytes.
struct ClassBuffer<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ClassBuffer<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8]> {
        if self.offset + length > self.data.len() {
            return Err(Error::class_format(format!(
                "truncated class file: need {length} bytes at offset {}",
                self.offset
            )));
        }
        let slice = &self.data[self.offset..self.offset + length];
        self.offset += length;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Parse class bytes into the mutable classfile model.
pub fn parse_class_file(data: &[u8]) -> Result<ClassFile> {
    let mut buffer = ClassBuffer::new(data);

    let magic = buffer.read_u32()?;
    if magic != MAGIC {
        return Err(Error::class_format(format!("bad magic 0x{magic:08x}")));
    }
    let minor_version = buffer.read_u16()?;
    let major_version = buffer.read_u16()?;
    let constant_pool = parse_constant_pool(&mut buffer)?;

    let access_flags = buffer.read_u16()?;
    let this_class = buffer.read_u16()?;
    let super_class = buffer.read_u16()?;

    let interface_count = buffer.read_u16()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(buffer.read_u16()?);
    }

    let field_count = buffer.read_u16()?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let access_flags = buffer.read_u16()?;
        let name_index = buffer.read_u16()?;
        let descriptor_index = buffer.read_u16()?;
        let mut field = FieldInfo::new(access_flags, name_index, descriptor_index);
        field.attributes = parse_attributes(&mut buffer)?;
        fields.push(field);
    }

    let method_count = buffer.read_u16()?;
    let mut methods = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        let access_flags = buffer.read_u16()?;
        let name_index = buffer.read_u16()?;
        let descriptor_index = buffer.read_u16()?;
        let mut method = MethodInfo::new(access_flags, name_index, descriptor_index);
        method.attributes = parse_attributes(&mut buffer)?;
        methods.push(method);
    }

    let attributes = parse_attributes(&mut buffer)?;
    if buffer.offset != data.len() {
        return Err(Error::class_format(format!(
            "{} trailing bytes after class structure",
            data.len() - buffer.offset
        )));
    }

    Ok(ClassFile {
        magic,
        minor_version,
        major_version,
        constant_pool,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

fn parse_constant_pool(buffer: &mut ClassBuffer) -> Result<ConstantPool> {
    let count = buffer.read_u16()?;
    let mut pool = ConstantPool::new();
    let mut slot = 1u16;
    while slot < count {
        let tag = buffer.read_u8()?;
        let constant = match tag {
            CONSTANT_UTF8 => {
                let length = buffer.read_u16()? as usize;
                let bytes = buffer.take(length)?;
                // Modified UTF-8 with supplementary characters is preserved
                // only when it is valid UTF-8; the weaver never introduces
                // such names itself.
                let value = String::from_utf8(bytes.to_vec()).map_err(|_| {
                    Error::class_format("unsupported modified UTF-8 constant")
                })?;
                Constant::Utf8(value)
            }
            CONSTANT_INTEGER => Constant::Integer(buffer.read_u32()? as i32),
            CONSTANT_FLOAT => Constant::Float(f32::from_bits(buffer.read_u32()?)),
            CONSTANT_LONG => {
                let high = buffer.read_u32()? as u64;
                let low = buffer.read_u32()? as u64;
                Constant::Long(((high << 32) | low) as i64)
            }
            CONSTANT_DOUBLE => {
                let high = buffer.read_u32()? as u64;
                let low = buffer.read_u32()? as u64;
                Constant::Double(f64::from_bits((high << 32) | low))
            }
            CONSTANT_CLASS => Constant::Class(buffer.read_u16()?),
            CONSTANT_STRING => Constant::String(buffer.read_u16()?),
            CONSTANT_FIELDREF => Constant::FieldRef(buffer.read_u16()?, buffer.read_u16()?),
            CONSTANT_METHODREF => Constant::MethodRef(buffer.read_u16()?, buffer.read_u16()?),
            CONSTANT_INTERFACEMETHODREF => {
                Constant::InterfaceMethodRef(buffer.read_u16()?, buffer.read_u16()?)
            }
            CONSTANT_NAMEANDTYPE => Constant::NameAndType(buffer.read_u16()?, buffer.read_u16()?),
            CONSTANT_METHODHANDLE => Constant::MethodHandle(buffer.read_u8()?, buffer.read_u16()?),
            CONSTANT_METHODTYPE => Constant::MethodType(buffer.read_u16()?),
            CONSTANT_DYNAMIC => Constant::Dynamic(buffer.read_u16()?, buffer.read_u16()?),
            CONSTANT_INVOKEDYNAMIC => {
                Constant::InvokeDynamic(buffer.read_u16()?, buffer.read_u16()?)
            }
            CONSTANT_MODULE => Constant::Module(buffer.read_u16()?),
            CONSTANT_PACKAGE => Constant::Package(buffer.read_u16()?),
            other => {
                return Err(Error::class_format(format!(
                    "unknown constant pool tag {other} in slot {slot}"
                )))
            }
        };
        slot += if constant.is_wide() { 2 } else { 1 };
        pool.push_raw(constant);
    }
    Ok(pool)
}

fn parse_attributes(buffer: &mut ClassBuffer) -> Result<Vec<AttributeInfo>> {
    let count = buffer.read_u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = buffer.read_u16()?;
        let length = buffer.read_u32()? as usize;
        let info = buffer.take(length)?.to_vec();
        attributes.push(AttributeInfo::new(name_index, info));
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::writer::class_file_to_bytes;

    #[test]
    fn test_rejects_bad_magic() {
        assert!(parse_class_file(&[0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_rejects_truncated_input() {
        assert!(parse_class_file(&[0xca, 0xfe, 0xba]).is_err());
    }

    #[test]
    fn test_round_trip_minimal_class() {
        let mut class_file = ClassFile::new();
        class_file.this_class = class_file.constant_pool.add_class("pkg/Target");
        class_file.super_class = class_file.constant_pool.add_class("java/lang/Object");
        class_file.access_flags = 0x0021;

        let bytes = class_file_to_bytes(&class_file);
        let parsed = parse_class_file(&bytes).unwrap();
        assert_eq!(parsed.internal_name().unwrap(), "pkg/Target");
        assert_eq!(parsed.super_internal_name().unwrap(), Some("java/lang/Object"));
        assert_eq!(parsed.major_version, class_file.major_version);
        // re-serialization is stable
        assert_eq!(class_file_to_bytes(&parsed), bytes);
    }
}
