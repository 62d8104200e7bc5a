//! JVM classfile model: reading, in-memory mutation and re-serialization.
//!
//! The weaver owns its classfile layer because rewriting requires byte-exact
//! control over instruction widths and constant-pool indices. Structures are
//! kept close to the classfile format itself; higher-level interpretation
//! (reflective metadata) lives in `crate::reflect`.

pub mod attribute;
pub mod class;
pub mod code;
pub mod constpool;
pub mod defs;
pub mod descriptor;
pub mod field;
pub mod flag;
pub mod method;
pub mod opcodes;
pub mod reader;
pub mod writer;

pub use attribute::{AttributeInfo, CodeAttribute, ExceptionTableEntry};
pub use class::ClassFile;
pub use constpool::{Constant, ConstantPool};
pub use field::FieldInfo;
pub use method::MethodInfo;
pub use reader::parse_class_file;
pub use writer::class_file_to_bytes;
