//! Reflective metadata model
//!
//! Uniform, source-independent records describing classes and their members.
//! Several extraction back-ends can populate the same records; this crate
//! ships the classfile-backed maker in [`maker`], and the matching engine
//! depends only on the records themselves.

pub mod info;
pub mod maker;
pub mod repository;

pub use info::{ClassInfo, ConstructorInfo, FieldInfo, MethodInfo};
pub use maker::class_info_from_class_file;
pub use repository::ClassInfoRepository;
