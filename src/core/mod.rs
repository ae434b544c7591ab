pub mod class;
pub mod classfile;
pub mod fingerprint;
pub mod loader;

pub use class::*;
pub use classfile::{CafebabeParser, ClassFileParser, ClassVerifier, StructuralVerifier};
pub use fingerprint::{ClasspathFingerprint, SourceStamp};
pub use loader::*;
