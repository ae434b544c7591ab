use thiserror::Error;

use crate::core::LoaderId;

/// 注册冲突：属于调用方错误，原样上抛，不做自动处理
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("loader name {name:?} is already registered to live {holder}")]
    DuplicateName { name: String, holder: LoaderId },
    #[error("{loader} is already registered as {existing:?}, refusing rename to {requested:?}")]
    AlreadyRegistered {
        loader: LoaderId,
        existing: String,
        requested: String,
    },
    #[error("loader name {0:?} is reserved for a builtin loader")]
    ReservedName(String),
    #[error("loader name must not be empty")]
    InvalidName,
    #[error("{0} is a builtin loader and cannot be registered")]
    BuiltinLoader(LoaderId),
}

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("{excluded} classes excluded from dump, threshold is {threshold}")]
    TooManyExclusions { excluded: usize, threshold: usize },
    #[error("runtime was not started in dump mode")]
    NotDumping,
    #[error("archive section too large: {0}")]
    TooLarge(&'static str),
    #[error("serialization failed: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive too small ({0} bytes)")]
    TooSmall(usize),
    #[error("archive magic mismatch: {0:#x}")]
    BadMagic(u32),
    #[error("archive version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("archive was not committed")]
    Incomplete,
    #[error("archive corrupt: {0}")]
    Corrupt(String),
    #[error("entry checksum mismatch for {class_name}")]
    ChecksumMismatch { class_name: String },
    #[error("entry decode failed: {0}")]
    Decode(#[from] bincode::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed class file: {0}")]
    Malformed(String),
    #[error("bad descriptor {0:?}")]
    Descriptor(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("class has an empty name")]
    EmptyName,
    #[error("{0} has no superclass")]
    MissingSuper(String),
    #[error("interface {0} must extend java.lang.Object")]
    InterfaceSuper(String),
    #[error("unsupported class file major version {0}")]
    UnsupportedVersion(u16),
    #[error("duplicate {kind} {name}{descriptor} in {class}")]
    DuplicateMember {
        class: String,
        kind: &'static str,
        name: String,
        descriptor: String,
    },
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("class {class_name} not found through {loader}")]
    NotFound { class_name: String, loader: LoaderId },
    #[error("wrong name: requested {requested}, class file defines {found}")]
    NameMismatch { requested: String, found: String },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}
