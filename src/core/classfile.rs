use std::collections::HashSet;
use std::ops::RangeInclusive;

use crate::core::class::{binary_to_dotted, ClassMetadata, MemberInfo};
use crate::core::fingerprint::SourceStamp;
use crate::error::{ParseError, VerifyError};

/// 支持的 class 文件主版本（45 = JDK 1.1，55 = JDK 11）
pub const SUPPORTED_MAJOR: RangeInclusive<u16> = 45..=55;

const OBJECT: &str = "java.lang.Object";

/// 正常（慢）路径的 class 文件解析器
pub trait ClassFileParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ClassMetadata, ParseError>;
}

/// 结构校验；完整字节码校验不在本 crate 范围内
pub trait ClassVerifier: Send + Sync {
    fn verify(&self, meta: &ClassMetadata) -> Result<(), VerifyError>;
}

/// 基于 `cafebabe` 的解析器
#[derive(Clone, Copy, Debug, Default)]
pub struct CafebabeParser;

impl ClassFileParser for CafebabeParser {
    fn parse(&self, bytes: &[u8]) -> Result<ClassMetadata, ParseError> {
        let class = cafebabe::parse_class(bytes).map_err(|e| ParseError::Malformed(e.to_string()))?;

        // header: magic(4) + minor(2) + major(2)
        let major_version = bytes
            .get(6..8)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| ParseError::Malformed("truncated header".into()))?;

        let name = binary_to_dotted(&class.this_class.to_string());
        let super_name = class
            .super_class
            .as_ref()
            .map(|s| binary_to_dotted(&s.to_string()));
        let interfaces = class
            .interfaces
            .iter()
            .map(|i| binary_to_dotted(&i.to_string()))
            .collect();

        let fields = class
            .fields
            .iter()
            .map(|f| MemberInfo {
                name: f.name.to_string(),
                descriptor: f.descriptor.to_string(),
                access_flags: f.access_flags.bits(),
            })
            .collect();
        let methods = class
            .methods
            .iter()
            .map(|m| MemberInfo {
                name: m.name.to_string(),
                descriptor: m.descriptor.to_string(),
                access_flags: m.access_flags.bits(),
            })
            .collect();

        ClassMetadata::assemble(
            name,
            super_name,
            interfaces,
            class.access_flags.bits(),
            major_version,
            fields,
            methods,
            SourceStamp::of(bytes),
        )
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralVerifier;

impl ClassVerifier for StructuralVerifier {
    fn verify(&self, meta: &ClassMetadata) -> Result<(), VerifyError> {
        if meta.name.is_empty() {
            return Err(VerifyError::EmptyName);
        }
        if !SUPPORTED_MAJOR.contains(&meta.major_version) {
            return Err(VerifyError::UnsupportedVersion(meta.major_version));
        }
        match meta.super_name.as_deref() {
            None if meta.name != OBJECT => return Err(VerifyError::MissingSuper(meta.name.clone())),
            Some(s) if meta.is_interface() && s != OBJECT => {
                return Err(VerifyError::InterfaceSuper(meta.name.clone()))
            }
            _ => {}
        }

        for (kind, members) in [("field", &meta.fields), ("method", &meta.methods)] {
            let mut seen = HashSet::with_capacity(members.len());
            for m in members {
                if !seen.insert((m.name.as_str(), m.descriptor.as_str())) {
                    return Err(VerifyError::DuplicateMember {
                        class: meta.name.clone(),
                        kind,
                        name: m.name.clone(),
                        descriptor: m.descriptor.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
