use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::fingerprint::SourceStamp;
use crate::error::ParseError;

pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_INTERFACE: u16 = 0x0200;

/// 字段 / 方法表项（符号形式）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub name: String,
    pub descriptor: String,
    pub access_flags: u16,
}

impl MemberInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }
}

/// 字段布局（字节数，按描述符宽度累加，不做对齐填充）
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLayout {
    pub instance_bytes: u32,
    pub static_bytes: u32,
}

/// 解析并校验后的 class 元数据；archive entry 的 blob 就是它的 bincode 编码
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMetadata {
    /// 点分二进制名：`a.b.C`
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access_flags: u16,
    pub major_version: u16,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    /// 常量引用的符号化结果：super / interfaces / 描述符中出现的类（排序去重）
    pub referenced_classes: Vec<String>,
    pub layout: InstanceLayout,
    /// 原始 class 字节的内容戳
    pub source: SourceStamp,
}

impl ClassMetadata {
    /// 由解析结果组装；布局与引用表在这里统一计算
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        name: String,
        super_name: Option<String>,
        interfaces: Vec<String>,
        access_flags: u16,
        major_version: u16,
        fields: Vec<MemberInfo>,
        methods: Vec<MemberInfo>,
        source: SourceStamp,
    ) -> Result<Self, ParseError> {
        let mut layout = InstanceLayout::default();
        for f in &fields {
            let width = field_width(&f.descriptor)?;
            if f.is_static() {
                layout.static_bytes += width;
            } else {
                layout.instance_bytes += width;
            }
        }

        let mut refs = BTreeSet::new();
        refs.extend(super_name.iter().cloned());
        refs.extend(interfaces.iter().cloned());
        for m in fields.iter().chain(methods.iter()) {
            collect_descriptor_classes(&m.descriptor, &mut refs)?;
        }
        refs.remove(&name);

        Ok(Self {
            name,
            super_name,
            interfaces,
            access_flags,
            major_version,
            fields,
            methods,
            referenced_classes: refs.into_iter().collect(),
            layout,
            source,
        })
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0
    }

    pub fn to_blob(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(blob)
    }
}

/// 与 `Class.toString()` 的形式一致
impl fmt::Display for ClassMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_interface() {
            write!(f, "interface {}", self.name)
        } else {
            write!(f, "class {}", self.name)
        }
    }
}

/// `a/b/C` -> `a.b.C`
pub fn binary_to_dotted(internal: &str) -> String {
    internal.replace('/', ".")
}

fn field_width(descriptor: &str) -> Result<u32, ParseError> {
    match descriptor.as_bytes().first() {
        Some(b'J') | Some(b'D') => Ok(8),
        Some(b'I') | Some(b'F') => Ok(4),
        Some(b'S') | Some(b'C') => Ok(2),
        Some(b'B') | Some(b'Z') => Ok(1),
        // 引用按 64 位指针宽度计
        Some(b'L') | Some(b'[') => Ok(8),
        _ => Err(ParseError::Descriptor(descriptor.to_string())),
    }
}

fn collect_descriptor_classes(descriptor: &str, out: &mut BTreeSet<String>) -> Result<(), ParseError> {
    let mut rest = descriptor;
    while let Some(start) = rest.find('L') {
        let tail = &rest[start + 1..];
        let end = tail
            .find(';')
            .ok_or_else(|| ParseError::Descriptor(descriptor.to_string()))?;
        out.insert(binary_to_dotted(&tail[..end]));
        rest = &tail[end + 1..];
    }
    Ok(())
}
