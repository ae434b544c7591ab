use std::ops::Range;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::core::{ClasspathFingerprint, SourceStamp};
use crate::error::ArchiveError;

/// Archive 文件 Header
pub const MAGIC: u32 = 0xCD5A_EA01;
pub const ARCHIVE_VERSION: u32 = 1;
pub const STATE_COMMITTED: u32 = 0x0000_0001;
pub const STATE_INCOMPLETE: u32 = 0xFFFF_FFFF;
// magic + version + state + created_at_ns + manifest_len + manifest_checksum + entry_count
pub const HEADER_SIZE: usize = 4 + 4 + 4 + 8 + 4 + 8 + 4;

/// 定长 header（LE）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedHeader {
    pub version: u32,
    pub state: u32,
    pub created_at_ns: u64,
    pub manifest_len: u32,
    pub manifest_checksum: u64,
    pub entry_count: u32,
}

impl FixedHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut h = [0u8; HEADER_SIZE];
        h[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        h[4..8].copy_from_slice(&self.version.to_le_bytes());
        h[8..12].copy_from_slice(&self.state.to_le_bytes());
        h[12..20].copy_from_slice(&self.created_at_ns.to_le_bytes());
        h[20..24].copy_from_slice(&self.manifest_len.to_le_bytes());
        h[24..32].copy_from_slice(&self.manifest_checksum.to_le_bytes());
        h[32..36].copy_from_slice(&self.entry_count.to_le_bytes());
        h
    }

    /// 校验 magic / version / state；任何不一致都整体拒绝
    pub fn decode(data: &[u8]) -> Result<Self, ArchiveError> {
        if data.len() < HEADER_SIZE {
            return Err(ArchiveError::TooSmall(data.len()));
        }
        let magic = read_u32(data, 0);
        if magic != MAGIC {
            return Err(ArchiveError::BadMagic(magic));
        }
        let version = read_u32(data, 4);
        if version != ARCHIVE_VERSION {
            return Err(ArchiveError::VersionMismatch {
                found: version,
                expected: ARCHIVE_VERSION,
            });
        }
        let state = read_u32(data, 8);
        if state != STATE_COMMITTED {
            return Err(ArchiveError::Incomplete);
        }
        Ok(Self {
            version,
            state,
            created_at_ns: read_u64(data, 12),
            manifest_len: read_u32(data, 20),
            manifest_checksum: read_u64(data, 24),
            entry_count: read_u32(data, 32),
        })
    }
}

/// 参与 dump 的 loader（名称 + 冻结指纹 + classpath）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedLoader {
    pub name: String,
    pub fingerprint: ClasspathFingerprint,
    pub classpath: Vec<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedClass {
    pub class_name: String,
    pub loader_name: String,
    pub reason: String,
}

/// 变长 manifest（bincode），紧跟在 header 之后
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub source_classpath: Vec<PathBuf>,
    pub loaders: Vec<ArchivedLoader>,
    pub excluded: Vec<ExcludedClass>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub version: u32,
    pub created_at: SystemTime,
    pub manifest: ArchiveManifest,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub class_name: String,
    pub loader_name: String,
    pub fingerprint: ClasspathFingerprint,
    /// dump 时 class 文件的内容戳
    pub source: SourceStamp,
    pub blob: Vec<u8>,
    pub checksum: u64,
}

/// dump 的内存视图；落盘后只读
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Archive {
    pub header: ArchiveHeader,
    pub entries: Vec<ArchiveEntry>,
}

/// entry 编码：
/// name_len u32 | name | loader_len u32 | loader | fingerprint u64 | source_len u64 | source_digest u64 |
/// checksum u64 | blob_len u32 | blob
pub fn encode_entry(out: &mut Vec<u8>, e: &ArchiveEntry) -> Result<(), ArchiveError> {
    put_bytes(out, e.class_name.as_bytes())?;
    put_bytes(out, e.loader_name.as_bytes())?;
    out.extend_from_slice(&e.fingerprint.raw().to_le_bytes());
    out.extend_from_slice(&e.source.len.to_le_bytes());
    out.extend_from_slice(&e.source.digest.to_le_bytes());
    out.extend_from_slice(&e.checksum.to_le_bytes());
    put_bytes(out, &e.blob)?;
    Ok(())
}

/// 解码出的 entry 位置（blob 以偏移引用 mmap，不拷贝）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryRef {
    pub class_name: String,
    pub loader_name: String,
    pub fingerprint: ClasspathFingerprint,
    pub source: SourceStamp,
    pub checksum: u64,
    pub blob: Range<usize>,
}

/// 顺序读取 entry 表；framing 越界即视为损坏
pub struct EntryReader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> EntryReader<'a> {
    pub fn new(buf: &'a [u8], off: usize) -> Self {
        Self { buf, off }
    }

    pub fn offset(&self) -> usize {
        self.off
    }

    pub fn next_entry(&mut self) -> Result<EntryRef, ArchiveError> {
        let class_name = self.string("class name")?;
        let loader_name = self.string("loader name")?;
        let fingerprint = ClasspathFingerprint::from_raw(self.u64("fingerprint")?);
        let source = SourceStamp {
            len: self.u64("source length")?,
            digest: self.u64("source digest")?,
        };
        let checksum = self.u64("checksum")?;
        let blob = self.span("blob")?;
        Ok(EntryRef {
            class_name,
            loader_name,
            fingerprint,
            source,
            checksum,
            blob,
        })
    }

    fn take(&mut self, n: usize, what: &str) -> Result<Range<usize>, ArchiveError> {
        let end = self
            .off
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| ArchiveError::Corrupt(format!("truncated {what} at offset {}", self.off)))?;
        let r = self.off..end;
        self.off = end;
        Ok(r)
    }

    fn u32(&mut self, what: &str) -> Result<u32, ArchiveError> {
        let r = self.take(4, what)?;
        Ok(read_u32(self.buf, r.start))
    }

    fn u64(&mut self, what: &str) -> Result<u64, ArchiveError> {
        let r = self.take(8, what)?;
        Ok(read_u64(self.buf, r.start))
    }

    fn span(&mut self, what: &str) -> Result<Range<usize>, ArchiveError> {
        let len = self.u32(what)? as usize;
        self.take(len, what)
    }

    fn string(&mut self, what: &str) -> Result<String, ArchiveError> {
        let r = self.span(what)?;
        String::from_utf8(self.buf[r].to_vec())
            .map_err(|_| ArchiveError::Corrupt(format!("{what} is not utf-8")))
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), ArchiveError> {
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| ArchiveError::Corrupt(format!("field too large ({} bytes)", bytes.len())))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_u32(data: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[off..off + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(data: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[off..off + 8]);
    u64::from_le_bytes(b)
}

pub fn system_time_to_ns(ts: SystemTime) -> u64 {
    ts.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

pub fn ns_to_system_time(ns: u64) -> SystemTime {
    std::time::UNIX_EPOCH + std::time::Duration::from_nanos(ns)
}
