use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

/// classpath 指纹：对有序 classpath 根做 xxh3（根之间插入 0 分隔，避免拼接歧义）
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClasspathFingerprint(u64);

impl ClasspathFingerprint {
    pub fn of_roots(roots: &[PathBuf]) -> Self {
        let mut h = Xxh3::new();
        for root in roots {
            h.update(root.as_os_str().as_bytes());
            h.update(&[0u8]);
        }
        Self(h.digest())
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClasspathFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// 单个 class 文件的内容戳：长度 + xxh3。
///
/// classpath 指纹只覆盖根路径；同一路径下的 class 被重新编译时，靠它发现 archive 过期。
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceStamp {
    pub len: u64,
    pub digest: u64,
}

impl SourceStamp {
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            len: bytes.len() as u64,
            digest: xxh3_64(bytes),
        }
    }
}

impl fmt::Display for SourceStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}b/{:016x}", self.len, self.digest)
    }
}
