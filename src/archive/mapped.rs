use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use memmap2::Mmap;
use xxhash_rust::xxh3::xxh3_64;

use crate::archive::format::{
    ns_to_system_time, ArchiveManifest, EntryRef, EntryReader, FixedHeader, HEADER_SIZE,
};
use crate::core::{ClassMetadata, ClasspathFingerprint};
use crate::error::ArchiveError;

/// 只读映射的 archive。
///
/// 打开时一次性校验 header / manifest 并扫描 entry 表建立索引（framing 错误整体拒绝）；
/// 之后的查找只是一次哈希探测加一段 mmap 切片，blob 的 checksum 在取用时才校验。
pub struct MappedArchive {
    path: PathBuf,
    mmap: Mmap,
    header: FixedHeader,
    manifest: ArchiveManifest,
    // loader_name -> class_name -> 不同指纹下的 entry；两级都可直接用 &str 查
    index: HashMap<String, HashMap<String, Vec<EntryRef>>>,
}

impl MappedArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // 只读映射；archive 生成后不再被修改
        let mmap = unsafe { Mmap::map(&file)? };

        let header = FixedHeader::decode(&mmap)?;

        let manifest_end = HEADER_SIZE
            .checked_add(header.manifest_len as usize)
            .filter(|end| *end <= mmap.len())
            .ok_or_else(|| ArchiveError::Corrupt("manifest exceeds file".into()))?;
        let manifest_bytes = &mmap[HEADER_SIZE..manifest_end];
        if xxh3_64(manifest_bytes) != header.manifest_checksum {
            return Err(ArchiveError::Corrupt("manifest checksum mismatch".into()));
        }
        let manifest: ArchiveManifest = bincode::deserialize(manifest_bytes)?;

        let mut index: HashMap<String, HashMap<String, Vec<EntryRef>>> = HashMap::new();
        let mut reader = EntryReader::new(&mmap, manifest_end);
        for _ in 0..header.entry_count {
            let e = reader.next_entry()?;
            index
                .entry(e.loader_name.clone())
                .or_default()
                .entry(e.class_name.clone())
                .or_default()
                .push(e);
        }
        if reader.offset() != mmap.len() {
            return Err(ArchiveError::Corrupt(format!(
                "{} trailing bytes after entry table",
                mmap.len() - reader.offset()
            )));
        }

        tracing::info!(
            "Mapped archive {:?}: {} entries, {} loaders",
            path,
            header.entry_count,
            manifest.loaders.len()
        );

        Ok(Self {
            path,
            mmap,
            header,
            manifest,
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn created_at(&self) -> SystemTime {
        ns_to_system_time(self.header.created_at_ns)
    }

    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    pub fn entry_count(&self) -> usize {
        self.header.entry_count as usize
    }

    /// 某 loader 名下某 class 的所有候选 entry（按指纹区分）
    pub fn candidates(&self, loader_name: &str, class_name: &str) -> &[EntryRef] {
        self.index
            .get(loader_name)
            .and_then(|classes| classes.get(class_name))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn find(
        &self,
        loader_name: &str,
        class_name: &str,
        fingerprint: ClasspathFingerprint,
    ) -> Option<&EntryRef> {
        self.candidates(loader_name, class_name)
            .iter()
            .find(|e| e.fingerprint == fingerprint)
    }

    pub fn blob(&self, entry: &EntryRef) -> &[u8] {
        &self.mmap[entry.blob.clone()]
    }

    /// 校验 checksum 后反序列化
    pub fn load_entry(&self, entry: &EntryRef) -> Result<ClassMetadata, ArchiveError> {
        let blob = self.blob(entry);
        if xxh3_64(blob) != entry.checksum {
            return Err(ArchiveError::ChecksumMismatch {
                class_name: entry.class_name.clone(),
            });
        }
        Ok(ClassMetadata::from_blob(blob)?)
    }

    /// 按 (loader, class) 排序的全部 entry
    pub fn entries(&self) -> Vec<&EntryRef> {
        let mut out: Vec<&EntryRef> = self
            .index
            .values()
            .flat_map(|classes| classes.values().flatten())
            .collect();
        out.sort_by(|a, b| {
            (&a.loader_name, &a.class_name, a.fingerprint).cmp(&(&b.loader_name, &b.class_name, b.fingerprint))
        });
        out
    }
}
