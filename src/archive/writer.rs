use std::collections::BTreeMap;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use rayon::prelude::*;
use wildmatch::WildMatch;
use xxhash_rust::xxh3::xxh3_64;

use crate::archive::format::{
    encode_entry, system_time_to_ns, Archive, ArchiveEntry, ArchiveHeader, ArchiveManifest,
    ArchivedLoader, ExcludedClass, FixedHeader, ARCHIVE_VERSION, HEADER_SIZE, STATE_COMMITTED,
    STATE_INCOMPLETE,
};
use crate::core::{ClassMetadata, ClassSource, ClassVerifier, ClasspathFingerprint, StructuralVerifier};
use crate::error::DumpError;
use crate::registry::LoaderRecord;

#[derive(Clone, Debug)]
pub struct DumpConfig {
    /// 允许的排除数上限；超过则整体失败，不留任何文件
    pub exclusion_threshold: usize,
    /// 类名通配（`com.example.*`），命中即排除
    pub exclude: Vec<String>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            exclusion_threshold: 64,
            exclude: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct EntryKey {
    loader_name: String,
    class_name: String,
    fingerprint: ClasspathFingerprint,
}

struct Candidate {
    metadata: ClassMetadata,
    source: ClassSource,
}

/// Dump 阶段的 archive 写入器。
///
/// 运行期间收集经由已注册 loader 定义的 class，`dump` 时一次性落盘。
///
/// 落盘流程（与快照同款原子替换）：
/// 1) 写 `<path>.tmp` 的 INCOMPLETE header（manifest 长度/校验先置 0）
/// 2) 顺序写 manifest 与 entry 表
/// 3) seek 回开头覆盖 COMMITTED header
/// 4) fsync(tmpfile)
/// 5) rename(tmp, target)
/// 6) fsync(dir)
///
/// 任一步失败都删除 tmp，target 保持原状。
pub struct ArchiveWriter {
    config: DumpConfig,
    patterns: Vec<WildMatch>,
    verifier: Box<dyn ClassVerifier>,
    candidates: Mutex<BTreeMap<EntryKey, Candidate>>,
    // 同名 loader 可能先后对应不同 classpath（stale 名称被接管），按 (name, fingerprint) 区分
    loaders: Mutex<BTreeMap<(String, ClasspathFingerprint), ArchivedLoader>>,
    excluded: Mutex<Vec<ExcludedClass>>,
}

impl ArchiveWriter {
    pub fn new(config: DumpConfig) -> Self {
        Self::with_verifier(config, Box::new(StructuralVerifier))
    }

    pub fn with_verifier(config: DumpConfig, verifier: Box<dyn ClassVerifier>) -> Self {
        let patterns = config.exclude.iter().map(|p| WildMatch::new(p)).collect();
        Self {
            config,
            patterns,
            verifier,
            candidates: Mutex::new(BTreeMap::new()),
            loaders: Mutex::new(BTreeMap::new()),
            excluded: Mutex::new(Vec::new()),
        }
    }

    /// 把 loader 写进 manifest（即使它名下没有 class）
    pub fn record_loader(&self, record: &LoaderRecord) {
        self.loaders
            .lock()
            .entry((record.name.clone(), record.fingerprint))
            .or_insert_with(|| ArchivedLoader {
                name: record.name.clone(),
                fingerprint: record.fingerprint,
                classpath: record.classpath.clone(),
            });
    }

    /// 记录一次成功定义；同一 key 只保留第一次
    pub fn record_defined(&self, record: &LoaderRecord, metadata: ClassMetadata, source: ClassSource) {
        self.record_loader(record);

        let key = EntryKey {
            loader_name: record.name.clone(),
            class_name: metadata.name.clone(),
            fingerprint: record.fingerprint,
        };
        let mut candidates = self.candidates.lock();
        if candidates.contains_key(&key) {
            tracing::debug!("Dump: {} already recorded for {:?}", key.class_name, key.loader_name);
            return;
        }
        candidates.insert(key, Candidate { metadata, source });
    }

    pub fn record_excluded(&self, class_name: &str, loader_name: &str, reason: impl Into<String>) {
        self.excluded.lock().push(ExcludedClass {
            class_name: class_name.to_string(),
            loader_name: loader_name.to_string(),
            reason: reason.into(),
        });
    }

    pub fn pending(&self) -> usize {
        self.candidates.lock().len()
    }

    pub fn dump(&self, output: &Path) -> Result<Archive, DumpError> {
        let mut excluded = self.excluded.lock().clone();
        let mut accepted: Vec<(EntryKey, ClassMetadata)> = Vec::new();

        for (key, cand) in self.candidates.lock().iter() {
            let reason = if cand.source == ClassSource::Generated {
                Some("generated class has no stable source bytes".to_string())
            } else if self.patterns.iter().any(|p| p.matches(&key.class_name)) {
                Some("matched exclusion pattern".to_string())
            } else {
                self.verifier
                    .verify(&cand.metadata)
                    .err()
                    .map(|e| format!("verification failed: {e}"))
            };
            match reason {
                Some(reason) => excluded.push(ExcludedClass {
                    class_name: key.class_name.clone(),
                    loader_name: key.loader_name.clone(),
                    reason,
                }),
                None => accepted.push((key.clone(), cand.metadata.clone())),
            }
        }

        if excluded.len() > self.config.exclusion_threshold {
            tracing::warn!(
                "Dump aborted: {} classes excluded (threshold {})",
                excluded.len(),
                self.config.exclusion_threshold
            );
            return Err(DumpError::TooManyExclusions {
                excluded: excluded.len(),
                threshold: self.config.exclusion_threshold,
            });
        }
        for ex in &excluded {
            tracing::debug!("Dump: excluded {} ({}): {}", ex.class_name, ex.loader_name, ex.reason);
        }

        let entries: Vec<ArchiveEntry> = accepted
            .into_par_iter()
            .map(|(key, meta)| -> Result<ArchiveEntry, DumpError> {
                let blob = meta.to_blob()?;
                Ok(ArchiveEntry {
                    checksum: xxh3_64(&blob),
                    class_name: key.class_name,
                    loader_name: key.loader_name,
                    fingerprint: key.fingerprint,
                    source: meta.source,
                    blob,
                })
            })
            .collect::<Result<_, DumpError>>()?;

        let loaders: Vec<ArchivedLoader> = self.loaders.lock().values().cloned().collect();
        let mut source_classpath: Vec<PathBuf> = Vec::new();
        for l in &loaders {
            for root in &l.classpath {
                if !source_classpath.contains(root) {
                    source_classpath.push(root.clone());
                }
            }
        }

        let archive = Archive {
            header: ArchiveHeader {
                version: ARCHIVE_VERSION,
                created_at: SystemTime::now(),
                manifest: ArchiveManifest {
                    source_classpath,
                    loaders,
                    excluded,
                },
            },
            entries,
        };

        let tmp_path = tmp_path_for(output);
        match write_atomic(output, &tmp_path, &archive) {
            Ok(bytes) => {
                tracing::info!(
                    "Archive written: {} classes, {} excluded, {} bytes -> {:?}",
                    archive.entries.len(),
                    archive.header.manifest.excluded.len(),
                    bytes,
                    output
                );
                Ok(archive)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                Err(e)
            }
        }
    }
}

fn tmp_path_for(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    output.with_file_name(name)
}

fn write_atomic(output: &Path, tmp_path: &Path, archive: &Archive) -> Result<u64, DumpError> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manifest = bincode::serialize(&archive.header.manifest)?;
    let manifest_len: u32 = manifest
        .len()
        .try_into()
        .map_err(|_| DumpError::TooLarge("manifest"))?;
    let entry_count: u32 = archive
        .entries
        .len()
        .try_into()
        .map_err(|_| DumpError::TooLarge("entry table"))?;

    let mut header = FixedHeader {
        version: ARCHIVE_VERSION,
        state: STATE_INCOMPLETE,
        created_at_ns: system_time_to_ns(archive.header.created_at),
        manifest_len: 0,
        manifest_checksum: 0,
        entry_count: 0,
    };

    // 1) INCOMPLETE header + 2) manifest / entries
    let file = std::fs::File::create(tmp_path)?;
    let mut w = BufWriter::new(file);
    w.write_all(&header.encode())?;
    w.write_all(&manifest)?;
    let mut written = (HEADER_SIZE + manifest.len()) as u64;
    let mut buf = Vec::new();
    for e in &archive.entries {
        buf.clear();
        encode_entry(&mut buf, e).map_err(|_| DumpError::TooLarge("entry"))?;
        w.write_all(&buf)?;
        written += buf.len() as u64;
    }
    let mut file = w.into_inner().map_err(|e| e.into_error())?;

    // 3) COMMITTED header
    header.state = STATE_COMMITTED;
    header.manifest_len = manifest_len;
    header.manifest_checksum = xxh3_64(&manifest);
    header.entry_count = entry_count;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.encode())?;

    // 4) fsync
    file.sync_all()?;
    drop(file);

    // 5) rename 原子替换
    std::fs::rename(tmp_path, output)?;

    // 6) fsync(dir)
    if let Some(parent) = output.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CafebabeParser, ClassFileParser, LoaderId};
    use crate::testutil::{simple_class, unique_tmp_dir, ClassFileBuilder};

    fn record(name: &str, root: PathBuf) -> LoaderRecord {
        let classpath = vec![root];
        LoaderRecord {
            id: LoaderId::APP,
            name: name.to_string(),
            fingerprint: ClasspathFingerprint::of_roots(&classpath),
            classpath,
            parent: LoaderId::APP,
        }
    }

    fn parsed(internal: &str) -> ClassMetadata {
        CafebabeParser.parse(&simple_class(internal)).unwrap()
    }

    #[test]
    fn dump_writes_entries_and_records_exclusions() {
        let dir = unique_tmp_dir("writer-basic");
        let out = dir.join("app.jsa");
        let rec = record("L", dir.clone());

        let writer = ArchiveWriter::new(DumpConfig::default());
        writer.record_defined(&rec, parsed("p/A"), ClassSource::File(dir.join("p/A.class")));
        writer.record_defined(&rec, parsed("p/A"), ClassSource::File(dir.join("p/A.class")));
        writer.record_defined(&rec, parsed("p/Gen$1"), ClassSource::Generated);
        assert_eq!(writer.pending(), 2);

        let archive = writer.dump(&out).unwrap();
        assert_eq!(archive.entries.len(), 1);
        assert_eq!(archive.entries[0].class_name, "p.A");
        assert_eq!(archive.entries[0].loader_name, "L");
        assert_eq!(archive.entries[0].checksum, xxh3_64(&archive.entries[0].blob));
        assert_eq!(archive.header.manifest.excluded.len(), 1);
        assert_eq!(archive.header.manifest.excluded[0].class_name, "p.Gen$1");
        assert_eq!(archive.header.manifest.loaders[0].fingerprint, rec.fingerprint);
        assert_eq!(archive.header.manifest.source_classpath, vec![dir.clone()]);

        assert_eq!(archive.entries[0].source, parsed("p/A").source);

        assert!(out.exists());
        assert!(!tmp_path_for(&out).exists());
    }

    #[test]
    fn manifest_keeps_each_classpath_of_a_reused_name() {
        let dir = unique_tmp_dir("writer-reused-name");
        let out = dir.join("app.jsa");
        let old = record("L", dir.join("old"));
        let new = record("L", dir.join("new"));
        let idle = record("Idle", dir.join("idle"));

        let writer = ArchiveWriter::new(DumpConfig::default());
        writer.record_defined(&old, parsed("p/A"), ClassSource::File(dir.join("old/p/A.class")));
        writer.record_defined(&new, parsed("p/B"), ClassSource::File(dir.join("new/p/B.class")));
        writer.record_loader(&idle);
        writer.record_loader(&new);

        let archive = writer.dump(&out).unwrap();
        let loaders = &archive.header.manifest.loaders;
        assert_eq!(loaders.len(), 3);
        for e in &archive.entries {
            assert!(loaders
                .iter()
                .any(|l| l.name == e.loader_name && l.fingerprint == e.fingerprint));
        }
        assert!(loaders.iter().any(|l| l.name == "Idle"));
    }

    #[test]
    fn too_many_exclusions_leaves_nothing_on_disk() {
        let dir = unique_tmp_dir("writer-threshold");
        let out = dir.join("app.jsa");
        let rec = record("L", dir.clone());

        let writer = ArchiveWriter::new(DumpConfig {
            exclusion_threshold: 1,
            exclude: vec!["p.Skip*".into()],
        });
        writer.record_defined(&rec, parsed("p/Keep"), ClassSource::File(dir.join("p/Keep.class")));
        writer.record_defined(&rec, parsed("p/SkipOne"), ClassSource::File(dir.join("x")));
        writer.record_defined(&rec, parsed("p/SkipTwo"), ClassSource::File(dir.join("y")));

        let err = writer.dump(&out).unwrap_err();
        assert!(matches!(
            err,
            DumpError::TooManyExclusions { excluded: 2, threshold: 1 }
        ));
        assert!(!out.exists());
        assert!(!tmp_path_for(&out).exists());
    }

    #[test]
    fn unverifiable_class_is_excluded_not_fatal() {
        let dir = unique_tmp_dir("writer-verify");
        let out = dir.join("app.jsa");
        let rec = record("L", dir.clone());

        let bad = ClassFileBuilder::new("p/Bad")
            .method(0x0101, "run", "()V")
            .method(0x0101, "run", "()V")
            .build();
        let writer = ArchiveWriter::new(DumpConfig::default());
        writer.record_defined(&rec, CafebabeParser.parse(&bad).unwrap(), ClassSource::File(dir.join("b")));
        writer.record_defined(&rec, parsed("p/Good"), ClassSource::File(dir.join("g")));

        let archive = writer.dump(&out).unwrap();
        assert_eq!(archive.entries.len(), 1);
        let ex = &archive.header.manifest.excluded[0];
        assert_eq!(ex.class_name, "p.Bad");
        assert!(ex.reason.starts_with("verification failed"));
    }
}
