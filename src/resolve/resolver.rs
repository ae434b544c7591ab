use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashSet;

use crate::archive::MappedArchive;
use crate::core::{ClassLoaderLike, ClassMetadata, LoaderId, SourceStamp};
use crate::registry::{LoaderRecord, LoaderRegistry};
use crate::stats::CdsStats;

/// 一次 (loader, class) 解析尝试的终态
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// 复用 archive 中的元数据，跳过解析与校验
    Hit(ClassMetadata),
    /// 走正常加载
    Miss,
    /// archive 相对当前 classpath 或 class 文件已过期；本进程内对该 (loader, class) 不再重试
    Invalidated,
}

/// 运行时 archive 解析器。
///
/// archive 通过 ArcSwap 挂载，读路径无锁；Invalidated 结果按 (loader id, class) 缓存。
/// 任何失败都降级为 Miss，正常加载永远是兜底路径。
pub struct ArchiveResolver {
    registry: Arc<LoaderRegistry>,
    archive: ArcSwapOption<MappedArchive>,
    invalidated: DashSet<(LoaderId, String)>,
    stats: Arc<CdsStats>,
}

impl ArchiveResolver {
    pub fn new(registry: Arc<LoaderRegistry>, stats: Arc<CdsStats>) -> Self {
        Self {
            registry,
            archive: ArcSwapOption::empty(),
            invalidated: DashSet::new(),
            stats,
        }
    }

    pub fn registry(&self) -> &Arc<LoaderRegistry> {
        &self.registry
    }

    /// 挂载（或替换）archive；已缓存的 invalidated 结果随之清空
    pub fn install(&self, archive: Arc<MappedArchive>) {
        self.archive.store(Some(archive));
        self.invalidated.clear();
    }

    pub fn archive(&self) -> Option<Arc<MappedArchive>> {
        self.archive.load_full()
    }

    /// `source` 是本次定义所用 class 字节的内容戳
    pub fn resolve(&self, loader: &dyn ClassLoaderLike, class_name: &str, source: SourceStamp) -> Outcome {
        match self.registry.lookup(loader) {
            Some(record) => self.resolve_record(&record, class_name, source),
            None => {
                self.stats.record_miss();
                Outcome::Miss
            }
        }
    }

    pub fn resolve_record(&self, record: &LoaderRecord, class_name: &str, source: SourceStamp) -> Outcome {
        let key = (record.id, class_name.to_string());
        if self.invalidated.contains(&key) {
            self.stats.record_invalidated(true);
            return Outcome::Invalidated;
        }

        let Some(archive) = self.archive.load_full() else {
            self.stats.record_miss();
            return Outcome::Miss;
        };
        self.stats.record_probe();

        let candidates = archive.candidates(&record.name, class_name);
        if candidates.is_empty() {
            self.stats.record_miss();
            return Outcome::Miss;
        }

        let Some(entry) = candidates.iter().find(|e| e.fingerprint == record.fingerprint) else {
            tracing::debug!(
                "Archive entry for {} in {:?} is stale (fingerprint {} not in archive)",
                class_name,
                record.name,
                record.fingerprint
            );
            self.invalidated.insert(key);
            self.stats.record_invalidated(false);
            return Outcome::Invalidated;
        };

        if entry.source != source {
            tracing::debug!(
                "Archive entry for {} in {:?} is stale (class file {} changed to {})",
                class_name,
                record.name,
                entry.source,
                source
            );
            self.invalidated.insert(key);
            self.stats.record_invalidated(false);
            return Outcome::Invalidated;
        }

        match archive.load_entry(entry) {
            Ok(meta) if meta.name == class_name && meta.source == entry.source => {
                self.stats.record_hit();
                Outcome::Hit(meta)
            }
            Ok(meta) => {
                tracing::debug!(
                    "Archive entry for {} decodes to {} ({}), ignoring",
                    class_name,
                    meta.name,
                    meta.source
                );
                self.stats.record_corrupt();
                self.stats.record_miss();
                Outcome::Miss
            }
            Err(e) => {
                tracing::debug!("Archive entry for {} unusable: {}", class_name, e);
                self.stats.record_corrupt();
                self.stats.record_miss();
                Outcome::Miss
            }
        }
    }
}
