use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::archive::{Archive, ArchiveWriter, MappedArchive};
use crate::config::CdsConfig;
use crate::core::{
    CafebabeParser, ClassBytes, ClassFileParser, ClassLoaderLike, ClassMetadata, ClassSource,
    ClassVerifier, LoaderId, SourceStamp, StructuralVerifier,
};
use crate::error::{ArchiveError, DumpError, LoadError, RegistryError};
use crate::registry::{LoaderRecord, LoaderRegistry};
use crate::resolve::{ArchiveResolver, EagerTrigger, Outcome};
use crate::stats::{CdsReport, CdsStats};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassOrigin {
    /// 来自 archive，未重新解析 / 校验
    Shared,
    /// 正常解析 + 校验
    Parsed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedClass {
    pub metadata: ClassMetadata,
    pub origin: ClassOrigin,
    pub loader: LoaderId,
}

impl fmt::Display for LoadedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.metadata, f)
    }
}

/// 共享 class 数据的运行时入口。
///
/// - run 模式：启动时挂载 archive，`load_class` 先经 EagerTrigger 尝试复用。
/// - dump 模式：不查 archive，所有经由已注册 loader 定义的 class 交给 ArchiveWriter。
pub struct SharedRuntime {
    registry: Arc<LoaderRegistry>,
    resolver: Arc<ArchiveResolver>,
    trigger: EagerTrigger,
    parser: Box<dyn ClassFileParser>,
    verifier: Box<dyn ClassVerifier>,
    writer: Option<ArchiveWriter>,
    stats: Arc<CdsStats>,
    version_warned: AtomicBool,
}

impl SharedRuntime {
    /// run 模式；若配置了 archive_path 则立即尝试挂载（失败仅告警）
    pub fn new(config: &CdsConfig) -> Self {
        let rt = Self::build(config.eager, None);
        if let Some(path) = &config.archive_path {
            rt.map_archive(path);
        }
        rt
    }

    pub fn for_dump(config: &CdsConfig) -> Self {
        Self::build(false, Some(ArchiveWriter::new(config.dump_config())))
    }

    fn build(eager: bool, writer: Option<ArchiveWriter>) -> Self {
        let registry = Arc::new(LoaderRegistry::new());
        let stats = Arc::new(CdsStats::default());
        let resolver = Arc::new(ArchiveResolver::new(registry.clone(), stats.clone()));
        Self {
            registry,
            trigger: EagerTrigger::new(eager, resolver.clone()),
            resolver,
            parser: Box::new(CafebabeParser),
            verifier: Box::new(StructuralVerifier),
            writer,
            stats,
            version_warned: AtomicBool::new(false),
        }
    }

    pub fn with_parser(mut self, parser: Box<dyn ClassFileParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn registry(&self) -> &Arc<LoaderRegistry> {
        &self.registry
    }

    /// 挂载 archive。版本不符 / 损坏时整体忽略并告警（版本告警只发一次），返回是否挂载成功
    pub fn map_archive(&self, path: &Path) -> bool {
        match MappedArchive::open(path) {
            Ok(archive) => {
                self.resolver.install(Arc::new(archive));
                true
            }
            Err(ArchiveError::VersionMismatch { found, expected }) => {
                if !self.version_warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "Ignoring archive {:?}: version {} does not match runtime version {}",
                        path,
                        found,
                        expected
                    );
                }
                false
            }
            Err(e) => {
                tracing::warn!("Ignoring archive {:?}: {}", path, e);
                false
            }
        }
    }

    pub fn register_class_loader(
        &self,
        loader: &Arc<dyn ClassLoaderLike>,
        name: &str,
    ) -> Result<Arc<LoaderRecord>, RegistryError> {
        self.registry.register(loader, name)
    }

    /// “经由 loader 按名加载 class”。archive 相关的任何失败都降级为正常加载。
    ///
    /// class 字节总是先读出来：archive 只有在内容戳与当前字节一致时才被采用。
    pub fn load_class(
        &self,
        loader: &Arc<dyn ClassLoaderLike>,
        class_name: &str,
    ) -> Result<LoadedClass, LoadError> {
        let class = loader
            .read_class_bytes(class_name)?
            .ok_or_else(|| LoadError::NotFound {
                class_name: class_name.to_string(),
                loader: loader.identify(),
            })?;

        match self
            .trigger
            .on_define(loader.as_ref(), class_name, SourceStamp::of(&class.bytes))
        {
            Outcome::Hit(metadata) => {
                return Ok(LoadedClass {
                    metadata,
                    origin: ClassOrigin::Shared,
                    loader: loader.identify(),
                })
            }
            Outcome::Miss | Outcome::Invalidated => {}
        }

        self.define(loader.as_ref(), class_name, class)
    }

    /// 定义运行时生成的 class（没有稳定源字节，dump 时会被排除）
    pub fn define_generated(
        &self,
        loader: &Arc<dyn ClassLoaderLike>,
        class_name: &str,
        bytes: Vec<u8>,
    ) -> Result<LoadedClass, LoadError> {
        self.define(
            loader.as_ref(),
            class_name,
            ClassBytes {
                bytes,
                source: ClassSource::Generated,
            },
        )
    }

    fn define(
        &self,
        loader: &dyn ClassLoaderLike,
        class_name: &str,
        class: ClassBytes,
    ) -> Result<LoadedClass, LoadError> {
        let metadata = match self.parse_and_verify(class_name, &class.bytes) {
            Ok(metadata) => metadata,
            Err(e) => {
                // dump 运行中被拒绝的 class 计入排除数
                if let Some((writer, record)) = self.dump_target(loader) {
                    writer.record_excluded(
                        class_name,
                        &record.name,
                        format!("rejected at definition: {e}"),
                    );
                }
                return Err(e);
            }
        };
        self.stats.record_normal_load();

        if let Some((writer, record)) = self.dump_target(loader) {
            writer.record_defined(&record, metadata.clone(), class.source);
        }

        Ok(LoadedClass {
            metadata,
            origin: ClassOrigin::Parsed,
            loader: loader.identify(),
        })
    }

    fn parse_and_verify(&self, class_name: &str, bytes: &[u8]) -> Result<ClassMetadata, LoadError> {
        let metadata = self.parser.parse(bytes)?;
        if metadata.name != class_name {
            return Err(LoadError::NameMismatch {
                requested: class_name.to_string(),
                found: metadata.name,
            });
        }
        self.verifier.verify(&metadata)?;
        Ok(metadata)
    }

    /// dump 模式下，已注册 loader 对应的 writer 与记录
    fn dump_target(&self, loader: &dyn ClassLoaderLike) -> Option<(&ArchiveWriter, Arc<LoaderRecord>)> {
        let writer = self.writer.as_ref()?;
        Some((writer, self.registry.lookup(loader)?))
    }

    /// 写出 archive；manifest 包含 dump 时刻所有存活的已注册 loader
    pub fn dump(&self, output: &Path) -> Result<Archive, DumpError> {
        let writer = self.writer.as_ref().ok_or(DumpError::NotDumping)?;
        for record in self.registry.live_records() {
            writer.record_loader(&record);
        }
        writer.dump(output)
    }

    pub fn report(&self) -> CdsReport {
        let (live_loaders, stale_loaders) = self.registry.counts();
        CdsReport {
            resolution: self.stats.snapshot(),
            live_loaders,
            stale_loaders,
            archive_entries: self.resolver.archive().map(|a| a.entry_count()),
            pending_dump: self.writer.as_ref().map(|w| w.pending()),
        }
    }
}
