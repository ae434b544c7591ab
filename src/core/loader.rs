use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Loader 的稳定整数标识（进程内不复用）
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoaderId(u64);

impl LoaderId {
    /// bootstrap 标记：也用作没有显式父 loader 时的 parent
    pub const BOOTSTRAP: LoaderId = LoaderId(0);
    pub const PLATFORM: LoaderId = LoaderId(1);
    pub const APP: LoaderId = LoaderId(2);

    const FIRST_CUSTOM: u64 = 3;

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_builtin(self) -> bool {
        self.0 < Self::FIRST_CUSTOM
    }
}

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match BuiltinLoader::from_id(*self) {
            Some(b) => write!(f, "loader#{}({})", self.0, b.name()),
            None => write!(f, "loader#{}", self.0),
        }
    }
}

/// 内置 loader：通过固定记录识别，不经过注册表
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinLoader {
    Boot,
    Platform,
    App,
}

impl BuiltinLoader {
    pub const ALL: [BuiltinLoader; 3] = [BuiltinLoader::Boot, BuiltinLoader::Platform, BuiltinLoader::App];

    pub fn id(self) -> LoaderId {
        match self {
            BuiltinLoader::Boot => LoaderId::BOOTSTRAP,
            BuiltinLoader::Platform => LoaderId::PLATFORM,
            BuiltinLoader::App => LoaderId::APP,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinLoader::Boot => "boot",
            BuiltinLoader::Platform => "platform",
            BuiltinLoader::App => "app",
        }
    }

    pub fn from_id(id: LoaderId) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.id() == id)
    }

    pub fn is_reserved_name(name: &str) -> bool {
        Self::ALL.iter().any(|b| b.name() == name)
    }
}

/// LoaderId 分配器：单调递增，跳过内置保留段
pub struct LoaderArena {
    next: AtomicU64,
}

impl LoaderArena {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(LoaderId::FIRST_CUSTOM),
        }
    }

    pub fn allocate(&self) -> LoaderId {
        LoaderId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for LoaderArena {
    fn default() -> Self {
        Self::new()
    }
}

/// class 字节的来源；Generated 表示运行时生成、没有稳定源字节
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassSource {
    File(PathBuf),
    Generated,
}

#[derive(Clone, Debug)]
pub struct ClassBytes {
    pub bytes: Vec<u8>,
    pub source: ClassSource,
}

/// 任何“可以当 classloader 用”的实体都实现这个能力接口。
///
/// ## 契约
/// - `identify` 在对象存活期间必须稳定，且不同存活对象互不相同（由同一个 [`LoaderArena`] 分配）。
/// - 注册表与 resolver 只依赖 `identify` / `classpath_roots`；`read_class_bytes` 只被正常加载路径使用。
pub trait ClassLoaderLike: Send + Sync {
    fn identify(&self) -> LoaderId;

    /// 有序 classpath 根目录
    fn classpath_roots(&self) -> Vec<PathBuf>;

    fn parent(&self) -> LoaderId {
        LoaderId::BOOTSTRAP
    }

    /// 默认实现：按顺序在目录根下查找 `a/b/C.class`，先到先得；非法类名视为找不到
    fn read_class_bytes(&self, class_name: &str) -> std::io::Result<Option<ClassBytes>> {
        let Some(rel) = class_file_relpath(class_name) else {
            return Ok(None);
        };
        for root in self.classpath_roots() {
            let path = root.join(&rel);
            match std::fs::read(&path) {
                Ok(bytes) => {
                    return Ok(Some(ClassBytes {
                        bytes,
                        source: ClassSource::File(path),
                    }))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

/// `a.b.C` -> `a/b/C.class`。
///
/// 空段（`..a`、`a.`）或含路径分隔符的名字不是合法二进制名，返回 None，
/// 保证结果始终是 classpath 根下的相对路径。
pub fn class_file_relpath(class_name: &str) -> Option<PathBuf> {
    let valid = class_name
        .split('.')
        .all(|seg| !seg.is_empty() && !seg.contains(['/', '\\', '\0']));
    if !valid {
        return None;
    }
    let mut rel = class_name.replace('.', "/");
    rel.push_str(".class");
    Some(PathBuf::from(rel))
}

/// 目录 classpath 的自定义 loader（类 URLClassLoader，仅支持目录根）
pub struct DirClassLoader {
    id: LoaderId,
    parent: LoaderId,
    roots: RwLock<Vec<PathBuf>>,
}

impl DirClassLoader {
    pub fn new(arena: &LoaderArena, roots: Vec<PathBuf>, parent: LoaderId) -> Arc<Self> {
        Arc::new(Self {
            id: arena.allocate(),
            parent,
            roots: RwLock::new(roots),
        })
    }

    /// 追加 classpath 根；已注册的指纹不会随之改变
    pub fn add_root(&self, root: PathBuf) {
        self.roots.write().push(root);
    }
}

impl ClassLoaderLike for DirClassLoader {
    fn identify(&self) -> LoaderId {
        self.id
    }

    fn classpath_roots(&self) -> Vec<PathBuf> {
        self.roots.read().clone()
    }

    fn parent(&self) -> LoaderId {
        self.parent
    }
}
