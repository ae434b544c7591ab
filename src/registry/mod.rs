use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use unicode_normalization::UnicodeNormalization;

use crate::core::{BuiltinLoader, ClassLoaderLike, ClasspathFingerprint, LoaderId};
use crate::error::RegistryError;

/// 已注册 loader 的身份记录（注册时冻结 classpath 与指纹）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderRecord {
    pub id: LoaderId,
    pub name: String,
    pub fingerprint: ClasspathFingerprint,
    pub classpath: Vec<PathBuf>,
    pub parent: LoaderId,
}

struct Slot {
    record: Arc<LoaderRecord>,
    // 非拥有引用：loader 的生命周期归应用所有
    loader: Weak<dyn ClassLoaderLike>,
}

impl Slot {
    fn is_live(&self) -> bool {
        self.loader.strong_count() > 0
    }
}

#[derive(Default)]
struct Tables {
    by_id: HashMap<LoaderId, Slot>,
    by_name: HashMap<String, LoaderId>,
}

/// Loader 身份注册表：进程级状态，但显式构造、通过 `Arc` 注入。
///
/// ## 契约
/// - 名称在“当前存活”的 loader 之间唯一；同名竞争由同一把写锁线性化，恰好一个成功。
/// - 同一 loader 以同名重复注册是幂等的；以不同名重复注册一律失败（原记录不变）。
/// - loader 被 drop 后记录变为 stale：不再匹配任何查询，名称可被新 loader 占用；
///   stale 记录本身不回收（id 不复用，按 id 比较仍然成立）。
#[derive(Default)]
pub struct LoaderRegistry {
    tables: RwLock<Tables>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        loader: &Arc<dyn ClassLoaderLike>,
        desired_name: &str,
    ) -> Result<Arc<LoaderRecord>, RegistryError> {
        let id = loader.identify();
        if id.is_builtin() {
            return Err(RegistryError::BuiltinLoader(id));
        }
        let name = normalize_name(desired_name)?;

        let mut t = self.tables.write();

        if let Some(slot) = t.by_id.get(&id).filter(|s| s.is_live()) {
            if slot.record.name == name {
                return Ok(slot.record.clone());
            }
            return Err(RegistryError::AlreadyRegistered {
                loader: id,
                existing: slot.record.name.clone(),
                requested: name,
            });
        }

        if let Some(&holder) = t.by_name.get(&name) {
            let holder_live = t.by_id.get(&holder).is_some_and(Slot::is_live);
            if holder != id && holder_live {
                return Err(RegistryError::DuplicateName { name, holder });
            }
        }

        let classpath = loader.classpath_roots();
        let record = Arc::new(LoaderRecord {
            id,
            name: name.clone(),
            fingerprint: ClasspathFingerprint::of_roots(&classpath),
            classpath,
            parent: loader.parent(),
        });
        t.by_name.insert(name, id);
        t.by_id.insert(
            id,
            Slot {
                record: record.clone(),
                loader: Arc::downgrade(loader),
            },
        );

        tracing::debug!(
            "Registered {} as {:?} (fingerprint {})",
            id,
            record.name,
            record.fingerprint
        );
        Ok(record)
    }

    /// 未注册 / 内置 / 已失效的 loader 都返回 None
    pub fn lookup(&self, loader: &dyn ClassLoaderLike) -> Option<Arc<LoaderRecord>> {
        self.lookup_id(loader.identify())
    }

    pub fn lookup_id(&self, id: LoaderId) -> Option<Arc<LoaderRecord>> {
        let t = self.tables.read();
        t.by_id
            .get(&id)
            .filter(|s| s.is_live())
            .map(|s| s.record.clone())
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<LoaderRecord>> {
        let name: String = name.nfc().collect();
        let t = self.tables.read();
        let id = t.by_name.get(&name)?;
        t.by_id
            .get(id)
            .filter(|s| s.is_live())
            .map(|s| s.record.clone())
    }

    /// 注册时冻结的指纹
    pub fn fingerprint(&self, loader: &dyn ClassLoaderLike) -> Option<ClasspathFingerprint> {
        self.lookup(loader).map(|r| r.fingerprint)
    }

    /// 内置 loader 的固定记录（始终存在，不经过注册表）
    pub fn builtin(&self, id: LoaderId) -> Option<LoaderRecord> {
        let b = BuiltinLoader::from_id(id)?;
        Some(LoaderRecord {
            id,
            name: b.name().to_string(),
            fingerprint: ClasspathFingerprint::of_roots(&[]),
            classpath: Vec::new(),
            parent: LoaderId::BOOTSTRAP,
        })
    }

    /// 存活记录快照（按 id 排序）
    pub fn live_records(&self) -> Vec<Arc<LoaderRecord>> {
        let t = self.tables.read();
        let mut out: Vec<_> = t
            .by_id
            .values()
            .filter(|s| s.is_live())
            .map(|s| s.record.clone())
            .collect();
        out.sort_by_key(|r| r.id);
        out
    }

    /// (live, stale)
    pub fn counts(&self) -> (usize, usize) {
        let t = self.tables.read();
        let live = t.by_id.values().filter(|s| s.is_live()).count();
        (live, t.by_id.len() - live)
    }
}

fn normalize_name(desired: &str) -> Result<String, RegistryError> {
    let name: String = desired.nfc().collect();
    if name.is_empty() {
        return Err(RegistryError::InvalidName);
    }
    if BuiltinLoader::is_reserved_name(&name) {
        return Err(RegistryError::ReservedName(name));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DirClassLoader, LoaderArena};
    use std::sync::Barrier;

    fn loader(arena: &LoaderArena, root: &str) -> Arc<dyn ClassLoaderLike> {
        DirClassLoader::new(arena, vec![PathBuf::from(root)], LoaderId::APP)
    }

    #[test]
    fn second_loader_with_same_name_is_rejected() {
        let arena = LoaderArena::new();
        let reg = LoaderRegistry::new();
        let a = loader(&arena, "/cp/a");
        let b = loader(&arena, "/cp/b");

        let rec_a = reg.register(&a, "myURLClassLoader").unwrap();
        let err = reg.register(&b, "myURLClassLoader").unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateName {
                name: "myURLClassLoader".into(),
                holder: a.identify(),
            }
        );
        assert_eq!(reg.lookup(a.as_ref()), Some(rec_a));
        assert!(reg.lookup(b.as_ref()).is_none());
    }

    #[test]
    fn reregistering_same_name_is_idempotent() {
        let arena = LoaderArena::new();
        let reg = LoaderRegistry::new();
        let a = loader(&arena, "/cp/a");
        let first = reg.register(&a, "L").unwrap();
        let second = reg.register(&a, "L").unwrap();
        assert_eq!(first, second);
        assert_eq!(reg.counts(), (1, 0));
    }

    #[test]
    fn reregistering_under_another_name_fails_and_keeps_record() {
        let arena = LoaderArena::new();
        let reg = LoaderRegistry::new();
        let a = loader(&arena, "/cp/a");
        let original = reg.register(&a, "first").unwrap();

        let err = reg.register(&a, "second").unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered { ref existing, .. } if existing == "first"));
        assert_eq!(reg.lookup(a.as_ref()), Some(original));
        assert!(reg.lookup_by_name("second").is_none());
    }

    #[test]
    fn builtin_loaders_and_names_are_not_registrable() {
        struct Builtin;
        impl ClassLoaderLike for Builtin {
            fn identify(&self) -> LoaderId {
                LoaderId::APP
            }
            fn classpath_roots(&self) -> Vec<PathBuf> {
                Vec::new()
            }
        }

        let arena = LoaderArena::new();
        let reg = LoaderRegistry::new();
        let app: Arc<dyn ClassLoaderLike> = Arc::new(Builtin);
        assert_eq!(
            reg.register(&app, "anything"),
            Err(RegistryError::BuiltinLoader(LoaderId::APP))
        );
        assert!(reg.lookup(app.as_ref()).is_none());
        assert_eq!(reg.builtin(LoaderId::APP).unwrap().name, "app");

        let a = loader(&arena, "/cp/a");
        assert_eq!(reg.register(&a, "platform"), Err(RegistryError::ReservedName("platform".into())));
        assert_eq!(reg.register(&a, ""), Err(RegistryError::InvalidName));
    }

    #[test]
    fn names_compare_after_nfc() {
        let arena = LoaderArena::new();
        let reg = LoaderRegistry::new();
        let a = loader(&arena, "/cp/a");
        let b = loader(&arena, "/cp/b");
        reg.register(&a, "caf\u{e9}").unwrap();
        assert!(matches!(
            reg.register(&b, "cafe\u{301}"),
            Err(RegistryError::DuplicateName { .. })
        ));
        assert!(reg.lookup_by_name("cafe\u{301}").is_some());
    }

    #[test]
    fn dropped_loader_goes_stale_and_frees_its_name() {
        let arena = LoaderArena::new();
        let reg = LoaderRegistry::new();
        let a = loader(&arena, "/cp/a");
        let a_id = a.identify();
        reg.register(&a, "L").unwrap();
        drop(a);

        assert!(reg.lookup_id(a_id).is_none());
        assert!(reg.lookup_by_name("L").is_none());
        assert_eq!(reg.counts(), (0, 1));

        let b = loader(&arena, "/cp/b");
        let rec = reg.register(&b, "L").unwrap();
        assert_eq!(rec.id, b.identify());
        assert_eq!(reg.counts(), (1, 1));
        assert!(reg.lookup_id(a_id).is_none());
    }

    #[test]
    fn fingerprint_is_frozen_at_registration() {
        let arena = LoaderArena::new();
        let reg = LoaderRegistry::new();
        let dir = DirClassLoader::new(&arena, vec![PathBuf::from("/cp/a")], LoaderId::APP);
        let a: Arc<dyn ClassLoaderLike> = dir.clone();
        let before = reg.register(&a, "L").unwrap().fingerprint;

        dir.add_root(PathBuf::from("/cp/extra"));
        assert_eq!(reg.fingerprint(a.as_ref()), Some(before));
        assert_ne!(
            ClasspathFingerprint::of_roots(&a.classpath_roots()),
            before
        );
    }

    #[test]
    fn racing_registrations_have_exactly_one_winner() {
        let arena = LoaderArena::new();
        for round in 0..200u64 {
            let reg = LoaderRegistry::new();
            let contenders: Vec<Arc<dyn ClassLoaderLike>> =
                (0..4).map(|i| loader(&arena, &format!("/cp/{i}"))).collect();
            let barrier = Barrier::new(contenders.len());

            let results: Vec<bool> = std::thread::scope(|s| {
                let handles: Vec<_> = contenders
                    .iter()
                    .enumerate()
                    .map(|(i, l)| {
                        let reg = &reg;
                        let barrier = &barrier;
                        s.spawn(move || {
                            barrier.wait();
                            // 伪随机让步，打散交错顺序
                            let spins = xxhash_rust::xxh3::xxh3_64(&[round as u8, i as u8]) % 64;
                            for _ in 0..spins {
                                std::thread::yield_now();
                            }
                            reg.register(l, "contended").is_ok()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            assert_eq!(results.iter().filter(|ok| **ok).count(), 1, "round {round}");
            let winner = reg.lookup_by_name("contended").unwrap();
            let winner_idx = results.iter().position(|ok| *ok).unwrap();
            assert_eq!(winner.id, contenders[winner_idx].identify());
        }
    }
}
