use std::sync::Arc;

use crate::core::{ClassLoaderLike, SourceStamp};
use crate::resolve::resolver::{ArchiveResolver, Outcome};

/// define-class 路径上的同步钩子：拿到 class 字节之后、任何字节码解析之前决定是否查 archive。
///
/// 只有已注册的 loader 才触发；未注册 / 匿名 loader 直接走正常路径，不碰 archive。
pub struct EagerTrigger {
    enabled: bool,
    resolver: Arc<ArchiveResolver>,
}

impl EagerTrigger {
    pub fn new(enabled: bool, resolver: Arc<ArchiveResolver>) -> Self {
        Self { enabled, resolver }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn on_define(&self, loader: &dyn ClassLoaderLike, class_name: &str, source: SourceStamp) -> Outcome {
        if !self.enabled {
            return Outcome::Miss;
        }
        let Some(record) = self.resolver.registry().lookup(loader) else {
            tracing::trace!("{} not registered, skipping eager resolution", loader.identify());
            return Outcome::Miss;
        };
        let outcome = self.resolver.resolve_record(&record, class_name, source);
        tracing::debug!(
            "Eager resolution of {} via {:?}: {}",
            class_name,
            record.name,
            match &outcome {
                Outcome::Hit(_) => "hit",
                Outcome::Miss => "miss",
                Outcome::Invalidated => "invalidated",
            }
        );
        outcome
    }
}
