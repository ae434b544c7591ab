use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 解析路径计数器（Relaxed 即可：只用于观测）
#[derive(Debug, Default)]
pub struct CdsStats {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidated: AtomicU64,
    /// 其中命中 invalidated 缓存、未触碰 archive 的次数
    invalidated_cached: AtomicU64,
    corrupt: AtomicU64,
    archive_probes: AtomicU64,
    normal_loads: AtomicU64,
}

impl CdsStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidated(&self, cached: bool) {
        self.invalidated.fetch_add(1, Ordering::Relaxed);
        if cached {
            self.invalidated_cached.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_corrupt(&self) {
        self.corrupt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe(&self) {
        self.archive_probes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_normal_load(&self) {
        self.normal_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ResolutionStats {
        ResolutionStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            invalidated_cached: self.invalidated_cached.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
            archive_probes: self.archive_probes.load(Ordering::Relaxed),
            normal_loads: self.normal_loads.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidated: u64,
    pub invalidated_cached: u64,
    /// checksum / 反序列化失败（计入 misses）
    pub corrupt: u64,
    pub archive_probes: u64,
    pub normal_loads: u64,
}

/// 运行时报告
#[derive(Clone, Debug, Default)]
pub struct CdsReport {
    pub resolution: ResolutionStats,
    pub live_loaders: usize,
    pub stale_loaders: usize,
    /// 已挂载 archive 的 entry 数（未挂载为 None）
    pub archive_entries: Option<usize>,
    /// dump 模式下待写入的 class 数
    pub pending_dump: Option<usize>,
}

fn opt(v: Option<usize>) -> String {
    v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for CdsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.resolution;
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           eager-cds Report                       ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║ Loaders:                                         ║")?;
        writeln!(f, "║   live:         {:>10}                       ║", self.live_loaders)?;
        writeln!(f, "║   stale:        {:>10}                       ║", self.stale_loaders)?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Archive:                                         ║")?;
        writeln!(f, "║   entries:      {:>10}                       ║", opt(self.archive_entries))?;
        writeln!(f, "║   pending dump: {:>10}                       ║", opt(self.pending_dump))?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Resolution:                                      ║")?;
        writeln!(f, "║   hits:         {:>10}                       ║", r.hits)?;
        writeln!(f, "║   misses:       {:>10}  (corrupt {:>6})    ║", r.misses, r.corrupt)?;
        writeln!(
            f,
            "║   invalidated:  {:>10}  (cached {:>7})    ║",
            r.invalidated, r.invalidated_cached
        )?;
        writeln!(f, "║   probes:       {:>10}                       ║", r.archive_probes)?;
        writeln!(f, "║   normal loads: {:>10}                       ║", r.normal_loads)?;
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_renders_counters() {
        let stats = CdsStats::default();
        stats.record_hit();
        stats.record_invalidated(false);
        stats.record_invalidated(true);
        let report = CdsReport {
            resolution: stats.snapshot(),
            live_loaders: 1,
            archive_entries: Some(3),
            ..Default::default()
        };
        assert_eq!(report.resolution.invalidated, 2);
        assert_eq!(report.resolution.invalidated_cached, 1);
        let text = report.to_string();
        assert!(text.contains("hits:                  1"));
        assert!(text.contains("pending dump:          -"));
    }
}
