use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::DumpConfig;
use crate::error::ConfigError;

/// 运行配置（TOML）。
///
/// ```toml
/// eager = true
/// archive_path = "/var/cache/app.jsa"
/// exclusion_threshold = 64
/// exclude = ["com.example.generated.*"]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdsConfig {
    /// 是否在首次加载时同步查 archive
    pub eager: bool,
    /// 启动时挂载的 archive
    pub archive_path: Option<PathBuf>,
    pub exclusion_threshold: usize,
    pub exclude: Vec<String>,
}

impl Default for CdsConfig {
    fn default() -> Self {
        let dump = DumpConfig::default();
        Self {
            eager: true,
            archive_path: None,
            exclusion_threshold: dump.exclusion_threshold,
            exclude: dump.exclude,
        }
    }
}

impl CdsConfig {
    /// `~/.config/eager-cds/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("eager-cds").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// 显式路径必须存在；否则尝试默认路径，不存在就用默认值
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            return Self::load(p);
        }
        match Self::default_path() {
            Some(p) if p.exists() => {
                tracing::debug!("Loading config from {:?}", p);
                Self::load(&p)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn dump_config(&self) -> DumpConfig {
        DumpConfig {
            exclusion_threshold: self.exclusion_threshold,
            exclude: self.exclude.clone(),
        }
    }
}
