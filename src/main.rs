use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eager_cds::archive::{ExcludedClass, MappedArchive};
use eager_cds::config::CdsConfig;
use eager_cds::core::{ClassLoaderLike, DirClassLoader, LoaderArena, LoaderId};
use eager_cds::runtime::SharedRuntime;
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "eager-cds", version, about = "Eager class-data sharing for custom class loaders")]
struct Cli {
    /// 配置文件（默认 ~/.config/eager-cds/config.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 以一个命名 loader 加载 class 并写出 archive
    Dump {
        #[arg(long = "classpath", required = true)]
        classpath: Vec<PathBuf>,
        #[arg(long)]
        loader_name: String,
        #[arg(long)]
        output: PathBuf,
        /// 要加载的 class；与 --classlist 都缺省时加载 classpath 下全部 .class
        #[arg(long = "class")]
        classes: Vec<String>,
        /// class 列表文件：每行一个类名，`#` 开头为注释
        #[arg(long)]
        classlist: Option<PathBuf>,
    },
    /// 挂载 archive，以命名 loader 加载 class 并报告来源
    Run {
        #[arg(long)]
        archive: Option<PathBuf>,
        #[arg(long = "classpath", required = true)]
        classpath: Vec<PathBuf>,
        #[arg(long)]
        loader_name: String,
        #[arg(long = "class", required = true)]
        classes: Vec<String>,
        #[arg(long)]
        no_eager: bool,
    },
    /// 打印 archive 内容
    Inspect {
        archive: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = CdsConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Dump {
            classpath,
            loader_name,
            output,
            classes,
            classlist,
        } => {
            let mut names = classes;
            if let Some(list) = classlist {
                names.extend(read_classlist(&list)?);
            }
            if names.is_empty() {
                names = enumerate_classes(&classpath);
            }

            let rt = SharedRuntime::for_dump(&config);
            let arena = LoaderArena::new();
            let loader: Arc<dyn ClassLoaderLike> = DirClassLoader::new(&arena, classpath, LoaderId::APP);
            rt.register_class_loader(&loader, &loader_name)?;

            for name in &names {
                if let Err(e) = rt.load_class(&loader, name) {
                    tracing::warn!("Dump: failed to load {}: {}", name, e);
                }
            }
            let archive = rt.dump(&output)?;
            info!(
                "Dumped {} classes ({} excluded) to {:?}",
                archive.entries.len(),
                archive.header.manifest.excluded.len(),
                output
            );
        }
        Command::Run {
            archive,
            classpath,
            loader_name,
            classes,
            no_eager,
        } => {
            if archive.is_some() {
                config.archive_path = archive;
            }
            if no_eager {
                config.eager = false;
            }

            let rt = SharedRuntime::new(&config);
            let arena = LoaderArena::new();
            let loader: Arc<dyn ClassLoaderLike> = DirClassLoader::new(&arena, classpath, LoaderId::APP);
            rt.register_class_loader(&loader, &loader_name)?;

            for name in &classes {
                let c = rt.load_class(&loader, name)?;
                println!("{} ({:?})", c, c.origin);
            }
            print!("{}", rt.report());
        }
        Command::Inspect { archive, json } => inspect(&archive, json)?,
    }

    Ok(())
}

/// 解析 classlist：空行与 `#` 注释跳过，`a/b/C` 与 `a.b.C` 两种写法都接受
fn read_classlist(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.split_whitespace().next().unwrap_or(l).replace('/', "."))
        .collect())
}

fn enumerate_classes(roots: &[PathBuf]) -> Vec<String> {
    use ignore::WalkBuilder;

    let mut out = Vec::new();
    for root in roots {
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .ignore(false)
            .git_ignore(false)
            .build();
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let Some(rel) = rel.to_str() else { continue };
            if let Some(stem) = rel.strip_suffix(".class") {
                out.push(stem.replace('/', "."));
            }
        }
    }
    out.sort();
    out.dedup();
    out
}

#[derive(Serialize)]
struct ArchiveSummary<'a> {
    path: &'a Path,
    version: u32,
    created_at_ns: u64,
    source_classpath: &'a [PathBuf],
    loaders: Vec<LoaderSummary<'a>>,
    entries: Vec<EntrySummary<'a>>,
    excluded: &'a [ExcludedClass],
}

#[derive(Serialize)]
struct LoaderSummary<'a> {
    name: &'a str,
    fingerprint: String,
    classpath: &'a [PathBuf],
}

#[derive(Serialize)]
struct EntrySummary<'a> {
    class_name: &'a str,
    loader_name: &'a str,
    fingerprint: String,
    source: String,
    blob_bytes: usize,
    intact: bool,
}

fn inspect(path: &Path, json: bool) -> anyhow::Result<()> {
    let archive = MappedArchive::open(path)?;
    let manifest = archive.manifest();

    let summary = ArchiveSummary {
        path,
        version: archive.version(),
        created_at_ns: archive
            .created_at()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0),
        source_classpath: &manifest.source_classpath,
        loaders: manifest
            .loaders
            .iter()
            .map(|l| LoaderSummary {
                name: &l.name,
                fingerprint: l.fingerprint.to_string(),
                classpath: &l.classpath,
            })
            .collect(),
        entries: archive
            .entries()
            .into_iter()
            .map(|e| EntrySummary {
                class_name: &e.class_name,
                loader_name: &e.loader_name,
                fingerprint: e.fingerprint.to_string(),
                source: e.source.to_string(),
                blob_bytes: e.blob.len(),
                intact: archive.load_entry(e).is_ok(),
            })
            .collect(),
        excluded: &manifest.excluded,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("archive {:?} (version {})", summary.path, summary.version);
    for l in &summary.loaders {
        println!("  loader {:?} fingerprint {} classpath {:?}", l.name, l.fingerprint, l.classpath);
    }
    for e in &summary.entries {
        println!(
            "  {} [{}] source {} blob {} bytes{}",
            e.class_name,
            e.loader_name,
            e.source,
            e.blob_bytes,
            if e.intact { "" } else { " CORRUPT" }
        );
    }
    for ex in summary.excluded {
        println!("  excluded {} [{}]: {}", ex.class_name, ex.loader_name, ex.reason);
    }
    Ok(())
}
