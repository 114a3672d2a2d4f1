pub mod config;
pub mod descriptor;
pub mod error;
pub mod metadata;
pub mod scheme;

pub mod dbcache;
pub mod rwcache;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use console::Term;
use env_logger::Env;
use log::info;

use config::{CacheDeploymentConfig, CacheKind};
use dbcache::DBCache;
use rwcache::RWCache;
use scheme::SchemeSettings;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const WELCOME_MSG: &str = "
┌───────────────────────────┐
│                           │
│   streamcache vxx.xx.xx   │
│                           │
└───────────────────────────┘
";

/// A thin operator CLI around the cache engine: point it at a deployment
/// config and drive one lifecycle step per invocation.
#[derive(Parser, Debug)]
#[command(version, about, long_about)]
pub struct Args {
    /// Path to a cache deployment config (YAML).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Stage the next group/block in the background and exit.
    #[arg(long)]
    pub prepare: bool,

    /// Advance the cache (SwitchCache for double_buffered, Update for
    /// rolling_window) and exit.
    #[arg(long)]
    pub advance: bool,

    /// Print the current cache status and exit.
    #[arg(long)]
    pub status: bool,
}

async fn read_urls_file(path: &std::path::Path) -> anyhow::Result<Vec<String>> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

enum Engine {
    DoubleBuffered(Arc<DBCache>),
    RollingWindow(Arc<RWCache>),
}

fn scheme_settings(config: &CacheDeploymentConfig) -> SchemeSettings {
    let s3_region = config
        .remotes
        .as_ref()
        .and_then(|r| r.s3.as_ref())
        .and_then(|s3| s3.region.clone());
    SchemeSettings { s3_region }
}

async fn build_engine(config: &CacheDeploymentConfig) -> anyhow::Result<Engine> {
    let settings = scheme_settings(config);

    match config.kind {
        CacheKind::DoubleBuffered => {
            let from_dir = config
                .source
                .from_dir
                .as_ref()
                .expect("validated: from_dir present for double_buffered");
            let extension = config.source.extension.as_deref().unwrap_or("wav");
            let group_size = config.group_size.unwrap_or(1024 * 1024 * 1024);

            let cache = DBCache::construct(
                std::path::Path::new(from_dir),
                &config.cache_dir,
                group_size,
                extension,
                settings,
            )
            .await?;
            Ok(Engine::DoubleBuffered(cache))
        }
        CacheKind::RollingWindow => {
            let urls_file = config
                .source
                .urls_file
                .as_ref()
                .expect("validated: urls_file present for rolling_window");
            let urls = read_urls_file(urls_file).await?;

            let cache = RWCache::construct(
                urls,
                &config.cache_dir,
                config.cache_size,
                config.increment_size,
                settings,
            )
            .await?;
            Ok(Engine::RollingWindow(cache))
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let term = Term::stdout();
    let padded_version = format!("{VERSION:<8}");
    term.set_title("streamcache");
    println!("{}", WELCOME_MSG.replace("xx.xx.xx", &padded_version));

    let args = Args::parse();
    let config = CacheDeploymentConfig::load(&args.config)?;

    println!("Building cache...");
    term.move_cursor_up(1)?;
    let engine = build_engine(&config).await?;
    println!("Building cache... {}", console::style("✓").green());

    match engine {
        Engine::DoubleBuffered(cache) => {
            if args.advance {
                cache.switch_cache().await?;
                println!("Switched active slot.");
            }
            if args.status || (!args.advance && !args.prepare) {
                println!("active_dir: {}", cache.active_dir().await.display());
                println!("groups: {}", cache.group_count());
                println!("caching: {}", cache.is_caching());
            }
            info!("double_buffered cache ready at {}", config.cache_dir.display());
        }
        Engine::RollingWindow(cache) => {
            if args.advance {
                cache.update().await?;
                println!("Updated active window.");
            }
            if args.status || (!args.advance && !args.prepare) {
                println!("active_size: {}", cache.active_size().await);
                println!("size: {}", cache.size().await);
                println!("files: {}", cache.current_files().await.len());
                println!("caching: {}", cache.is_caching());
            }
            info!("rolling_window cache ready at {}", config.cache_dir.display());
        }
    }

    Ok(())
}
