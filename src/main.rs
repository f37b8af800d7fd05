use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod coordinator;
mod export;
mod fetch;
mod normalize;
mod raw;
mod scrape;
mod sink;
mod store;
mod types;

use coordinator::{RunConfig, Strategy};
use export::JsonExport;
use fetch::{ListingPages, ProductPages, SearchApi};
use sink::Outputs;
use store::StampStore;

pub const STOREFRONT_URL: &str = "https://www.mysticstamp.com/";
pub const STOREFRONT_DOMAIN: &str = "mysticstamp.com";
pub const LISTING_URL: &str = "https://www.mysticstamp.com/foreign-stamps/?tab=products&productsPage=";
pub const SEARCH_API_URL: &str = "https://zyfff9.a.searchspring.io/api/search/search.json";
pub const SEARCH_SITE_ID: &str = "zyfff9";
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; StampHarvest/1.0)";

/// Image path the storefront uses for products that have not been photographed
pub const PLACEHOLDER_IMAGE: &str = "new-image-coming-soon.jpg";

const WORLDWIDE_SCOPE: &str = "Worldwide";
const US_SCOPE: &str = "US Stamps";

const CATEGORIES: &[&str] = &[
    "Worldwide>Africa",
    "Worldwide>Asia",
    "Worldwide>Australia & Oceania",
    "Worldwide>British Colonies",
    "Worldwide>Canada",
    "Worldwide>Caribbean",
    "Worldwide>Europe",
    "Worldwide>Germany",
    "Worldwide>Great Britain",
    "Worldwide>Latin America",
    "Worldwide>Middle East",
    "Worldwide>Stamp Packets by Country",
    "Worldwide>Topical Stamps",
    "Worldwide>Unique Country Collections",
    "Worldwide>United Nations",
];

const CONDITIONS: &[&str] = &["Unused Stamp(s)", "Used Stamp(s)", "First Day Covers"];

/// Search segments for the alphabetic split: A-Z, then 0-9
fn alpha_segments() -> Vec<String> {
    ('A'..='Z').chain('0'..='9').map(String::from).collect()
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[derive(Parser)]
#[command(name = "stamp-harvest")]
#[command(about = "Scrape stamp listings into SQLite and a JSON export")]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, default_value = "stamps.db")]
    db: PathBuf,
    /// JSON export file
    #[arg(long, global = true, default_value = "stamps.json")]
    json: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape listings with one of the fetch strategies
    Scrape {
        #[command(subcommand)]
        mode: ScrapeMode,
        #[command(flatten)]
        opts: ScrapeOpts,
    },
    /// Write every stored stamp to the JSON export file
    Export,
    /// Show how many stamps are stored
    Stats,
    /// Remove the database and the export file
    Clean,
}

#[derive(Subcommand)]
enum ScrapeMode {
    /// Walk the HTML listing pages
    Pages,
    /// Walk the search API pages for all worldwide stamps
    Api,
    /// Search API, one pass per worldwide category
    Categories,
    /// Search API, one pass per US stamp condition
    Conditions,
    /// Search API, one pass per leading letter or digit
    Segments,
    /// Follow "next product" links from a product page
    Walk {
        /// Product page to start from
        #[arg(value_name = "START_URL")]
        start_url: String,
    },
}

#[derive(Args)]
struct ScrapeOpts {
    /// Seconds between requests (default: 2 for HTML pages, 1 for the API)
    #[arg(long, global = true)]
    delay: Option<f64>,
    /// Seconds to wait before retrying a rate-limited request
    #[arg(long, global = true, default_value_t = 30.0)]
    backoff: f64,
    /// Stop each pass after this many pages
    #[arg(long, global = true)]
    max_pages: Option<u32>,
    /// Stop the run after this many accepted stamps
    #[arg(long, global = true)]
    max_products: Option<usize>,
    /// Replace the export file instead of appending to it
    #[arg(long, global = true)]
    fresh_export: bool,
}

impl ScrapeOpts {
    fn run_config(&self, default_delay: f64) -> Result<RunConfig> {
        let delay = self.delay.unwrap_or(default_delay);
        Ok(RunConfig {
            delay: Duration::try_from_secs_f64(delay)?,
            backoff: Duration::try_from_secs_f64(self.backoff)?,
            max_pages: self.max_pages,
            max_products: self.max_products,
        })
    }
}

pub fn init_database(conn: &Connection) -> Result<()> {
    let schema = include_str!("../schema.sql");
    conn.execute_batch(schema)?;
    Ok(())
}

fn run_scrape_mode(mode: ScrapeMode, opts: ScrapeOpts, db: &Path, json: &Path) -> Result<()> {
    let outputs = Outputs {
        store: StampStore::open(db)?,
        export: JsonExport::new(json, opts.fresh_export),
    };

    match mode {
        ScrapeMode::Pages => scrape::run_scrape(
            ListingPages::new()?,
            Strategy::Paginated,
            opts.run_config(2.0)?,
            outputs,
        ),
        ScrapeMode::Api => scrape::run_scrape(
            SearchApi::new(WORLDWIDE_SCOPE)?,
            Strategy::Paginated,
            opts.run_config(1.0)?,
            outputs,
        ),
        ScrapeMode::Categories => scrape::run_scrape(
            SearchApi::new(WORLDWIDE_SCOPE)?,
            Strategy::CategorySplit(owned(CATEGORIES)),
            opts.run_config(1.0)?,
            outputs,
        ),
        ScrapeMode::Conditions => scrape::run_scrape(
            SearchApi::new(US_SCOPE)?,
            Strategy::ConditionSplit(owned(CONDITIONS)),
            opts.run_config(1.0)?,
            outputs,
        ),
        ScrapeMode::Segments => scrape::run_scrape(
            SearchApi::new(WORLDWIDE_SCOPE)?,
            Strategy::AlphaSplit(alpha_segments()),
            opts.run_config(1.0)?,
            outputs,
        ),
        ScrapeMode::Walk { start_url } => scrape::run_scrape(
            ProductPages::new()?,
            Strategy::LinkWalk(start_url),
            opts.run_config(2.0)?,
            outputs,
        ),
    }
}

fn run_export(db: &Path, json: &Path) -> Result<()> {
    let store = StampStore::open(db)?;
    let stamps = store.export_all()?;
    export::write_snapshot(json, &stamps)?;
    println!("Exported {} stamps to {}", stamps.len(), json.display());
    Ok(())
}

fn run_stats(db: &Path) -> Result<()> {
    let store = StampStore::open(db)?;
    println!("{} stamps in {}", store.count()?, db.display());
    Ok(())
}

fn run_clean(db: &Path, json: &Path) -> Result<()> {
    println!("Cleaning generated files...");

    for path in [db, json] {
        if path.exists() {
            fs::remove_file(path)?;
            println!("  Removed {}", path.display());
        }
    }

    println!("Clean complete!");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape { mode, opts } => run_scrape_mode(mode, opts, &cli.db, &cli.json),
        Commands::Export => run_export(&cli.db, &cli.json),
        Commands::Stats => run_stats(&cli.db),
        Commands::Clean => run_clean(&cli.db, &cli.json),
    }
}
