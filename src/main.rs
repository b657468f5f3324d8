mod api;
mod config;
mod db;
mod export;
mod model;
mod parser;
mod scraper;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::parser::{html, Extractors, PageFormat};
use crate::scraper::{PageSource, SourceKind};

#[derive(Parser)]
#[command(name = "divan_scraper", about = "divan.ru sofa catalog scraper")]
struct Cli {
    /// Settings file (default: ./divan.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the divans table if it does not exist
    Init,
    /// Fetch catalog pages, extract listings and upsert them
    Scrape {
        /// Where page bodies come from
        #[arg(long, value_enum, default_value = "html")]
        source: SourceKind,
        /// Directory with page-N.md files (file source)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Pages to crawl (default: max_pages setting)
        #[arg(short = 'n', long)]
        limit: Option<u32>,
        /// Skip the CSV export after saving
        #[arg(long)]
        no_export: bool,
    },
    /// Extract listings from a local file and print them as JSON lines
    Parse {
        file: PathBuf,
        /// Page number recorded on each listing
        #[arg(long, default_value = "1")]
        page: u32,
        /// Treat the file as catalog HTML (default: by extension)
        #[arg(long)]
        html: bool,
    },
    /// Export the table to a timestamped CSV
    Export {
        /// Output directory (default: output_dir setting)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show table statistics
    Stats {
        /// Recent rows to display
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// List tables, their columns and first rows
    Explore {
        /// Rows per table
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
    },
    /// Repair an older table layout
    Migrate {
        /// Drop and re-create the table (destroys data)
        #[arg(long)]
        recreate: bool,
    },
    /// Save the raw HTML of page 1 and report what selectors see
    DebugPage {
        #[arg(long, default_value = "page_debug.html")]
        out: PathBuf,
    },
    /// Run the coin flip HTTP API
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            println!("Table `{}` ready in {}", db::TABLE, settings.db_path.display());
            Ok(())
        }
        Commands::Scrape {
            source,
            dir,
            limit,
            no_export,
        } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let source = PageSource::build(source, &settings, dir)?;
            let pages = limit.unwrap_or(settings.max_pages).max(1);
            let saved = run_scrape(&conn, &settings, &source, pages, !no_export).await?;
            if saved.saved > 0 {
                print_stats(&conn, 5)?;
            }
            Ok(())
        }
        Commands::Parse { file, page, html } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let is_html = html
                || file
                    .extension()
                    .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"));
            let format = if is_html { PageFormat::Html } else { PageFormat::Text };

            let extractors = Extractors::from_settings(&settings);
            let records = extractors.extract(&body, format, page);
            for r in &records {
                println!("{}", serde_json::to_string(r)?);
            }
            eprintln!("{} listings", records.len());
            Ok(())
        }
        Commands::Export { out } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let dir = out.unwrap_or_else(|| settings.output_dir.clone());
            match export::export_csv(&conn, &dir)? {
                Some(path) => println!("Exported to {}", path.display()),
                None => println!("Table is empty, nothing exported."),
            }
            Ok(())
        }
        Commands::Stats { limit } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            print_stats(&conn, limit)
        }
        Commands::Explore { limit } => {
            let conn = db::connect(&settings.db_path)?;
            let tables = db::list_tables(&conn)?;
            if tables.is_empty() {
                println!("No tables. Run 'init' first.");
            }
            for table in &tables {
                explore_table(&conn, table, limit)?;
            }
            Ok(())
        }
        Commands::Migrate { recreate } => {
            let conn = db::connect(&settings.db_path)?;
            if recreate {
                db::recreate_table(&conn)?;
                println!("Table `{}` re-created:", db::TABLE);
                for c in db::table_columns(&conn, db::TABLE)? {
                    println!("  {:<20} {}", c.name, c.decl_type);
                }
            } else {
                let report = db::migrate(&conn)?;
                if report.added_columns.is_empty() {
                    println!("No columns missing.");
                } else {
                    println!("Added columns: {}", report.added_columns.join(", "));
                }
                println!("Removed {} duplicate rows.", report.duplicates_removed);
            }
            Ok(())
        }
        Commands::DebugPage { out } => {
            let client = scraper::http_client(&settings)?;
            let body = scraper::fetch_html(&client, &settings.catalog_url).await?;
            std::fs::write(&out, &body).with_context(|| format!("writing {}", out.display()))?;
            println!("Saved {} ({} bytes)", out.display(), body.len());

            let (title, description) = html::page_summary(&body);
            println!("Title:       {}", title.as_deref().unwrap_or("-"));
            println!(
                "Description: {}",
                description.as_deref().map(|d| truncate(d, 80)).unwrap_or_else(|| "-".into())
            );
            println!("\n--- Card selectors ---");
            for (selector, count) in html::card_selector_counts(&body) {
                println!("  {:<36} {}", selector, count);
            }
            Ok(())
        }
        Commands::Serve => api::serve(settings.api).await,
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Crawl, save and optionally export. Nothing is written when no listings are found.
async fn run_scrape(
    conn: &rusqlite::Connection,
    settings: &Settings,
    source: &PageSource,
    pages: u32,
    with_export: bool,
) -> anyhow::Result<db::SaveStats> {
    let extractors = Extractors::from_settings(settings);

    println!("Scraping {} pages from {}...", pages, settings.catalog_url);
    let t_scrape = Instant::now();
    let (records, crawl) = scraper::scrape_catalog(
        source,
        &extractors,
        &settings.catalog_url,
        pages,
        settings.page_delay,
    )
    .await?;
    println!(
        "Crawled {} pages ({} ok, {} empty, {} failed), {} listings in {:.1}s",
        pages,
        crawl.pages_ok,
        crawl.pages_empty,
        crawl.pages_failed,
        records.len(),
        t_scrape.elapsed().as_secs_f64()
    );

    if records.is_empty() {
        println!("No listings found.");
        return Ok(db::SaveStats::default());
    }

    let saved = db::save_listings(conn, &records)?;
    println!("Saved {} listings ({} failed).", saved.saved, saved.failed);

    if with_export {
        if let Some(path) = export::export_csv(conn, &settings.output_dir)? {
            println!("Exported to {}", path.display());
        }
    }
    Ok(saved)
}

fn print_stats(conn: &rusqlite::Connection, recent: usize) -> anyhow::Result<()> {
    let s = db::get_stats(conn)?;
    println!("Listings:     {}", s.total);
    if s.total == 0 {
        return Ok(());
    }
    println!("Avg price:    {}", money(s.avg_price));
    println!("Min price:    {}", money(s.min_price));
    println!("Max price:    {}", money(s.max_price));
    println!(
        "Avg discount: {}",
        s.avg_discount.map(|d| format!("{:.1}%", d)).unwrap_or_else(|| "-".into())
    );
    println!("Pages:        {}", s.pages);

    println!("\n--- Most expensive ---");
    print_rows(&db::top_expensive(conn, 5)?);
    println!("\n--- Most recent ---");
    print_rows(&db::recent(conn, recent)?);
    Ok(())
}

fn print_rows(rows: &[db::SummaryRow]) {
    println!("{:>3} | {:<48} | {:>10} | {:>4} | {:>4} | {:<19}", "#", "Name", "Price", "Disc", "Page", "Scraped");
    println!("{}", "-".repeat(104));
    for (i, r) in rows.iter().enumerate() {
        let discount = r.discount_percent.map(|d| format!("{}%", d)).unwrap_or_else(|| "-".into());
        println!(
            "{:>3} | {:<48} | {:>10} | {:>4} | {:>4} | {:<19}",
            i + 1,
            truncate(&r.name, 45),
            money(r.price),
            discount,
            r.page_number,
            r.scraped_at
        );
    }
}

fn explore_table(conn: &rusqlite::Connection, table: &str, limit: usize) -> anyhow::Result<()> {
    println!("\n=== {} ===", table);
    for c in db::table_columns(conn, table)? {
        println!(
            "  {:<20} {:<28} {:<8} {}{}",
            c.name,
            c.decl_type,
            if c.not_null { "NOT NULL" } else { "NULL" },
            c.default.map(|d| format!("DEFAULT {}", d)).unwrap_or_default(),
            if c.primary_key { " PK" } else { "" }
        );
    }

    let (columns, rows) = db::sample_rows(conn, table, limit)?;
    if rows.is_empty() {
        println!("  (empty)");
        return Ok(());
    }
    println!("  {}", columns.join(" | "));
    for row in rows {
        let cells: Vec<String> = row.iter().map(|v| truncate(v, 30)).collect();
        println!("  {}", cells.join(" | "));
    }
    Ok(())
}

fn money(v: Option<f64>) -> String {
    v.map(|p| format!("{:.0} ₽", p)).unwrap_or_else(|| "-".into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::{ApiSettings, DEFAULT_CATALOG_URL};

    fn settings(output_dir: PathBuf) -> Settings {
        Settings {
            db_path: PathBuf::from(":memory:"),
            catalog_url: url::Url::parse(DEFAULT_CATALOG_URL).unwrap(),
            user_agent: "test".into(),
            timeout: Duration::from_secs(1),
            max_pages: 3,
            page_delay: Duration::ZERO,
            output_dir,
            keywords: parser::DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            spider_api_key: None,
            api: ApiSettings { port: 5000, debug: false },
        }
    }

    fn memory() -> rusqlite::Connection {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    #[tokio::test]
    async fn empty_crawl_completes_without_writing() {
        let out = tempfile::tempdir().unwrap();
        let pages = tempfile::tempdir().unwrap();
        let conn = memory();
        let source = PageSource::File(pages.path().to_path_buf());

        let saved = run_scrape(&conn, &settings(out.path().to_path_buf()), &source, 2, true)
            .await
            .unwrap();
        assert_eq!(saved, db::SaveStats::default());
        assert_eq!(db::get_stats(&conn).unwrap().total, 0);
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn fixture_crawl_saves_and_exports() {
        let out = tempfile::tempdir().unwrap();
        let conn = memory();
        let source = PageSource::File(PathBuf::from("tests/fixtures"));

        let saved = run_scrape(&conn, &settings(out.path().to_path_buf()), &source, 3, true)
            .await
            .unwrap();
        assert_eq!(saved, db::SaveStats { saved: 10, failed: 0 });
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 1);
    }
}
