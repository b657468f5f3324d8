use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::model::ListingRecord;

pub const TABLE: &str = "divans";

/// Open (creating parent directories as needed) the SQLite file at `path`.
pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS divans (
            id                  INTEGER PRIMARY KEY,
            name                TEXT NOT NULL CHECK (length(trim(name)) > 0),
            price               REAL,
            old_price           REAL,
            discount_percent    INTEGER,
            dimensions          TEXT,
            sleeping_dimensions TEXT,
            url                 TEXT,
            image_url           TEXT,
            page_number         INTEGER NOT NULL DEFAULT 1,
            scraped_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_divans_name ON divans(name);
        ",
    )
    .context("creating divans schema")?;
    Ok(())
}

// ── Writing ──

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SaveStats {
    pub saved: usize,
    pub failed: usize,
}

/// Upsert a batch by name in one transaction. A failing record is logged and skipped.
pub fn save_listings(conn: &Connection, records: &[ListingRecord]) -> Result<SaveStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = SaveStats::default();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO divans
             (name, price, old_price, discount_percent, dimensions,
              sleeping_dimensions, url, image_url, page_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(name) DO UPDATE SET
                price = excluded.price,
                old_price = excluded.old_price,
                discount_percent = excluded.discount_percent,
                dimensions = excluded.dimensions,
                sleeping_dimensions = excluded.sleeping_dimensions,
                url = excluded.url,
                image_url = excluded.image_url,
                page_number = excluded.page_number,
                scraped_at = datetime('now')",
        )?;
        for r in records {
            let res = stmt.execute(rusqlite::params![
                r.name,
                r.price,
                r.former_price,
                r.discount_percent,
                r.dimensions,
                r.sleeping_dimensions,
                r.detail_url,
                r.image_url,
                r.source_page,
            ]);
            match res {
                Ok(_) => stats.saved += 1,
                Err(e) => {
                    warn!(name = %r.name, error = %e, "failed to save record, skipping");
                    stats.failed += 1;
                }
            }
        }
    }
    tx.commit()?;
    info!("Saved {} records ({} failed)", stats.saved, stats.failed);
    Ok(stats)
}

// ── Maintenance ──

/// Columns an older table may lack, with the declaration used to add them.
const ADDABLE_COLUMNS: &[(&str, &str)] = &[
    ("price", "REAL"),
    ("old_price", "REAL"),
    ("discount_percent", "INTEGER"),
    ("dimensions", "TEXT"),
    ("sleeping_dimensions", "TEXT"),
    ("url", "TEXT"),
    ("image_url", "TEXT"),
    ("page_number", "INTEGER NOT NULL DEFAULT 1"),
    // ALTER TABLE cannot add a non-constant default; backfilled below.
    ("scraped_at", "TEXT"),
];

#[derive(Debug, Default)]
pub struct MigrateReport {
    pub added_columns: Vec<String>,
    pub duplicates_removed: usize,
}

/// Bring an existing table up to the current layout without dropping data.
pub fn migrate(conn: &Connection) -> Result<MigrateReport> {
    if !list_tables(conn)?.iter().any(|t| t == TABLE) {
        init_schema(conn)?;
        return Ok(MigrateReport::default());
    }

    let existing: Vec<String> = table_columns(conn, TABLE)?.into_iter().map(|c| c.name).collect();
    let mut report = MigrateReport::default();

    let tx = conn.unchecked_transaction()?;
    for (col, decl) in ADDABLE_COLUMNS {
        if existing.iter().any(|c| c == col) {
            continue;
        }
        tx.execute_batch(&format!("ALTER TABLE divans ADD COLUMN {col} {decl}"))
            .with_context(|| format!("adding column {col}"))?;
        info!(column = col, "added missing column");
        report.added_columns.push(col.to_string());
    }
    tx.execute("UPDATE divans SET scraped_at = datetime('now') WHERE scraped_at IS NULL", [])?;

    report.duplicates_removed = tx.execute(
        "DELETE FROM divans WHERE id NOT IN (SELECT MAX(id) FROM divans GROUP BY name)",
        [],
    )?;
    if report.duplicates_removed > 0 {
        info!(rows = report.duplicates_removed, "removed duplicate names");
    }
    tx.execute_batch("CREATE UNIQUE INDEX IF NOT EXISTS idx_divans_name ON divans(name);")?;
    tx.commit()?;
    Ok(report)
}

/// Drop and re-create the table. Destroys all rows.
pub fn recreate_table(conn: &Connection) -> Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS divans;")?;
    init_schema(conn)
}

// ── Export ──

pub struct ExportRow {
    pub name: String,
    pub price: Option<f64>,
    pub old_price: Option<f64>,
    pub discount_percent: Option<i32>,
    pub dimensions: Option<String>,
    pub sleeping_dimensions: Option<String>,
    pub url: Option<String>,
    pub page_number: i64,
    pub scraped_at: String,
}

pub fn fetch_for_export(conn: &Connection) -> Result<Vec<ExportRow>> {
    let mut stmt = conn.prepare(
        "SELECT name, price, old_price, discount_percent, dimensions,
                sleeping_dimensions, url, page_number, scraped_at
         FROM divans
         ORDER BY scraped_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ExportRow {
                name: row.get(0)?,
                price: row.get(1)?,
                old_price: row.get(2)?,
                discount_percent: row.get(3)?,
                dimensions: row.get(4)?,
                sleeping_dimensions: row.get(5)?,
                url: row.get(6)?,
                page_number: row.get(7)?,
                scraped_at: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_discount: Option<f64>,
    pub pages: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let stats = conn.query_row(
        "SELECT COUNT(*), AVG(price), MIN(price), MAX(price),
                AVG(discount_percent), COUNT(DISTINCT page_number)
         FROM divans",
        [],
        |r| {
            Ok(Stats {
                total: r.get(0)?,
                avg_price: r.get(1)?,
                min_price: r.get(2)?,
                max_price: r.get(3)?,
                avg_discount: r.get(4)?,
                pages: r.get(5)?,
            })
        },
    )?;
    Ok(stats)
}

pub struct SummaryRow {
    pub name: String,
    pub price: Option<f64>,
    pub discount_percent: Option<i32>,
    pub page_number: i64,
    pub scraped_at: String,
}

pub fn top_expensive(conn: &Connection, limit: usize) -> Result<Vec<SummaryRow>> {
    summary_rows(
        conn,
        "WHERE price IS NOT NULL ORDER BY price DESC, id",
        limit,
    )
}

pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<SummaryRow>> {
    summary_rows(conn, "ORDER BY scraped_at DESC, id DESC", limit)
}

fn summary_rows(conn: &Connection, tail: &str, limit: usize) -> Result<Vec<SummaryRow>> {
    let sql = format!(
        "SELECT name, price, discount_percent, page_number, scraped_at
         FROM divans {} LIMIT {}",
        tail, limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SummaryRow {
                name: row.get(0)?,
                price: row.get(1)?,
                discount_percent: row.get(2)?,
                page_number: row.get(3)?,
                scraped_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Explorer ──

pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let rows = stmt
        .query_map([table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get(2)?,
                default: row.get(3)?,
                primary_key: row.get::<_, i64>(4)? > 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// First `limit` rows of `table`, every value rendered as text.
pub fn sample_rows(conn: &Connection, table: &str, limit: usize) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    if !list_tables(conn)?.iter().any(|t| t == table) {
        anyhow::bail!("no such table: {table}");
    }
    let sql = format!("SELECT * FROM \"{}\" LIMIT {}", table.replace('"', "\"\""), limit);
    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get_ref(i).map(render_value))
                .collect::<Result<Vec<_>, _>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((columns, rows))
}

fn render_value(v: ValueRef<'_>) -> String {
    match v {
        ValueRef::Null => "NULL".into(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}
