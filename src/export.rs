use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{self, ExportRow};

const BOM: &str = "\u{feff}";
const HEADER: [&str; 9] = [
    "name",
    "price",
    "old_price",
    "discount_percent",
    "dimensions",
    "sleeping_dimensions",
    "url",
    "page_number",
    "scraped_at",
];

pub fn file_name(now: DateTime<Local>) -> String {
    format!("divans_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

/// Write the whole table to a timestamped CSV under `dir`. `None` when the table is empty.
pub fn export_csv(conn: &Connection, dir: &Path) -> Result<Option<PathBuf>> {
    let rows = db::fetch_for_export(conn)?;
    if rows.is_empty() {
        warn!("nothing to export");
        return Ok(None);
    }

    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(file_name(Local::now()));
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(file);
    write_csv(&mut w, &rows).with_context(|| format!("writing {}", path.display()))?;
    w.flush()?;

    info!(path = %path.display(), rows = rows.len(), "exported CSV");
    Ok(Some(path))
}

pub fn write_csv<W: Write>(mut w: W, rows: &[ExportRow]) -> io::Result<()> {
    w.write_all(BOM.as_bytes())?;
    write_row(&mut w, &HEADER.map(String::from))?;
    for r in rows {
        let cells = [
            r.name.clone(),
            opt(r.price),
            opt(r.old_price),
            opt(r.discount_percent),
            r.dimensions.clone().unwrap_or_default(),
            r.sleeping_dimensions.clone().unwrap_or_default(),
            r.url.clone().unwrap_or_default(),
            r.page_number.to_string(),
            r.scraped_at.clone(),
        ];
        write_row(&mut w, &cells)?;
    }
    Ok(())
}

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(mut w: W, row: &[String]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            w.write_all(b",")?;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    w.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ListingRecord;
    use chrono::TimeZone;

    fn row(name: &str) -> ExportRow {
        ExportRow {
            name: name.into(),
            price: Some(41150.0),
            old_price: Some(58790.0),
            discount_percent: Some(30),
            dimensions: None,
            sleeping_dimensions: Some("198 x 120 x 36".into()),
            url: Some("https://www.divan.ru/product/fils".into()),
            page_number: 1,
            scraped_at: "2024-05-01 10:00:00".into(),
        }
    }

    #[test]
    fn timestamped_name() {
        let t = Local.with_ymd_and_hms(2024, 5, 1, 9, 3, 7).unwrap();
        assert_eq!(file_name(t), "divans_20240501_090307.csv");
    }

    #[test]
    fn bom_header_and_plain_row() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &[row("Диван Филс")]).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "\u{feff}name,price,old_price,discount_percent,dimensions,sleeping_dimensions,url,page_number,scraped_at"
        );
        assert_eq!(
            lines.next().unwrap(),
            "Диван Филс,41150,58790,30,,198 x 120 x 36,https://www.divan.ru/product/fils,1,2024-05-01 10:00:00"
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn quotes_only_when_needed() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &[row("Диван \"Люкс\", угловой")]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\n\"Диван \"\"Люкс\"\", угловой\",41150,"));
    }

    #[test]
    fn export_writes_file_and_skips_empty_table() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let dir = tempfile::tempdir().unwrap();

        assert!(export_csv(&conn, dir.path()).unwrap().is_none());

        db::save_listings(&conn, &[ListingRecord::new("Диван А"), ListingRecord::new("Диван Б")]).unwrap();
        let path = export_csv(&conn, &dir.path().join("out")).unwrap().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("divans_") && name.ends_with(".csv"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with('\u{feff}'));
        assert_eq!(text.lines().count(), 3);
    }
}
