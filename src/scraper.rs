use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ConfigError, Settings};
use crate::model::ListingRecord;
use crate::parser::{Extractors, PageFormat};

static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("spider client: {0}")]
    Spider(String),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad page url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Where page bodies come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    /// Live catalog HTML over plain HTTP.
    Html,
    /// Page text pre-extracted by the spider.cloud API.
    Markdown,
    /// `page-N.md` files from a local directory.
    File,
}

pub enum PageSource {
    Html(reqwest::Client),
    Markdown(Spider),
    File(PathBuf),
}

impl PageSource {
    pub fn build(kind: SourceKind, settings: &Settings, dir: Option<PathBuf>) -> Result<Self, FetchError> {
        match kind {
            SourceKind::Html => Ok(Self::Html(http_client(settings)?)),
            SourceKind::Markdown => {
                let key = settings.require_spider_key()?;
                let spider = Spider::new(Some(key.to_string())).map_err(|e| FetchError::Spider(e.to_string()))?;
                Ok(Self::Markdown(spider))
            }
            SourceKind::File => Ok(Self::File(dir.unwrap_or_else(|| settings.output_dir.clone()))),
        }
    }

    pub fn format(&self) -> PageFormat {
        match self {
            Self::Html(_) => PageFormat::Html,
            Self::Markdown(_) | Self::File(_) => PageFormat::Text,
        }
    }

    /// Body of page `page`, or `None` when the source has nothing for it.
    pub async fn fetch(&self, base: &Url, page: u32) -> Result<Option<String>, FetchError> {
        match self {
            Self::Html(client) => fetch_html(client, &page_url(base, page)?).await.map(Some),
            Self::Markdown(spider) => fetch_markdown(spider, &page_url(base, page)?).await.map(Some),
            Self::File(dir) => {
                let path = dir.join(format!("page-{page}.md"));
                match std::fs::read_to_string(&path) {
                    Ok(text) => Ok(Some(text)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(source) => Err(FetchError::Io { path, source }),
                }
            }
        }
    }
}

/// Client with the configured User-Agent and timeout.
pub fn http_client(settings: &Settings) -> Result<reqwest::Client, FetchError> {
    Ok(reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(settings.timeout)
        .build()?)
}

/// Page 1 is the catalog URL itself, page N is `<base>/page-N`.
pub fn page_url(base: &Url, page: u32) -> Result<Url, url::ParseError> {
    if page <= 1 {
        return Ok(base.clone());
    }
    Url::parse(&format!("{}/page-{page}", base.as_str().trim_end_matches('/')))
}

pub async fn fetch_html(client: &reqwest::Client, url: &Url) -> Result<String, FetchError> {
    let start = Instant::now();
    let resp = client.get(url.clone()).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    let body = resp.text().await?;
    debug!(%url, bytes = body.len(), ms = start.elapsed().as_millis() as u64, "fetched");
    Ok(body)
}

async fn fetch_markdown(spider: &Spider, url: &Url) -> Result<String, FetchError> {
    let params = RequestParams {
        return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Markdown)),
        ..Default::default()
    };

    let response = spider
        .scrape_url(url.as_str(), Some(params), "application/json")
        .await
        .map_err(|e| FetchError::Spider(e.to_string()))?;

    let parsed: serde_json::Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };

    parsed
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .map(strip_images)
        .ok_or_else(|| FetchError::Spider(format!("no content for {url}")))
}

/// Remove markdown image syntax: ![alt](url) and [![alt](url)](link)
fn strip_images(md: &str) -> String {
    let cleaned = IMAGE_RE.replace_all(md, "");
    BLANKS_RE.replace_all(&cleaned, "\n\n").to_string()
}

/// Page-level outcome of a crawl.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub pages_ok: usize,
    pub pages_empty: usize,
    pub pages_failed: usize,
}

/// Walk pages `1..=pages` one at a time, sleeping `delay` between fetches.
pub async fn scrape_catalog(
    source: &PageSource,
    extractors: &Extractors,
    base: &Url,
    pages: u32,
    delay: Duration,
) -> Result<(Vec<ListingRecord>, CrawlStats)> {
    let pb = ProgressBar::new(pages as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut records = Vec::new();
    let mut stats = CrawlStats::default();

    for page in 1..=pages {
        match source.fetch(base, page).await {
            Ok(Some(body)) => {
                let found = extractors.extract(&body, source.format(), page);
                info!(page, records = found.len(), "page parsed");
                if found.is_empty() {
                    stats.pages_empty += 1;
                } else {
                    stats.pages_ok += 1;
                }
                records.extend(found);
            }
            Ok(None) => {
                warn!(page, "no data for page");
                stats.pages_empty += 1;
            }
            Err(e) => {
                warn!(page, error = %e, "page fetch failed, skipping");
                stats.pages_failed += 1;
            }
        }
        pb.inc(1);

        if page < pages && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pb.finish_and_clear();
    info!(
        "Crawled {} pages ({} ok, {} empty, {} failed), {} records",
        pages,
        stats.pages_ok,
        stats.pages_empty,
        stats.pages_failed,
        records.len()
    );
    Ok((records, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CATALOG_URL;
    use crate::parser::{HtmlExtractor, Keywords, TextExtractor};

    fn extractors() -> Extractors {
        let origin = Url::parse("https://www.divan.ru/").ok();
        Extractors {
            text: TextExtractor::new(Keywords::default(), origin.clone()),
            html: HtmlExtractor::new(Keywords::default(), origin),
        }
    }

    #[test]
    fn first_page_is_base_url() {
        let base = Url::parse(DEFAULT_CATALOG_URL).unwrap();
        assert_eq!(page_url(&base, 1).unwrap(), base);
        assert_eq!(
            page_url(&base, 3).unwrap().as_str(),
            "https://www.divan.ru/blagoveshchensk/category/divany/page-3"
        );
    }

    #[test]
    fn trailing_slash_is_not_doubled() {
        let base = Url::parse("https://www.divan.ru/category/divany/").unwrap();
        assert_eq!(
            page_url(&base, 2).unwrap().as_str(),
            "https://www.divan.ru/category/divany/page-2"
        );
    }

    #[test]
    fn images_are_stripped() {
        let md = "before ![pic](https://x/y.jpg) after\n\n\n\n[![a](b)](c) end";
        assert_eq!(strip_images(md), "before  after\n\n[](c) end");
    }

    #[tokio::test]
    async fn file_source_reads_fixture_pages() {
        let source = PageSource::File(PathBuf::from("tests/fixtures"));
        assert_eq!(source.format(), PageFormat::Text);

        let base = Url::parse(DEFAULT_CATALOG_URL).unwrap();
        let (records, stats) = scrape_catalog(&source, &extractors(), &base, 4, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(records.len(), 10);
        assert_eq!(
            stats,
            CrawlStats {
                pages_ok: 3,
                pages_empty: 1,
                pages_failed: 0
            }
        );
        assert_eq!(records.iter().filter(|r| r.source_page == 3).count(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let source = PageSource::File(dir.path().to_path_buf());
        let base = Url::parse(DEFAULT_CATALOG_URL).unwrap();
        assert!(source.fetch(&base, 1).await.unwrap().is_none());
    }
}
