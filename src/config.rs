use std::path::{Path, PathBuf};
use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::parser::DEFAULT_KEYWORDS;

pub const DEFAULT_CATALOG_URL: &str = "https://www.divan.ru/blagoveshchensk/category/divany";
const DEFAULT_DB_PATH: &str = "data/divans.sqlite";
const DEFAULT_CONFIG_FILE: &str = "divan";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Validated runtime settings, built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub catalog_url: Url,
    pub user_agent: String,
    pub timeout: Duration,
    pub max_pages: u32,
    pub page_delay: Duration,
    pub output_dir: PathBuf,
    pub keywords: Vec<String>,
    pub spider_api_key: Option<String>,
    pub api: ApiSettings,
}

#[derive(Debug, Clone, Copy)]
pub struct ApiSettings {
    pub port: u16,
    pub debug: bool,
}

/// Shape of the merged sources before validation.
#[derive(Debug, Deserialize)]
struct RawSettings {
    db_path: String,
    catalog_url: String,
    user_agent: String,
    timeout_secs: u64,
    max_pages: u32,
    page_delay_ms: u64,
    output_dir: String,
    keywords: Vec<String>,
    spider_api_key: Option<String>,
    port: u16,
    debug: bool,
}

impl Settings {
    /// Load from the optional local file, then `DIVAN_*` env vars, then the
    /// unprefixed `PORT`, `DEBUG` and `SPIDER_API_KEY`.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = base_builder(config_file)?
            .add_source(
                Environment::with_prefix("DIVAN")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("keywords"),
            )
            .set_override_option("port", std::env::var("PORT").ok())?
            .set_override_option("debug", std::env::var("DEBUG").ok())?
            .set_override_option("spider_api_key", std::env::var("SPIDER_API_KEY").ok())?;

        let raw: RawSettings = builder.build()?.try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        if raw.db_path.trim().is_empty() {
            return Err(ConfigError::Missing("db_path"));
        }
        if raw.catalog_url.trim().is_empty() {
            return Err(ConfigError::Missing("catalog_url"));
        }
        let catalog_url = Url::parse(raw.catalog_url.trim()).map_err(|e| ConfigError::Invalid {
            key: "catalog_url",
            reason: e.to_string(),
        })?;
        if !matches!(catalog_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "catalog_url",
                reason: format!("unsupported scheme `{}`", catalog_url.scheme()),
            });
        }
        if raw.user_agent.trim().is_empty() {
            return Err(ConfigError::Missing("user_agent"));
        }
        if raw.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if raw.max_pages == 0 {
            return Err(ConfigError::Invalid {
                key: "max_pages",
                reason: "must be at least 1".into(),
            });
        }
        if raw.port == 0 {
            return Err(ConfigError::Invalid {
                key: "port",
                reason: "must be a non-zero TCP port".into(),
            });
        }

        let keywords: Vec<String> = raw
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(ConfigError::Missing("keywords"));
        }

        Ok(Self {
            db_path: PathBuf::from(raw.db_path.trim()),
            catalog_url,
            user_agent: raw.user_agent.trim().to_string(),
            timeout: Duration::from_secs(raw.timeout_secs),
            max_pages: raw.max_pages,
            page_delay: Duration::from_millis(raw.page_delay_ms),
            output_dir: PathBuf::from(raw.output_dir),
            keywords,
            spider_api_key: raw.spider_api_key.filter(|k| !k.trim().is_empty()),
            api: ApiSettings {
                port: raw.port,
                debug: raw.debug,
            },
        })
    }

    /// API key for the markdown source; only required when that source is used.
    pub fn require_spider_key(&self) -> Result<&str, ConfigError> {
        self.spider_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("spider_api_key"))
    }
}

fn base_builder(config_file: Option<&Path>) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let file = match config_file {
        Some(path) => File::from(path.to_path_buf()).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let builder = config::Config::builder()
        .set_default("db_path", DEFAULT_DB_PATH)?
        .set_default("catalog_url", DEFAULT_CATALOG_URL)?
        .set_default("user_agent", DEFAULT_USER_AGENT)?
        .set_default("timeout_secs", 30)?
        .set_default("max_pages", 3)?
        .set_default("page_delay_ms", 1000)?
        .set_default("output_dir", ".")?
        .set_default(
            "keywords",
            DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        )?
        .set_default("port", 5000)?
        .set_default("debug", false)?
        .add_source(file);
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn defaults() -> RawSettings {
        base_builder(Some(Path::new("tests/fixtures/divan.toml")))
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn file_overrides_defaults() {
        let s = Settings::from_raw(defaults()).unwrap();
        assert_eq!(s.db_path, PathBuf::from("data/test.sqlite"));
        assert_eq!(s.max_pages, 2);
        assert_eq!(s.timeout, Duration::from_secs(30));
        assert_eq!(s.api.port, 5000);
        assert!(!s.api.debug);
        assert_eq!(s.keywords, vec!["диван", "софа"]);
        assert_eq!(s.catalog_url.as_str(), DEFAULT_CATALOG_URL);
    }

    #[test]
    fn missing_optional_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let raw: RawSettings = base_builder(None)
            .unwrap()
            .add_source(File::from(dir.path().join("absent.toml")).required(false))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let s = Settings::from_raw(raw).unwrap();
        assert_eq!(s.max_pages, 3);
        assert_eq!(s.page_delay, Duration::from_millis(1000));
        assert_eq!(s.keywords.len(), DEFAULT_KEYWORDS.len());
    }

    #[test]
    fn explicit_file_must_exist() {
        let err = base_builder(Some(Path::new("tests/fixtures/nope.toml")))
            .unwrap()
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn toml_values_are_typed() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(f, "port = 8080\ndebug = true\npage_delay_ms = 0").unwrap();
        let raw: RawSettings = base_builder(Some(f.path()))
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let s = Settings::from_raw(raw).unwrap();
        assert_eq!(s.api.port, 8080);
        assert!(s.api.debug);
        assert_eq!(s.page_delay, Duration::ZERO);
    }

    #[test]
    fn rejects_bad_catalog_url() {
        let mut raw = defaults();
        raw.catalog_url = "ftp://example.com/list".into();
        assert!(matches!(
            Settings::from_raw(raw),
            Err(ConfigError::Invalid { key: "catalog_url", .. })
        ));

        let mut raw = defaults();
        raw.catalog_url = "not a url".into();
        assert!(matches!(
            Settings::from_raw(raw),
            Err(ConfigError::Invalid { key: "catalog_url", .. })
        ));
    }

    #[test]
    fn rejects_missing_required() {
        let mut raw = defaults();
        raw.db_path = "  ".into();
        assert!(matches!(Settings::from_raw(raw), Err(ConfigError::Missing("db_path"))));

        let mut raw = defaults();
        raw.keywords = vec![" ".into()];
        assert!(matches!(Settings::from_raw(raw), Err(ConfigError::Missing("keywords"))));
    }

    #[test]
    fn rejects_zero_values() {
        let mut raw = defaults();
        raw.max_pages = 0;
        assert!(matches!(
            Settings::from_raw(raw),
            Err(ConfigError::Invalid { key: "max_pages", .. })
        ));

        let mut raw = defaults();
        raw.timeout_secs = 0;
        assert!(matches!(
            Settings::from_raw(raw),
            Err(ConfigError::Invalid { key: "timeout_secs", .. })
        ));
    }

    #[test]
    fn spider_key_only_checked_on_demand() {
        let mut raw = defaults();
        raw.spider_api_key = Some("".into());
        let s = Settings::from_raw(raw).unwrap();
        assert!(matches!(
            s.require_spider_key(),
            Err(ConfigError::Missing("spider_api_key"))
        ));
    }
}
