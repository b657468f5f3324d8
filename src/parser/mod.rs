pub mod html;
pub mod normalize;
pub mod patterns;
pub mod text;

pub use html::HtmlExtractor;
pub use text::TextExtractor;

use url::Url;

use crate::config::Settings;
use crate::model::ListingRecord;

pub const DEFAULT_KEYWORDS: &[&str] = &["диван", "угловой", "прямой", "мягкая мебель"];

/// Case-insensitive substring filter deciding whether a name is a sofa.
#[derive(Debug, Clone)]
pub struct Keywords(Vec<String>);

impl Keywords {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(words.into_iter().map(|w| w.as_ref().to_lowercase()).collect())
    }

    pub fn accepts(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.0.iter().any(|k| name.contains(k.as_str()))
    }
}

impl Default for Keywords {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS)
    }
}

/// What kind of page body an extractor receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    Html,
    Text,
}

/// Both extractors configured from the same settings.
pub struct Extractors {
    pub text: TextExtractor,
    pub html: HtmlExtractor,
}

impl Extractors {
    pub fn from_settings(settings: &Settings) -> Self {
        let keywords = Keywords::new(&settings.keywords);
        let origin = site_origin(&settings.catalog_url);
        Self {
            text: TextExtractor::new(keywords.clone(), origin.clone()),
            html: HtmlExtractor::new(keywords, origin),
        }
    }

    /// Extract every accepted record from one page body.
    pub fn extract(&self, body: &str, format: PageFormat, page: u32) -> Vec<ListingRecord> {
        match format {
            PageFormat::Html => self.html.extract(body, page),
            PageFormat::Text => self.text.extract(body, page).collect(),
        }
    }
}

/// `https://host/any/path` → `https://host/`.
fn site_origin(url: &Url) -> Option<Url> {
    url.join("/").ok()
}
