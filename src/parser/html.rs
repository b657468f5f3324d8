use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::normalize;
use super::Keywords;
use crate::model::ListingRecord;

// Card containers, tried in order.
static CARD_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [r#"div[data-testid="product-card"]"#, "div._Ud0k"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

static NAME: LazyLock<Selector> = LazyLock::new(|| Selector::parse(r#"span[itemprop="name"]"#).unwrap());
static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.qUioe[href]").unwrap());
static IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(r#"img[itemprop="image"][src]"#).unwrap());
static PRICE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(r#"span[data-testid="price"]"#).unwrap());
static OLD_PRICE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.ui-SVNym").unwrap());
static DISCOUNT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.ui-OQy8X").unwrap());
static SPEC_ITEM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.nfZ4w li.aoJQe").unwrap());
static SPEC_LABEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.u0pek").unwrap());
static SPEC_VALUE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.vdukP").unwrap());

const OVERALL_LABEL: &str = "Размеры (ДхШхВ)";
const SLEEPING_LABEL: &str = "Спальное место (ДхШхВ)";

/// DOM extractor for the catalog's rendered product cards.
pub struct HtmlExtractor {
    keywords: Keywords,
    origin: Option<Url>,
}

impl HtmlExtractor {
    pub fn new(keywords: Keywords, origin: Option<Url>) -> Self {
        Self { keywords, origin }
    }

    pub fn extract(&self, html: &str, page: u32) -> Vec<ListingRecord> {
        let doc = Html::parse_document(html);

        let Some(cards) = CARD_SELECTORS
            .iter()
            .map(|sel| doc.select(sel).collect::<Vec<_>>())
            .find(|c| !c.is_empty())
        else {
            warn!(page, "no product cards found");
            return Vec::new();
        };
        debug!(page, cards = cards.len(), "product cards found");

        cards
            .into_iter()
            .enumerate()
            .filter_map(|(i, card)| {
                let record = self.parse_card(card, page);
                if record.is_none() {
                    warn!(page, card = i + 1, "card has no name, skipped");
                }
                record
            })
            .filter(|r| {
                let ok = self.keywords.accepts(&r.name);
                if !ok {
                    debug!(name = %r.name, "rejected: no keyword in name");
                }
                ok
            })
            .collect()
    }

    fn parse_card(&self, card: ElementRef<'_>, page: u32) -> Option<ListingRecord> {
        let name = first_text(card, &NAME).filter(|n| !n.is_empty())?;

        let price = first_text(card, &PRICE).as_deref().and_then(normalize::number);
        let former_price = first_text(card, &OLD_PRICE).as_deref().and_then(normalize::number);
        let discount_percent = first_text(card, &DISCOUNT)
            .as_deref()
            .and_then(normalize::integer)
            .or_else(|| normalize::derive_discount(former_price, price));

        let detail_url = first_attr(card, &LINK, "href").and_then(|href| self.absolute(&href));
        let image_url = first_attr(card, &IMAGE, "src");

        let mut dimensions = None;
        let mut sleeping_dimensions = None;
        for item in card.select(&SPEC_ITEM) {
            let (Some(label), Some(value)) = (
                first_text(item, &SPEC_LABEL),
                first_text(item, &SPEC_VALUE).as_deref().and_then(normalize::dimensions),
            ) else {
                continue;
            };
            if label.contains(OVERALL_LABEL) && dimensions.is_none() {
                dimensions = Some(value);
            } else if label.contains(SLEEPING_LABEL) && sleeping_dimensions.is_none() {
                sleeping_dimensions = Some(value);
            }
        }

        Some(ListingRecord {
            name,
            price,
            former_price,
            discount_percent,
            dimensions,
            sleeping_dimensions,
            detail_url,
            image_url,
            source_page: page,
        })
    }

    fn absolute(&self, href: &str) -> Option<String> {
        match &self.origin {
            Some(origin) => origin.join(href).ok().map(String::from),
            None => Some(href.to_string()),
        }
    }
}

fn first_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
}

fn first_attr(el: ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    el.select(sel)
        .next()
        .and_then(|e| e.value().attr(attr))
        .map(str::to_string)
}

/// Count of elements matching each known card selector, for page debugging.
pub fn card_selector_counts(html: &str) -> Vec<(&'static str, usize)> {
    let doc = Html::parse_document(html);
    [r#"div[data-testid="product-card"]"#, "div._Ud0k", "div.product-card", ".catalog-item"]
        .into_iter()
        .filter_map(|s| Selector::parse(s).ok().map(|sel| (s, doc.select(&sel).count())))
        .collect()
}

/// `<title>` and `<meta name="description">` of a page.
pub fn page_summary(html: &str) -> (Option<String>, Option<String>) {
    let doc = Html::parse_document(html);
    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| doc.select(&sel).next().map(|t| t.text().collect::<String>().trim().to_string()));
    let description = Selector::parse(r#"meta[name="description"]"#)
        .ok()
        .and_then(|sel| doc.select(&sel).next().and_then(|m| m.value().attr("content")).map(str::to_string));
    (title, description)
}
