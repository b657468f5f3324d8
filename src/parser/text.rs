use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use super::normalize;
use super::patterns::{self, Candidate, Matcher};
use super::Keywords;
use crate::model::ListingRecord;

/// Lines searched on each side of a header for dimension strings.
const DIMENSION_WINDOW: usize = 5;
/// A record header may spread over this many consecutive non-blank lines.
const MAX_HEADER_LINES: usize = 3;

const SIZE: &str = r"(\d+(?:[.,]\d+)?(?:\s*[xхX×]\s*\d+(?:[.,]\d+)?)+)\s*см";

static OVERALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"Размеры(?:\s*\(ДхШхВ\))?\s*:?\s*{SIZE}")).unwrap());
static SLEEPING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"Спальное место(?:\s*\(ДхШхВ\))?\s*:?\s*{SIZE}")).unwrap()
});

/// Line-oriented extractor for catalog text (markdown or plain).
pub struct TextExtractor {
    matchers: Vec<Matcher>,
    keywords: Keywords,
    origin: Option<Url>,
}

impl TextExtractor {
    /// `origin` resolves relative product links such as `/product/...`.
    pub fn new(keywords: Keywords, origin: Option<Url>) -> Self {
        Self {
            matchers: patterns::ordered(),
            keywords,
            origin,
        }
    }

    /// Lazily yield accepted records from `text`. Never fails; unmatched lines
    /// are skipped.
    pub fn extract<'a>(&'a self, text: &'a str, page: u32) -> Listings<'a> {
        let lines = if looks_like_catalog(text) {
            text.lines().collect()
        } else {
            warn!(page, "page text does not look like a sofa catalog");
            Vec::new()
        };
        Listings {
            extractor: self,
            lines,
            cursor: 0,
            prev_header: None,
            page,
        }
    }

    fn resolve_link(&self, link: &str) -> Option<String> {
        if link.is_empty() {
            return None;
        }
        match &self.origin {
            Some(origin) => origin.join(link).ok().map(String::from),
            None => Some(link.to_string()),
        }
    }
}

/// Catalog text mentions sofas and carries prices.
pub fn looks_like_catalog(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("диван") && (lower.contains("руб.") || lower.contains('₽'))
}

pub struct Listings<'a> {
    extractor: &'a TextExtractor,
    lines: Vec<&'a str>,
    cursor: usize,
    prev_header: Option<usize>,
    page: u32,
}

impl Listings<'_> {
    /// Shortest run of up to `MAX_HEADER_LINES` non-blank lines starting at `i`
    /// that a pattern accepts, with the number of lines it used.
    fn match_at(&self, i: usize) -> Option<(Candidate, usize)> {
        let mut joined = String::new();
        for (used, line) in self.lines[i..].iter().take(MAX_HEADER_LINES).enumerate() {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if used > 0 {
                // a line that is a row by itself starts the next record
                if patterns::first_match(&self.extractor.matchers, line).is_some() {
                    break;
                }
                joined.push(' ');
            }
            joined.push_str(line);
            if let Some(c) = patterns::first_match(&self.extractor.matchers, &joined) {
                return Some((c, used + 1));
            }
        }
        None
    }

    fn next_header(&self, from: usize, until: usize) -> Option<usize> {
        let last = until.min(self.lines.len().saturating_sub(1));
        (from..=last).find(|&j| self.match_at(j).is_some())
    }

    /// Nearest dimension capture around `header`, bounded by neighbouring
    /// headers. Ties go to the earlier line.
    ///
    /// Lines above the header belong to the earlier record when there is one,
    /// so the window only looks upward for the first record on the page.
    fn find_dimension(
        &self,
        re: &Regex,
        header: usize,
        prev: Option<usize>,
        next: Option<usize>,
    ) -> Option<String> {
        let lo = match prev {
            Some(_) => header,
            None => header.saturating_sub(DIMENSION_WINDOW),
        };
        let mut hi = (header + DIMENSION_WINDOW).min(self.lines.len() - 1);
        if let Some(n) = next {
            hi = hi.min(n.saturating_sub(1));
        }

        let mut best: Option<(usize, String)> = None;
        for j in lo..=hi {
            let Some(size) = re.captures(self.lines[j]).and_then(|caps| normalize::dimensions(&caps[1])) else {
                continue;
            };
            let dist = j.abs_diff(header);
            if best.as_ref().map_or(true, |(d, _)| dist < *d) {
                best = Some((dist, size));
            }
        }
        best.map(|(_, v)| v)
    }

    fn build(
        &self,
        c: Candidate,
        header: usize,
        prev: Option<usize>,
        next: Option<usize>,
    ) -> ListingRecord {
        let price = normalize::number(&c.price);
        let former_price = c.former_price.as_deref().and_then(normalize::number);
        let discount_percent = c
            .discount
            .as_deref()
            .and_then(normalize::integer)
            .or_else(|| normalize::derive_discount(former_price, price));

        ListingRecord {
            name: c.name,
            price,
            former_price,
            discount_percent,
            dimensions: self.find_dimension(&OVERALL_RE, header, prev, next),
            sleeping_dimensions: self.find_dimension(&SLEEPING_RE, header, prev, next),
            detail_url: c.link.as_deref().and_then(|l| self.extractor.resolve_link(l)),
            image_url: None,
            source_page: self.page,
        }
    }
}

impl Iterator for Listings<'_> {
    type Item = ListingRecord;

    fn next(&mut self) -> Option<ListingRecord> {
        while self.cursor < self.lines.len() {
            let header = self.cursor;
            let Some((candidate, used)) = self.match_at(header) else {
                self.cursor += 1;
                continue;
            };
            self.cursor = header + used;
            debug!(line = header + 1, kind = ?candidate.kind, "record header");

            let prev = self.prev_header.replace(header);
            let next = self.next_header(self.cursor, header + DIMENSION_WINDOW);
            let record = self.build(candidate, header, prev, next);

            if self.extractor.keywords.accepts(&record.name) {
                return Some(record);
            }
            debug!(name = %record.name, "rejected: no keyword in name");
        }
        None
    }
}
