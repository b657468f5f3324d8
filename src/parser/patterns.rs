use std::sync::LazyLock;

use regex::Regex;

// Building blocks. Prices allow spaced thousands ("41 150") including NBSP.
const LINKED_NAME: &str = r"^\[([^\]]+)\]\(([^)\s]*)\)\s*";
const PLAIN_NAME: &str = r"^([^\[\]\d\s][^\[\]]*?)\s+";
const PRICE: &str = r"(\d+(?:\s\d{3})*)\s*(?:руб\.?|₽)";
const DISCOUNT: &str = r"\s*[-−]?(\d{1,3})\s*%?(?:\s*$|\s+[^\d\s])";

static LINKED_FULL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"{LINKED_NAME}{PRICE}\s*{PRICE}{DISCOUNT}")).unwrap());
static PLAIN_FULL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"{PLAIN_NAME}{PRICE}\s*{PRICE}{DISCOUNT}")).unwrap());
static LINKED_DISCOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"{LINKED_NAME}{PRICE}{DISCOUNT}")).unwrap());
static PLAIN_DISCOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"{PLAIN_NAME}{PRICE}{DISCOUNT}")).unwrap());

// A plain name never carries a currency marker or a spaced-thousands price.
static NAME_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)руб|₽|\d\s\d{3}(?:\D|$)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// `[name](link) price руб. former руб. discount`
    LinkedFull,
    /// `name price руб. former руб. discount`
    PlainFull,
    /// `[name](link) price руб. discount`
    LinkedDiscount,
    /// `name price руб. discount`
    PlainDiscount,
}

impl PatternKind {
    fn has_link(self) -> bool {
        matches!(self, PatternKind::LinkedFull | PatternKind::LinkedDiscount)
    }

    fn has_former_price(self) -> bool {
        matches!(self, PatternKind::LinkedFull | PatternKind::PlainFull)
    }
}

/// Raw captures of one matched line, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: PatternKind,
    pub name: String,
    pub link: Option<String>,
    pub price: String,
    pub former_price: Option<String>,
    pub discount: Option<String>,
}

pub struct Matcher {
    kind: PatternKind,
    re: &'static Regex,
}

impl Matcher {
    pub fn try_match(&self, text: &str) -> Option<Candidate> {
        let caps = self.re.captures(text)?;
        let mut groups = caps.iter().skip(1).map(|m| m.map(|m| m.as_str().trim().to_string()));
        let mut next = || groups.next().flatten();

        let name = next()?;
        if name.is_empty() || (!self.kind.has_link() && NAME_NOISE.is_match(&name)) {
            return None;
        }
        let link = if self.kind.has_link() { next() } else { None };
        let price = next()?;
        let former_price = if self.kind.has_former_price() { next() } else { None };
        let discount = next();

        Some(Candidate {
            kind: self.kind,
            name,
            link,
            price,
            former_price,
            discount,
        })
    }
}

/// Matchers in priority order: full rows before discount-only, bracketed
/// before plain.
pub fn ordered() -> Vec<Matcher> {
    vec![
        Matcher { kind: PatternKind::LinkedFull, re: &LINKED_FULL },
        Matcher { kind: PatternKind::PlainFull, re: &PLAIN_FULL },
        Matcher { kind: PatternKind::LinkedDiscount, re: &LINKED_DISCOUNT },
        Matcher { kind: PatternKind::PlainDiscount, re: &PLAIN_DISCOUNT },
    ]
}

/// First matcher that accepts `text` wins.
pub fn first_match(matchers: &[Matcher], text: &str) -> Option<Candidate> {
    matchers.iter().find_map(|m| m.try_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(text: &str) -> Option<Candidate> {
        first_match(&ordered(), text)
    }

    #[test]
    fn linked_full_row() {
        let c = matched(
            "[Диван прямой Филс-Мини 120 Velvet Terra](/product/divan-pryamoj-fils-mini-120-velvet-terra) 41 150руб.58 790руб. 30",
        )
        .unwrap();
        assert_eq!(c.kind, PatternKind::LinkedFull);
        assert_eq!(c.name, "Диван прямой Филс-Мини 120 Velvet Terra");
        assert_eq!(c.link.as_deref(), Some("/product/divan-pryamoj-fils-mini-120-velvet-terra"));
        assert_eq!(c.price, "41 150");
        assert_eq!(c.former_price.as_deref(), Some("58 790"));
        assert_eq!(c.discount.as_deref(), Some("30"));
    }

    #[test]
    fn plain_full_row() {
        let c = matched("Диван угловой Нордика 88 190 руб. 117 590 руб. -25%").unwrap();
        assert_eq!(c.kind, PatternKind::PlainFull);
        assert_eq!(c.name, "Диван угловой Нордика");
        assert_eq!(c.link, None);
        assert_eq!(c.price, "88 190");
        assert_eq!(c.former_price.as_deref(), Some("117 590"));
        assert_eq!(c.discount.as_deref(), Some("25"));
    }

    #[test]
    fn discount_only_rows() {
        let c = matched("[Диван Лонди](/product/divan-londi) 80 840₽ 15").unwrap();
        assert_eq!(c.kind, PatternKind::LinkedDiscount);
        assert_eq!(c.former_price, None);
        assert_eq!(c.discount.as_deref(), Some("15"));

        let c = matched("Диван Лонди 80 840руб. 15").unwrap();
        assert_eq!(c.kind, PatternKind::PlainDiscount);
        assert_eq!(c.name, "Диван Лонди");
        assert_eq!(c.price, "80 840");
    }

    #[test]
    fn thousands_group_is_not_a_discount() {
        // Without a trailing discount the second price must not be read as one.
        assert!(matched("[Диван Мелоу](/product/melou) 80 840руб.101 420руб.").is_none());
    }

    #[test]
    fn numeric_lines_are_not_names() {
        assert!(matched("41 150руб.58 790руб. 30").is_none());
        assert!(matched("30").is_none());
        assert!(matched("Спальное место (ДхШхВ):198 x 120 x 36 см").is_none());
    }

    #[test]
    fn plain_name_cannot_span_a_price() {
        assert!(matched("Диван Альфа 10 000руб. Диван Бета 20 000руб. 25 000руб. 20").is_none());
        assert!(matched("Диван Альфа 10 000 ₽ Диван Бета 20 000 ₽ 25 000 ₽ 20").is_none());
        // plain digits in a model name are fine
        let c = matched("Диван Филс-Мини 120 41 150руб. 58 790руб. 30").unwrap();
        assert_eq!(c.name, "Диван Филс-Мини 120");
    }

    #[test]
    fn priority_prefers_full_rows() {
        let matchers = ordered();
        let text = "[Диван Спейс](/product/divan-spejs) 99 950руб.136 700руб. 26";
        let kinds: Vec<_> = matchers
            .iter()
            .filter(|m| m.try_match(text).is_some())
            .map(|m| m.kind)
            .collect();
        assert_eq!(kinds.first(), Some(&PatternKind::LinkedFull));
        assert_eq!(first_match(&matchers, text).unwrap().kind, PatternKind::LinkedFull);
    }
}
