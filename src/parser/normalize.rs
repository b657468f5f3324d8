//! Numeric cleanup for captured price and discount strings.

/// Keep only ASCII digits. `"41 150руб."` → `"41150"`.
pub fn digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Price-like capture to a number; `None` when no digits remain.
pub fn number(raw: &str) -> Option<f64> {
    let d = digits(raw);
    if d.is_empty() {
        return None;
    }
    d.parse().ok()
}

/// Discount-like capture to an integer; `None` when no digits remain.
pub fn integer(raw: &str) -> Option<i32> {
    let d = digits(raw);
    if d.is_empty() {
        return None;
    }
    d.parse().ok()
}

/// `round((old - new) / old * 100)` when both prices exist and `old > new`.
/// Not clamped: inconsistent inputs produce whatever the formula gives.
pub fn derive_discount(former: Option<f64>, current: Option<f64>) -> Option<i32> {
    match (former, current) {
        (Some(old), Some(new)) if old > new && old > 0.0 => {
            Some(((old - new) / old * 100.0).round() as i32)
        }
        _ => None,
    }
}

/// Size string without the trailing unit: `"205 x 112 x 92 см"` → `"205 x 112 x 92"`.
pub fn dimensions(raw: &str) -> Option<String> {
    let size = raw.trim().trim_end_matches("см").trim_end();
    (!size.is_empty()).then(|| size.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_spaces_and_currency() {
        assert_eq!(number("41 150руб."), Some(41150.0));
        assert_eq!(number("58\u{a0}790 ₽"), Some(58790.0));
        assert_eq!(integer("-30%"), Some(30));
    }

    #[test]
    fn empty_is_absent() {
        assert_eq!(number(""), None);
        assert_eq!(number("руб."), None);
        assert_eq!(integer("  "), None);
    }

    #[test]
    fn idempotent_on_clean_digits() {
        for raw in ["41150", "0", "117590", "41 150руб."] {
            let once = digits(raw);
            assert_eq!(digits(&once), once);
            assert_eq!(number(&once), number(raw));
        }
    }

    #[test]
    fn dimensions_drop_unit() {
        assert_eq!(dimensions("205 x 112 x 92 см").as_deref(), Some("205 x 112 x 92"));
        assert_eq!(dimensions(" 198 x 120 x 36").as_deref(), Some("198 x 120 x 36"));
        assert_eq!(dimensions("см"), None);
    }

    #[test]
    fn derived_discount_rounds() {
        assert_eq!(derive_discount(Some(58790.0), Some(41150.0)), Some(30));
        assert_eq!(derive_discount(Some(101420.0), Some(80840.0)), Some(20));
    }

    #[test]
    fn derived_discount_requires_drop() {
        assert_eq!(derive_discount(Some(100.0), Some(100.0)), None);
        assert_eq!(derive_discount(Some(90.0), Some(100.0)), None);
        assert_eq!(derive_discount(None, Some(100.0)), None);
        assert_eq!(derive_discount(Some(100.0), None), None);
    }
}
