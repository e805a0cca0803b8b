use std::sync::LazyLock;

use regex::Regex;

use super::{parse_grouped, Bounds};

// "$12,500", "$ 9900", "12,500 USD"
static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[$€£]\s?(\d[\d,\x{a0}\x{202f}]*\d|\d)|(\d[\d,]*\d|\d)\s?(?:[$€£]|USD\b))").unwrap()
});

fn candidates(text: &str) -> impl Iterator<Item = i64> + '_ {
    PRICE_RE.captures_iter(text).filter_map(|caps| {
        let m = caps.get(1).or_else(|| caps.get(2))?;
        parse_grouped(m.as_str())
    })
}

/// First currency-marked amount in `text`, in whole units.
pub fn extract_price(text: &str) -> Option<i64> {
    candidates(text).next()
}

/// First currency-marked amount inside `bounds`; out-of-window amounts (monthly
/// payments, "save $500") are skipped.
pub fn extract_price_within(text: &str, bounds: &Bounds) -> Option<i64> {
    candidates(text).find(|p| bounds.contains(*p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_with_separator() {
        assert_eq!(extract_price("$12,500"), Some(12500));
    }

    #[test]
    fn embedded_in_card_text() {
        assert_eq!(extract_price("2016 Honda Civic LX  Price: $ 9900  est. $180/mo"), Some(9900));
        assert_eq!(extract_price("15,250 USD"), Some(15250));
    }

    #[test]
    fn no_currency_no_price() {
        assert_eq!(extract_price("45,000 miles"), None);
        assert_eq!(extract_price("$"), None);
        assert_eq!(extract_price(""), None);
    }

    #[test]
    fn window_skips_monthly_payment() {
        let b = Bounds::new(1_000, 200_000);
        assert_eq!(extract_price_within("$299/mo or $18,995", &b), Some(18995));
        assert_eq!(extract_price_within("$299/mo", &b), None);
    }
}
