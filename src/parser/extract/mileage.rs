use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{first_hit, parse_grouped, Bounds};
use crate::parser::html::{Locator, Page};

const JSON_KEYS: &[&str] = &["mileageFromOdometer", "mileage", "odometer", "vehicleMileage"];
const JSON_MAX_DEPTH: usize = 4;

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:mileage|odometer)\s*:?\s*(\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?)\s*(k\b)?")
        .unwrap()
});
static THOUSANDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*k\s*(?:miles|mi)\b").unwrap());
static MILES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,3}(?:,\d{3})+|\d+)\s*(?:miles|mi)\b").unwrap()
});
static DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,3}(?:,\d{3})+|\d+").unwrap());

fn parse_thousands(raw: &str) -> Option<i64> {
    let n: f64 = raw.parse().ok()?;
    Some((n * 1000.0).round() as i64)
}

/// Every mileage reading in `text`, pattern by pattern: labelled first, then
/// "45k miles", then "45,120 miles".
fn text_candidates(text: &str) -> impl Iterator<Item = i64> + '_ {
    let labelled = LABEL_RE.captures_iter(text).filter_map(|c| match c.get(2) {
        Some(_) => parse_thousands(&c[1]),
        None => parse_grouped(&c[1]),
    });
    let thousands = THOUSANDS_RE
        .captures_iter(text)
        .filter_map(|c| parse_thousands(&c[1]));
    let plain = MILES_RE
        .captures_iter(text)
        .filter_map(|c| parse_grouped(&c[1]));
    labelled.chain(thousands).chain(plain)
}

pub fn mileage_from_text(text: &str) -> Option<i64> {
    text_candidates(text).next()
}

pub fn mileage_from_text_within(text: &str, bounds: &Bounds) -> Option<i64> {
    text_candidates(text).find(|m| bounds.contains(*m))
}

/// Look for an odometer key in structured data. Values may be numbers,
/// strings ("45,120 mi") or `{"value": ..}` / `{"@value": ..}` objects.
pub fn mileage_from_json(value: &Value) -> Option<i64> {
    json_search(value, 0)
}

fn json_search(value: &Value, depth: usize) -> Option<i64> {
    if depth > JSON_MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => JSON_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(json_scalar))
            .or_else(|| map.values().find_map(|v| json_search(v, depth + 1))),
        Value::Array(items) => items.iter().find_map(|v| json_search(v, depth + 1)),
        _ => None,
    }
}

fn json_scalar(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => DIGITS_RE.find(s).and_then(|m| parse_grouped(m.as_str())),
        Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("@value"))
            .and_then(json_scalar),
        _ => None,
    }
}

/// Element text is usually just "45,120 mi." but may be a bare number.
fn mileage_from_element_text(text: &str) -> Option<i64> {
    mileage_from_text(text).or_else(|| {
        DIGITS_RE
            .find_iter(text)
            .find_map(|m| parse_grouped(m.as_str()))
    })
}

/// Three-layer chain: embedded structured data, labelled elements, then a
/// regex pass over the page text.
pub fn extract_mileage(page: &Page, locators: &[Locator]) -> Option<i64> {
    let from_json = || page.json_ld().iter().find_map(mileage_from_json);
    let from_elements = || {
        locators
            .iter()
            .find_map(|loc| page.locate_text(loc).and_then(|t| mileage_from_element_text(&t)))
    };
    let from_text = || mileage_from_text(&page.text());
    first_hit(&[&from_json, &from_elements, &from_text])
}
