use std::collections::HashSet;

use serde::Deserialize;

use super::extract::mileage::{extract_mileage, mileage_from_text_within};
use super::extract::price::extract_price_within;
use super::extract::vin::{extract_vin, scan_vins, VinLocators};
use super::extract::Bounds;
use super::html::{
    context_window, element_text, enclosing, locate_text, select_within, strip_tags, Locator, Page,
};
use crate::vin::Vin;

/// One listing found on a results page. Either the VIN is already known, or
/// `detail_url` points at the page that holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub vin: Option<Vin>,
    pub detail_url: Option<String>,
    pub price: Option<i64>,
    pub mileage: Option<i64>,
}

/// Fields read from a listing's own detail page.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailFields {
    pub vin: Option<Vin>,
    pub mileage: Option<i64>,
}

/// How a source lays out its results.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Cards link to detail pages; the VIN lives on the detail page.
    DetailPages {
        card: String,
        link: String,
        base_url: String,
        price: Locator,
        #[serde(default)]
        card_mileage: Vec<Locator>,
        vin: VinLocators,
        #[serde(default)]
        detail_mileage: Vec<Locator>,
    },
    /// VINs sit in an attribute (`data-vin`) on each result element.
    VinAttribute {
        attribute: String,
        containers: Vec<String>,
        context_chars: usize,
        #[serde(default)]
        scan_text: bool,
        #[serde(default)]
        min_digits: usize,
    },
    /// VINs appear somewhere in card text or markup.
    CardScan {
        cards: Vec<String>,
        max_cards: usize,
        context_chars: usize,
        max_page_vins: usize,
        min_digits: usize,
    },
}

impl Strategy {
    pub fn needs_detail_pages(&self) -> bool {
        matches!(self, Strategy::DetailPages { .. })
    }
}

/// Split a results page into candidates. Never fails: markup that doesn't
/// match yields fewer (or zero) candidates.
pub fn listing_candidates(
    strategy: &Strategy,
    html: &str,
    price_bounds: &Bounds,
    mileage_bounds: &Bounds,
) -> Vec<Candidate> {
    let page = Page::parse(html);
    match strategy {
        Strategy::DetailPages {
            card,
            link,
            base_url,
            price,
            card_mileage,
            ..
        } => detail_cards(
            &page,
            card,
            link,
            base_url,
            price,
            card_mileage,
            price_bounds,
            mileage_bounds,
        ),
        Strategy::VinAttribute {
            attribute,
            containers,
            context_chars,
            scan_text,
            min_digits,
        } => attribute_vins(
            &page,
            attribute,
            containers,
            *context_chars,
            *scan_text,
            *min_digits,
            price_bounds,
            mileage_bounds,
        ),
        Strategy::CardScan {
            cards,
            max_cards,
            context_chars,
            max_page_vins,
            min_digits,
        } => scanned_cards(
            &page,
            html,
            cards,
            *max_cards,
            *context_chars,
            *max_page_vins,
            *min_digits,
            price_bounds,
            mileage_bounds,
        ),
    }
}

/// Read VIN and mileage from a detail page. `None` for strategies that don't
/// use detail pages.
pub fn detail_fields(strategy: &Strategy, html: &str) -> Option<DetailFields> {
    let Strategy::DetailPages {
        vin, detail_mileage, ..
    } = strategy
    else {
        return None;
    };
    let page = Page::parse(html);
    Some(DetailFields {
        vin: extract_vin(&page, vin),
        mileage: extract_mileage(&page, detail_mileage),
    })
}

pub fn absolute_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), href)
    }
}

#[allow(clippy::too_many_arguments)]
fn detail_cards(
    page: &Page,
    card_css: &str,
    link_css: &str,
    base_url: &str,
    price: &Locator,
    card_mileage: &[Locator],
    price_bounds: &Bounds,
    mileage_bounds: &Bounds,
) -> Vec<Candidate> {
    page.select_all(card_css)
        .iter()
        .filter_map(|card| {
            let href = select_within(card, link_css)
                .first()
                .and_then(|a| a.value().attr("href"))
                .map(str::trim)
                .filter(|h| !h.is_empty())?;
            let price = locate_text(card, price).and_then(|t| {
                extract_price_within(&t, price_bounds).or_else(|| bare_number(&t, price_bounds))
            });
            let mileage = card_mileage.iter().find_map(|loc| {
                let text = locate_text(card, loc)?;
                mileage_from_text_within(&text, mileage_bounds)
                    .or_else(|| bare_number(&text, mileage_bounds))
            });
            Some(Candidate {
                vin: None,
                detail_url: Some(absolute_url(base_url, href)),
                price,
                mileage,
            })
        })
        .collect()
}

/// "12,500" with no currency or unit marker, as found in a dedicated element.
fn bare_number(text: &str, bounds: &Bounds) -> Option<i64> {
    let token: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .collect();
    super::extract::parse_grouped(token.trim_end_matches(','))
        .filter(|n| bounds.contains(*n))
}

fn context_fields(
    text: &str,
    pos: usize,
    len: usize,
    radius: usize,
    price_bounds: &Bounds,
    mileage_bounds: &Bounds,
) -> (Option<i64>, Option<i64>) {
    let window = context_window(text, pos, len, radius);
    (
        extract_price_within(window, price_bounds),
        mileage_from_text_within(window, mileage_bounds),
    )
}

#[allow(clippy::too_many_arguments)]
fn attribute_vins(
    page: &Page,
    attribute: &str,
    containers: &[String],
    context_chars: usize,
    scan_text: bool,
    min_digits: usize,
    price_bounds: &Bounds,
    mileage_bounds: &Bounds,
) -> Vec<Candidate> {
    let text = page.text();
    let container_tags: Vec<&str> = containers.iter().map(String::as_str).collect();
    let mut seen: HashSet<Vin> = HashSet::new();
    let mut out = Vec::new();

    for el in page.select_all(&format!("[{attribute}]")) {
        let Some(raw) = el.value().attr(attribute) else {
            continue;
        };
        let Ok(vin) = Vin::parse_strict(&raw.trim().to_uppercase()) else {
            continue;
        };
        if !seen.insert(vin.clone()) {
            continue;
        }

        let (mut price, mut mileage) = (None, None);
        if let Some(parent) = enclosing(&el, &container_tags) {
            let parent_text = element_text(&parent);
            price = extract_price_within(&parent_text, price_bounds);
            mileage = mileage_from_text_within(&parent_text, mileage_bounds);
        }
        if price.is_none() || mileage.is_none() {
            if let Some(pos) = text.find(vin.as_str()) {
                let (p, m) = context_fields(
                    &text,
                    pos,
                    vin.as_str().len(),
                    context_chars,
                    price_bounds,
                    mileage_bounds,
                );
                price = price.or(p);
                mileage = mileage.or(m);
            }
        }
        out.push(Candidate {
            vin: Some(vin),
            detail_url: None,
            price,
            mileage,
        });
    }

    if scan_text {
        for (vin, pos) in scan_vins(&text, min_digits) {
            if !seen.insert(vin.clone()) {
                continue;
            }
            let (price, mileage) = context_fields(
                &text,
                pos,
                vin.as_str().len(),
                context_chars,
                price_bounds,
                mileage_bounds,
            );
            out.push(Candidate {
                vin: Some(vin),
                detail_url: None,
                price,
                mileage,
            });
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn scanned_cards(
    page: &Page,
    html: &str,
    card_selectors: &[String],
    max_cards: usize,
    context_chars: usize,
    max_page_vins: usize,
    min_digits: usize,
    price_bounds: &Bounds,
    mileage_bounds: &Bounds,
) -> Vec<Candidate> {
    let mut seen: HashSet<Vin> = HashSet::new();
    let mut out = Vec::new();

    let cards = card_selectors
        .iter()
        .flat_map(|css| page.select_all(css))
        .take(max_cards);
    for card in cards {
        let text = element_text(&card);
        let markup = card.html();
        let vin = scan_vins(&text, min_digits)
            .into_iter()
            .next()
            .or_else(|| scan_vins(&markup, min_digits).into_iter().next())
            .map(|(vin, _)| vin);
        let Some(vin) = vin else {
            continue;
        };
        if !seen.insert(vin.clone()) {
            continue;
        }
        let price = extract_price_within(&text, price_bounds);
        let mileage = mileage_from_text_within(&text, mileage_bounds)
            .or_else(|| mileage_from_text_within(&strip_tags(&markup), mileage_bounds));
        out.push(Candidate {
            vin: Some(vin),
            detail_url: None,
            price,
            mileage,
        });
    }

    let mut page_vins = 0;
    for (vin, pos) in scan_vins(html, min_digits) {
        if page_vins >= max_page_vins {
            break;
        }
        if !seen.insert(vin.clone()) {
            continue;
        }
        page_vins += 1;
        let window = strip_tags(context_window(html, pos, vin.as_str().len(), context_chars));
        let price = extract_price_within(&window, price_bounds);
        let mileage = mileage_from_text_within(&window, mileage_bounds);
        if price.is_some() || mileage.is_some() {
            out.push(Candidate {
                vin: Some(vin),
                detail_url: None,
                price,
                mileage,
            });
        }
    }
    out
}
