pub mod mileage;
pub mod price;
pub mod vin;

use serde::Deserialize;

/// Inclusive plausibility window for a numeric field. Each source profile
/// carries its own; there is no global bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Bounds {
    pub min: i64,
    pub max: i64,
}

impl Bounds {
    pub const fn new(min: i64, max: i64) -> Self {
        Bounds { min, max }
    }

    /// Accept everything non-negative.
    pub const fn open() -> Self {
        Bounds {
            min: 0,
            max: i64::MAX,
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// One step of a fallback chain.
pub type Layer<'a, T> = &'a dyn Fn() -> Option<T>;

/// Evaluate layers in priority order; the first hit wins and nothing after
/// it runs.
pub fn first_hit<T>(layers: &[Layer<'_, T>]) -> Option<T> {
    layers.iter().find_map(|layer| layer())
}

/// Parse a digit group with optional thousands separators ("12,500", "45 120").
pub fn parse_grouped(raw: &str) -> Option<i64> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\u{a0}' | '\u{202f}'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
