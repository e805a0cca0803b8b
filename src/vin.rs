use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

pub const VIN_LEN: usize = 17;

const CHECK_WEIGHTS: [u32; VIN_LEN] = [8, 7, 6, 5, 4, 3, 2, 10, 0, 9, 8, 7, 6, 5, 4, 3, 2];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VinError {
    #[error("empty VIN")]
    Empty,
    #[error("VIN has {0} usable characters, expected 17")]
    WrongLength(usize),
    #[error("VIN contains forbidden character '{0}'")]
    ForbiddenChar(char),
}

/// A 17-character Vehicle Identification Number over `[A-HJ-NPR-Z0-9]`.
///
/// Only constructible through [`normalize`] or [`Vin::parse_strict`], so every
/// value in circulation satisfies the length and alphabet rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vin(String);

/// Allowed VIN characters: digits and uppercase letters except I, O, Q.
pub fn is_vin_char(c: char) -> bool {
    c.is_ascii_digit() || (c.is_ascii_uppercase() && !matches!(c, 'I' | 'O' | 'Q'))
}

/// Uppercase, trim, drop every character outside the VIN alphabet, then
/// require exactly 17 characters.
pub fn normalize(raw: &str) -> Result<Vin, VinError> {
    let upper = raw.trim().to_uppercase();
    if upper.is_empty() {
        return Err(VinError::Empty);
    }
    let cleaned: String = upper.chars().filter(|c| is_vin_char(*c)).collect();
    if cleaned.len() != VIN_LEN {
        return Err(VinError::WrongLength(cleaned.len()));
    }
    Ok(Vin(cleaned))
}

/// `normalize` for values that may be absent.
pub fn normalize_opt(raw: Option<&str>) -> Result<Vin, VinError> {
    raw.map_or(Err(VinError::Empty), normalize)
}

impl Vin {
    /// Accept a token as-is: no case folding, no stripping. Used for values that
    /// already claim to be a VIN (markup attributes, regex hits).
    pub fn parse_strict(token: &str) -> Result<Vin, VinError> {
        if token.is_empty() {
            return Err(VinError::Empty);
        }
        if let Some(bad) = token.chars().find(|c| !is_vin_char(*c)) {
            return Err(VinError::ForbiddenChar(bad));
        }
        if token.len() != VIN_LEN {
            return Err(VinError::WrongLength(token.len()));
        }
        Ok(Vin(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// World Manufacturer Identifier (first three characters).
    pub fn wmi(&self) -> &str {
        &self.0[..3]
    }

    pub fn digit_count(&self) -> usize {
        self.0.chars().filter(|c| c.is_ascii_digit()).count()
    }

    /// ISO 3779 position-9 check digit. Informational only: callers log
    /// mismatches but never reject on them.
    pub fn check_digit_matches(&self) -> bool {
        let sum: u32 = self
            .0
            .chars()
            .zip(CHECK_WEIGHTS)
            .map(|(c, w)| transliterate(c) * w)
            .sum();
        let expected = match sum % 11 {
            10 => 'X',
            n => char::from_digit(n, 10).unwrap_or('?'),
        };
        self.0.chars().nth(8) == Some(expected)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

fn transliterate(c: char) -> u32 {
    if let Some(d) = c.to_digit(10) {
        return d;
    }
    match c {
        'A' | 'J' => 1,
        'B' | 'K' | 'S' => 2,
        'C' | 'L' | 'T' => 3,
        'D' | 'M' | 'U' => 4,
        'E' | 'N' | 'V' => 5,
        'F' | 'W' => 6,
        'G' | 'P' | 'X' => 7,
        'H' | 'Y' => 8,
        'R' | 'Z' => 9,
        _ => 0,
    }
}

impl fmt::Display for Vin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Vin {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Vin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercase_with_spaces() {
        let vin = normalize("1hg c m82633a004352").unwrap();
        assert_eq!(vin.as_str(), "1HGCM82633A004352");
    }

    #[test]
    fn sixteen_chars_rejected() {
        assert_eq!(normalize("1HGCM82633A00435"), Err(VinError::WrongLength(16)));
    }

    #[test]
    fn empty_and_blank_rejected() {
        assert_eq!(normalize(""), Err(VinError::Empty));
        assert_eq!(normalize("   "), Err(VinError::Empty));
        assert_eq!(normalize_opt(None), Err(VinError::Empty));
    }

    #[test]
    fn punctuation_stripped() {
        let vin = normalize(" 1HG-CM826.33A/004352 ").unwrap();
        assert_eq!(vin.as_str(), "1HGCM82633A004352");
    }

    #[test]
    fn forbidden_letters_are_stripped_not_kept() {
        // The O is dropped by the alphabet filter, leaving 17 valid chars.
        let vin = normalize("1HGCM82633AO004352").unwrap();
        assert!(!vin.as_str().contains(['I', 'O', 'Q']));
        assert_eq!(vin.as_str().len(), VIN_LEN);
    }

    #[test]
    fn idempotent() {
        let once = normalize("1hgcm82633a004352").unwrap();
        let twice = normalize(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn accepted_vins_respect_alphabet() {
        for raw in ["jh4ka7561pc008269", "1M8GDM9AXKP042788", "wvw zzz1jz xw000001"] {
            if let Ok(vin) = normalize(raw) {
                assert_eq!(vin.as_str().len(), VIN_LEN);
                assert!(vin.as_str().chars().all(is_vin_char));
            }
        }
    }

    #[test]
    fn strict_rejects_forbidden_letter() {
        assert_eq!(
            Vin::parse_strict("1HGCM82633AI04352"),
            Err(VinError::ForbiddenChar('I'))
        );
        assert!(Vin::parse_strict("1hgcm82633a004352").is_err());
        assert!(Vin::parse_strict("1HGCM82633A004352").is_ok());
    }

    #[test]
    fn check_digit() {
        assert!(normalize("1M8GDM9AXKP042788").unwrap().check_digit_matches());
        assert!(normalize("1HGCM82633A004352").unwrap().check_digit_matches());
        assert!(!normalize("1FTFW1ET5DFC10312").unwrap().check_digit_matches());
    }

    #[test]
    fn wmi_prefix() {
        assert_eq!(normalize("1HGCM82633A004352").unwrap().wmi(), "1HG");
    }
}
