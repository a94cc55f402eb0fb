//! Barcode: the human-meaningful, tenant-unique key of an item.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Maximum accepted barcode length (label printers truncate beyond this).
pub const MAX_BARCODE_LEN: usize = 64;

/// Item key, unique within a tenant and immutable once assigned.
///
/// Barcodes are trimmed on construction and must be non-empty, printable and
/// free of whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Barcode(String);

impl Barcode {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_payload("barcode cannot be empty"));
        }
        if trimmed.len() > MAX_BARCODE_LEN {
            return Err(DomainError::invalid_payload(format!(
                "barcode '{trimmed}' exceeds {MAX_BARCODE_LEN} characters"
            )));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DomainError::invalid_payload(format!(
                "barcode '{trimmed}' contains whitespace or control characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split `PREFIX-0042` into (`PREFIX`, 42). Returns `None` for barcodes
    /// that do not follow the allocated format.
    pub fn sequence_parts(&self) -> Option<(&str, u64)> {
        let (prefix, digits) = self.0.rsplit_once('-')?;
        if prefix.is_empty() || digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(|n| (prefix, n))
    }
}

impl core::fmt::Display for Barcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Barcode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Barcode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Barcode> for String {
    fn from(value: Barcode) -> Self {
        value.0
    }
}

impl AsRef<str> for Barcode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_and_rejects_blank() {
        assert_eq!(Barcode::parse("  TRI-0001 ").unwrap().as_str(), "TRI-0001");
        assert!(Barcode::parse("   ").is_err());
        assert!(Barcode::parse("A B").is_err());
    }

    #[test]
    fn sequence_parts_only_for_numeric_suffix() {
        let b = Barcode::parse("CR-0042").unwrap();
        assert_eq!(b.sequence_parts(), Some(("CR", 42)));
        assert_eq!(Barcode::parse("CR-00A2").unwrap().sequence_parts(), None);
        assert_eq!(Barcode::parse("12345").unwrap().sequence_parts(), None);
        assert_eq!(Barcode::parse("-12").unwrap().sequence_parts(), None);
    }

    #[test]
    fn deserialization_validates() {
        let ok: Barcode = serde_json::from_str("\"TRI-0001\"").unwrap();
        assert_eq!(ok.as_str(), "TRI-0001");
        assert!(serde_json::from_str::<Barcode>("\"\"").is_err());
    }
}
