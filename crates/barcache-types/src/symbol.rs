//! Normalized instrument codes.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::SymbolError;

/// A canonical instrument code.
///
/// Codes are upper-cased and every share-class separator (`/`, `-`, `_`,
/// space) is mapped to `.`, so `brk/b`, `BRK-B` and `BRK.B` all name the
/// same symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SymbolCode(String);

impl SymbolCode {
    /// Maximum length of a canonical code.
    pub const MAX_LEN: usize = 12;

    /// Canonical share-class separator.
    pub const CLASS_SEPARATOR: char = '.';

    /// Normalizes raw caller input into a canonical code.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is empty, too long, contains characters
    /// other than ASCII alphanumerics and separators, or starts or ends with
    /// a separator.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let code: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '-' | '_' | ' ' => Self::CLASS_SEPARATOR,
                other => other.to_ascii_uppercase(),
            })
            .collect();

        if code.is_empty() {
            return Err(SymbolError::Empty);
        }
        if code.len() > Self::MAX_LEN {
            return Err(SymbolError::TooLong {
                code,
                max: Self::MAX_LEN,
            });
        }
        if let Some(ch) = code
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != Self::CLASS_SEPARATOR)
        {
            return Err(SymbolError::InvalidCharacter { code, ch });
        }
        if code.starts_with(Self::CLASS_SEPARATOR) || code.ends_with(Self::CLASS_SEPARATOR) {
            return Err(SymbolError::DanglingSeparator(code));
        }

        Ok(Self(code))
    }

    /// Returns the canonical code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the code carries a share-class designator (e.g. `BRK.B`).
    #[must_use]
    pub fn has_class(&self) -> bool {
        self.0.contains(Self::CLASS_SEPARATOR)
    }

    /// Renders the code with a vendor-specific class separator.
    #[must_use]
    pub fn with_class_separator(&self, separator: char) -> String {
        self.0.replace(Self::CLASS_SEPARATOR, &separator.to_string())
    }
}

impl std::fmt::Display for SymbolCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SymbolCode {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SymbolCode {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SymbolCode> for String {
    fn from(code: SymbolCode) -> Self {
        code.0
    }
}

impl AsRef<str> for SymbolCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_case_and_separators() {
        assert_eq!(SymbolCode::parse(" aapl ").unwrap().as_str(), "AAPL");
        assert_eq!(SymbolCode::parse("brk/b").unwrap().as_str(), "BRK.B");
        assert_eq!(SymbolCode::parse("BRK-B").unwrap().as_str(), "BRK.B");
        assert_eq!(SymbolCode::parse("brk_b").unwrap().as_str(), "BRK.B");
        assert_eq!(
            SymbolCode::parse("BRK-B").unwrap(),
            SymbolCode::parse("brk.b").unwrap()
        );
    }

    #[test]
    fn test_rejects_invalid_codes() {
        assert_eq!(SymbolCode::parse("   "), Err(SymbolError::Empty));
        assert!(matches!(
            SymbolCode::parse("AAPL$"),
            Err(SymbolError::InvalidCharacter { ch: '$', .. })
        ));
        assert!(matches!(
            SymbolCode::parse("ABCDEFGHIJKLM"),
            Err(SymbolError::TooLong { .. })
        ));
        assert!(matches!(
            SymbolCode::parse("-B"),
            Err(SymbolError::DanglingSeparator(_))
        ));
    }

    #[test]
    fn test_vendor_separator() {
        let code = SymbolCode::parse("BRK.B").unwrap();
        assert!(code.has_class());
        assert_eq!(code.with_class_separator('/'), "BRK/B");
        assert_eq!(code.with_class_separator('.'), "BRK.B");
    }
}
