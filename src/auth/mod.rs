//! Caller identity
//!
//! Authentication happens upstream; requests arrive with an already-verified
//! principal in the `X-Principal` header. This module only checks its shape.

mod middleware;

pub use middleware::{principal_middleware, PRINCIPAL_HEADER};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static PRINCIPAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:@-]{0,127}$").expect("principal pattern compiles")
});

/// Verified caller identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    pub fn parse(raw: &str) -> Result<Self, InvalidPrincipal> {
        let trimmed = raw.trim();
        if PRINCIPAL_RE.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidPrincipal(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid principal '{0}'")]
pub struct InvalidPrincipal(pub String);

impl FromStr for Principal {
    type Err = InvalidPrincipal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Principal {
    type Error = InvalidPrincipal;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_principal() {
        assert!(Principal::parse("rrkah-fqaaa-aaaaa-aaaaq-cai").is_ok());
        assert!(Principal::parse("alice@example.org").is_ok());
        assert_eq!(Principal::parse("  bob ").unwrap().as_str(), "bob");

        assert!(Principal::parse("").is_err());
        assert!(Principal::parse("-leading-dash").is_err());
        assert!(Principal::parse("has space").is_err());
    }

    #[test]
    fn test_principal_serde_rejects_malformed() {
        let ok: Principal = serde_json::from_str("\"carol\"").unwrap();
        assert_eq!(ok.to_string(), "carol");
        assert!(serde_json::from_str::<Principal>("\"not valid!\"").is_err());
    }
}
