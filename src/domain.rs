use std::{fmt, net::IpAddr, str::FromStr};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn normalize_domain_for_storage(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    let (wildcard, rest) = match trimmed.strip_prefix("*.") {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let ascii =
        idna::domain_to_ascii(rest).map_err(|err| anyhow!("invalid domain name: {err}"))?;
    let ascii = ascii.to_lowercase();
    Ok(if wildcard { format!("*.{ascii}") } else { ascii })
}

pub fn normalize_domain_for_display(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('.');
    let (unicode, _) = idna::domain_to_unicode(trimmed);
    unicode.to_lowercase()
}

/// A DNS name or IP address that can be certified.
///
/// Values are normalized on construction so equality, hashing and ordering
/// all follow the normalized string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    Dns(String),
    Ip(IpAddr),
}

impl Identifier {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let unbracketed = trimmed.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = IpAddr::from_str(unbracketed) {
            return Ok(Identifier::Ip(ip));
        }
        Ok(Identifier::Dns(normalize_domain_for_storage(trimmed)?))
    }

    pub fn dns(input: &str) -> Result<Self> {
        Ok(Identifier::Dns(normalize_domain_for_storage(input)?))
    }

    /// Normalized string form used for comparison, storage and CSR SANs.
    pub fn value(&self) -> String {
        match self {
            Identifier::Dns(name) => name.clone(),
            Identifier::Ip(ip) => ip.to_string(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Identifier::Dns(name) if name.starts_with("*."))
    }

    pub fn display_value(&self) -> String {
        match self {
            Identifier::Dns(name) => normalize_domain_for_display(name),
            Identifier::Ip(ip) => ip.to_string(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value())
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value())
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Identifier::parse(&raw).map_err(serde::de::Error::custom)
    }
}
