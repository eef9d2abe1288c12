use std::path::PathBuf;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use pem::Pem;
use sha2::{Digest, Sha256};
use x509_parser::{extensions::GeneralName, prelude::X509Certificate};

use crate::core::types::PrivateKeyPem;

/// One certificate of a chain, leaf first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub alias: String,
    pub der: Vec<u8>,
    pub subject: String,
    pub issuer: String,
    pub issuer_common_name: Option<String>,
}

impl ChainEntry {
    pub fn parse(alias: Option<String>, der: Vec<u8>) -> Result<Self> {
        let (_, cert) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| anyhow!("failed to parse certificate: {e}"))?;
        let subject = cert.subject().to_string();
        let issuer = cert.issuer().to_string();
        let issuer_common_name = cert
            .issuer()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        Ok(Self {
            alias: alias.unwrap_or_else(|| subject.clone()),
            der,
            subject,
            issuer,
            issuer_common_name,
        })
    }

    pub fn pem(&self) -> String {
        pem::encode(&Pem::new("CERTIFICATE", self.der.clone()))
    }
}

/// An issued certificate with its chain and, optionally, its private key.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub friendly_name: String,
    /// Leaf first, then intermediates as received.
    pub chain: Vec<ChainEntry>,
    pub private_key: Option<PrivateKeyPem>,
    pub thumbprint: String,
    pub common_name: Option<String>,
    pub san_names: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateInfo {
    pub fn from_chain(
        friendly_name: impl Into<String>,
        chain: Vec<ChainEntry>,
        private_key: Option<PrivateKeyPem>,
    ) -> Result<Self> {
        let leaf = chain
            .first()
            .ok_or_else(|| anyhow!("certificate chain is empty"))?;
        let (_, cert) = x509_parser::parse_x509_certificate(&leaf.der)
            .map_err(|e| anyhow!("failed to parse leaf certificate: {e}"))?;
        let thumbprint = {
            let mut hasher = Sha256::new();
            hasher.update(cert.as_raw());
            hex::encode(hasher.finalize())
        };
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        Ok(Self {
            friendly_name: friendly_name.into(),
            thumbprint,
            common_name,
            san_names: san_names(&cert),
            not_before: timestamp(cert.validity().not_before.timestamp()),
            not_after: timestamp(cert.validity().not_after.timestamp()),
            chain,
            private_key,
        })
    }

    pub fn leaf(&self) -> &ChainEntry {
        // from_chain refuses empty chains
        &self.chain[0]
    }

    pub fn intermediates(&self) -> &[ChainEntry] {
        &self.chain[1..]
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn chain_pem(&self) -> String {
        self.chain.iter().map(ChainEntry::pem).collect()
    }

    pub fn without_private_key(&self) -> Self {
        Self {
            private_key: None,
            ..self.clone()
        }
    }

    pub fn with_friendly_name(mut self, friendly_name: impl Into<String>) -> Self {
        let friendly_name = friendly_name.into();
        if let Some(leaf) = self.chain.first_mut() {
            leaf.alias = friendly_name.clone();
        }
        self.friendly_name = friendly_name;
        self
    }

    /// Common name of the issuer of the topmost certificate in the chain.
    pub fn root_issuer_common_name(&self) -> Option<&str> {
        self.chain
            .last()
            .and_then(|entry| entry.issuer_common_name.as_deref())
    }
}

fn san_names(cert: &X509Certificate<'_>) -> Vec<String> {
    let Ok(Some(san)) = cert.subject_alternative_name() else {
        return Vec::new();
    };
    san.value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(dns.to_string()),
            GeneralName::IPAddress(bytes) => match bytes.len() {
                4 => {
                    let octets: [u8; 4] = (*bytes).try_into().ok()?;
                    Some(std::net::IpAddr::from(octets).to_string())
                }
                16 => {
                    let octets: [u8; 16] = (*bytes).try_into().ok()?;
                    Some(std::net::IpAddr::from(octets).to_string())
                }
                _ => None,
            },
            _ => None,
        })
        .collect()
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now)
}

/// Paired key-bearing and key-less forms of one candidate chain.
#[derive(Debug, Clone)]
pub struct CertificateOption {
    pub with_private_key: CertificateInfo,
    pub without_private_key: CertificateInfo,
}

impl CertificateOption {
    pub fn new(with_private_key: CertificateInfo) -> Self {
        let without_private_key = with_private_key.without_private_key();
        Self {
            with_private_key,
            without_private_key,
        }
    }
}

/// A certificate backed by a file in the certificate cache.
#[derive(Debug, Clone)]
pub struct CertificateInfoCache {
    pub certificate: CertificateInfo,
    pub cache_file: PathBuf,
    pub last_write: DateTime<Utc>,
}

impl CertificateInfoCache {
    pub fn thumbprint(&self) -> &str {
        &self.certificate.thumbprint
    }

    /// Key-less view for consumers that must not see key material.
    pub fn without_private_key(&self) -> CertificateInfo {
        self.certificate.without_private_key()
    }

    pub fn cache_file_name(&self) -> String {
        self.cache_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
