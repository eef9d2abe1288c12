//! Disk cache of issued certificates, signing requests and reusable keys.
//!
//! Certificate entries are JSON files named
//! `<renewalId>-<cacheKeyPart|main>-<shapeKey>.cert.json`, so one renewal can
//! hold entries for several orders and several certificate shapes at once.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::files::write_secure_file;
use crate::{
    core::{
        settings::CacheSettings,
        types::{Order, PrivateKeyPem},
    },
    issuance::certificate::{CertificateInfo, CertificateInfoCache, CertificateOption, ChainEntry},
};

const CERT_SUFFIX: &str = ".cert.json";
const CSR_SUFFIX: &str = ".csr.pem";
const KEY_SUFFIX: &str = ".key.pem";

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    friendly_name: String,
    /// Aliases in chain order, leaf first.
    #[serde(default)]
    aliases: Vec<String>,
    chain_pem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_key_pem: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CertificateCache {
    root: PathBuf,
}

impl CertificateCache {
    pub fn new(settings: &CacheSettings) -> Result<Self> {
        Self::with_path(&settings.path)
    }

    pub fn with_path(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create certificate cache at {}", path.display()))?;
        Ok(Self {
            root: path.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn base_name(order: &Order) -> String {
        format!(
            "{}-{}-{}",
            order.renewal_id,
            order.cache_part(),
            order.shape_key()
        )
    }

    pub fn cache_file(&self, order: &Order) -> PathBuf {
        self.root.join(format!("{}{CERT_SUFFIX}", Self::base_name(order)))
    }

    pub fn csr_file(&self, order: &Order) -> PathBuf {
        self.root.join(format!("{}{CSR_SUFFIX}", Self::base_name(order)))
    }

    /// Location of the reusable private key for an order part.
    pub fn key_path(&self, order: &Order) -> PathBuf {
        self.root.join(format!(
            "{}-{}{KEY_SUFFIX}",
            order.renewal_id,
            order.cache_part()
        ))
    }

    /// Entry matching the exact shape of the order, if any.
    pub fn cached_info(&self, order: &Order) -> Option<CertificateInfoCache> {
        let path = self.cache_file(order);
        if !path.exists() {
            return None;
        }
        match Self::load(&path) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("[cache] ignoring unreadable entry {}: {err:#}", path.display());
                None
            }
        }
    }

    /// Every certificate entry belonging to a renewal.
    pub fn cached_infos(&self, renewal_id: &str) -> Vec<CertificateInfoCache> {
        self.entries(|name| belongs_to(name, renewal_id))
    }

    /// Entries of one order part, regardless of certificate shape.
    pub fn cached_infos_for_part(&self, renewal_id: &str, part: &str) -> Vec<CertificateInfoCache> {
        let prefix = format!("{renewal_id}-{part}-");
        self.entries(|name| name.starts_with(&prefix))
    }

    /// Most recent certificate previously issued for this order part.
    ///
    /// Falls back to entries of the renewal that no current order part
    /// claims, which covers caches written before the renewal was split.
    pub fn previous_certificate(
        &self,
        order: &Order,
        current_parts: &[String],
    ) -> Option<CertificateInfoCache> {
        let newest = |entries: Vec<CertificateInfoCache>| {
            entries
                .into_iter()
                .max_by_key(|entry| entry.certificate.not_before)
        };
        newest(self.cached_infos_for_part(&order.renewal_id, order.cache_part())).or_else(|| {
            let unclaimed = self
                .cached_infos(&order.renewal_id)
                .into_iter()
                .filter(|entry| {
                    let name = entry.cache_file_name();
                    !current_parts
                        .iter()
                        .any(|part| name.contains(&format!("-{part}-")))
                })
                .collect();
            newest(unclaimed)
        })
    }

    pub fn store_csr(&self, order: &Order, csr_pem: &str) -> Result<()> {
        let path = self.csr_file(order);
        write_secure_file(&path, csr_pem.as_bytes())?;
        debug!("[cache] stored signing request at {}", path.display());
        Ok(())
    }

    /// Persists the key-bearing form of the option and returns the cached handle.
    pub fn store_certificate(
        &self,
        order: &Order,
        option: &CertificateOption,
    ) -> Result<CertificateInfoCache> {
        let certificate = &option.with_private_key;
        let record = CacheRecord {
            friendly_name: certificate.friendly_name.clone(),
            aliases: certificate.chain.iter().map(|e| e.alias.clone()).collect(),
            chain_pem: certificate.chain_pem(),
            private_key_pem: certificate
                .private_key
                .as_ref()
                .map(|key| key.as_str().to_string()),
        };
        let path = self.cache_file(order);
        let json = serde_json::to_vec_pretty(&record).context("failed to serialize cache entry")?;
        write_secure_file(&path, &json)?;
        debug!("[cache] stored certificate at {}", path.display());
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<CertificateInfoCache> {
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let record: CacheRecord = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let blocks = pem::parse_many(&record.chain_pem)
            .map_err(|e| anyhow!("invalid chain in {}: {e}", path.display()))?;
        let mut chain = Vec::with_capacity(blocks.len());
        for (index, block) in blocks.into_iter().enumerate() {
            let alias = record.aliases.get(index).cloned();
            chain.push(ChainEntry::parse(alias, block.contents().to_vec())?);
        }
        let certificate = CertificateInfo::from_chain(
            record.friendly_name,
            chain,
            record.private_key_pem.map(PrivateKeyPem::new),
        )?;
        let modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("failed to read timestamp of {}", path.display()))?;
        Ok(CertificateInfoCache {
            certificate,
            cache_file: path.to_path_buf(),
            last_write: DateTime::<Utc>::from(modified),
        })
    }

    pub fn delete_entry(&self, entry: &CertificateInfoCache) -> Result<()> {
        fs::remove_file(&entry.cache_file)
            .with_context(|| format!("failed to delete {}", entry.cache_file.display()))
    }

    /// Removes every cached file of a renewal: certificates, requests and keys.
    pub fn delete_renewal(&self, renewal_id: &str) -> Result<()> {
        for path in self.files(|name| {
            (name.starts_with(&format!("{renewal_id}-")) || name.starts_with(&format!("{renewal_id}.")))
                && (name.ends_with(CERT_SUFFIX) || name.ends_with(CSR_SUFFIX) || name.ends_with(KEY_SUFFIX))
        }) {
            fs::remove_file(&path)
                .with_context(|| format!("failed to delete {}", path.display()))?;
        }
        debug!("[cache] removed cached files of renewal {renewal_id}");
        Ok(())
    }

    fn files(&self, matches: impl Fn(&str) -> bool) -> Vec<PathBuf> {
        let Ok(read_dir) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(&matches)
            })
            .collect()
    }

    fn entries(&self, matches: impl Fn(&str) -> bool) -> Vec<CertificateInfoCache> {
        self.files(|name| name.ends_with(CERT_SUFFIX) && matches(name))
            .into_iter()
            .filter_map(|path| match Self::load(&path) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("[cache] ignoring unreadable entry {}: {err:#}", path.display());
                    None
                }
            })
            .collect()
    }
}

fn belongs_to(name: &str, renewal_id: &str) -> bool {
    name.starts_with(&format!("{renewal_id}-")) || name == format!("{renewal_id}{CERT_SUFFIX}")
}
