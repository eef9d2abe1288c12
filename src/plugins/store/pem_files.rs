use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::{debug, info, warn};
use pem::Pem;
use sha2::{Digest, Sha256};

use serde::{Deserialize, Serialize};

use crate::{
    core::types::StoreInfo,
    issuance::certificate::{CertificateInfo, CertificateInfoCache},
    plugins::{Capability, Plugin, StorePlugin},
    storage::files::{safe_file_name, validate_folder_name, write_secure_file},
};

const CERT_FILENAME: &str = "cert.pem";
const CHAIN_FILENAME: &str = "chain.pem";
const FULLCHAIN_FILENAME: &str = "fullchain.pem";
const PRIVKEY_FILENAME: &str = "privkey.pem";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PemFilesOptions {
    /// Parent folder; falls back to the configured default.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub keep_existing: bool,
}

/// Writes `cert.pem`, `chain.pem`, `fullchain.pem` and `privkey.pem`
/// into a folder per certificate.
pub struct PemFilesStore {
    path: Option<PathBuf>,
    keep_existing: bool,
}

impl PemFilesStore {
    pub fn new(options: PemFilesOptions, default_path: Option<&Path>) -> Self {
        Self {
            path: options.path.or_else(|| default_path.map(Path::to_path_buf)),
            keep_existing: options.keep_existing,
        }
    }

    fn output_dir(&self, certificate: &CertificateInfo) -> Result<PathBuf> {
        let root = self
            .path
            .as_ref()
            .ok_or_else(|| anyhow!("no PEM files path configured"))?;
        let folder = safe_file_name(
            certificate
                .common_name
                .as_deref()
                .unwrap_or(&certificate.thumbprint),
        );
        validate_folder_name(&folder)?;
        Ok(root.join(folder))
    }
}

impl Plugin for PemFilesStore {
    fn id(&self) -> &str {
        "pemfiles"
    }

    fn name(&self) -> &str {
        "PEM files"
    }

    fn capability(&self) -> Capability {
        match &self.path {
            Some(_) => Capability::Enabled,
            None => Capability::disabled("no path configured for PEM files"),
        }
    }
}

#[async_trait]
impl StorePlugin for PemFilesStore {
    async fn save(&self, certificate: &CertificateInfoCache) -> Result<Option<StoreInfo>> {
        let info = &certificate.certificate;
        let output_dir = self.output_dir(info)?;
        fs::create_dir_all(&output_dir).with_context(|| {
            format!("failed to create PEM directory at {}", output_dir.display())
        })?;

        let leaf_pem = info.leaf().pem();
        let chain_only_pem: String = info.intermediates().iter().map(|e| e.pem()).collect();
        let fullchain_pem = info.chain_pem();
        write_secure_file(&output_dir.join(CERT_FILENAME), leaf_pem.as_bytes())?;
        write_secure_file(&output_dir.join(CHAIN_FILENAME), chain_only_pem.as_bytes())?;
        write_secure_file(&output_dir.join(FULLCHAIN_FILENAME), fullchain_pem.as_bytes())?;
        match &info.private_key {
            Some(key) => {
                write_secure_file(&output_dir.join(PRIVKEY_FILENAME), key.as_str().as_bytes())?
            }
            None => warn!(
                "[store] no private key available for {}, {PRIVKEY_FILENAME} not written",
                info.friendly_name
            ),
        }
        info!("[store] exported PEM files to {}", output_dir.display());
        Ok(Some(StoreInfo {
            name: self.name().to_string(),
            path: Some(output_dir.display().to_string()),
        }))
    }

    async fn delete(&self, certificate: &CertificateInfoCache) -> Result<()> {
        let output_dir = self.output_dir(&certificate.certificate)?;
        let cert_path = output_dir.join(CERT_FILENAME);
        if !cert_path.exists() {
            debug!("[store] nothing to delete at {}", output_dir.display());
            return Ok(());
        }
        // The folder may already hold the replacement certificate.
        if stored_thumbprint(&cert_path)?.as_deref() != Some(certificate.thumbprint()) {
            debug!(
                "[store] {} no longer holds certificate {}, keeping it",
                output_dir.display(),
                certificate.thumbprint()
            );
            return Ok(());
        }
        fs::remove_dir_all(&output_dir)
            .with_context(|| format!("failed to delete {}", output_dir.display()))?;
        info!("[store] removed previous PEM files at {}", output_dir.display());
        Ok(())
    }

    fn keep_existing(&self) -> bool {
        self.keep_existing
    }
}

fn stored_thumbprint(cert_path: &Path) -> Result<Option<String>> {
    let raw = fs::read_to_string(cert_path)
        .with_context(|| format!("failed to read {}", cert_path.display()))?;
    let blocks: Vec<Pem> = pem::parse_many(&raw)
        .map_err(|err| anyhow!("failed to parse {}: {err}", cert_path.display()))?;
    Ok(blocks
        .iter()
        .find(|block| block.tag() == "CERTIFICATE")
        .map(|block| {
            let mut hasher = Sha256::new();
            hasher.update(block.contents());
            hex::encode(hasher.finalize())
        }))
}
